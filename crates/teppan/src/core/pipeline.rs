use std::collections::VecDeque;
use parking_lot::{Condvar, Mutex, MutexGuard};
use super::accumulator::Accumulator;
use crate::config::Geometry;
use crate::error::{Result, ServiceError};

/// Occupancy of the accumulator lists at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    /// Idle accumulators ready for reuse
    pub pool: usize,
    /// Accumulators being filled or waiting for dispatch
    pub push: usize,
    /// Accumulators submitted to the executor and not yet collected
    pub wait: usize,
    /// Accumulators ever allocated
    pub allocated: usize,
}

impl PipelineStats {
    /// Accumulators currently held by a stage rather than a list.
    pub fn in_transit(&self) -> usize {
        self.allocated - self.pool - self.push - self.wait
    }
}

/// The three accumulator lists and the quit flag.
///
/// Every allocated accumulator is in exactly one list, or owned by the
/// submit or collect stage between two lock acquisitions.
pub(crate) struct Lists {
    pub pool: Vec<Box<Accumulator>>,
    pub push: VecDeque<Box<Accumulator>>,
    pub wait: VecDeque<Box<Accumulator>>,
    pub allocated: usize,
    pub quit: bool,
    /// Set by the submit stage once it has seen `quit` and will push no more
    pub submit_stopped: bool,
}

impl Lists {
    fn new() -> Self {
        Self {
            pool: vec![],
            push: VecDeque::new(),
            wait: VecDeque::new(),
            allocated: 0,
            quit: false,
            submit_stopped: false,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            pool: self.pool.len(),
            push: self.push.len(),
            wait: self.wait.len(),
            allocated: self.allocated,
        }
    }

    /// No accumulator is held outside the lists.
    pub fn settled(&self) -> bool {
        self.stats().in_transit() == 0
    }

    /// Folds one request into the open accumulator at the back of `push`.
    ///
    /// Opens a new accumulator, from the pool or freshly allocated, when there
    /// is none or the open one is full. Returns whether the submit stage must
    /// be woken: `push` went from empty to non-empty, or its only accumulator
    /// just filled up.
    pub fn add_request(
        &mut self,
        capacity: usize,
        geometry: Geometry,
        fill: impl FnOnce(&mut Accumulator) -> Result<()>,
    ) -> Result<bool> {
        let mut notify = self.push.is_empty();
        if self.push.back().is_none_or(|entry| entry.is_full()) {
            let entry = match self.pool.pop() {
                Some(entry) => entry,
                None => {
                    self.allocated += 1;
                    Box::new(Accumulator::new(capacity, geometry))
                }
            };
            self.push.push_back(entry);
        }

        let open = self.push
            .back_mut()
            .ok_or(ServiceError::AccumulatorState("missing open accumulator"))?;
        fill(open.as_mut())?;
        let full = open.is_full();
        if self.push.len() == 1 && full {
            notify = true;
        }
        Ok(notify)
    }

    /// Whether the submit stage should dispatch the head of `push` now.
    pub fn submit_ready(&self, max_in_flight: usize) -> bool {
        submit_ready(
            self.push.len(),
            self.push.front().is_some_and(|entry| entry.is_full()),
            self.wait.len(),
            max_in_flight,
        )
    }

    /// Checks that a reset can swap the model.
    pub fn check_drained(&self) -> Result<()> {
        if !self.push.is_empty() || !self.wait.is_empty() {
            return Err(ServiceError::ResetWithPendingWork {
                push: self.push.len(),
                wait: self.wait.len(),
            });
        }
        Ok(())
    }
}

/// Dispatch policy of the submit stage.
///
/// With nothing in flight a partial batch goes out at once, trading batch
/// efficiency for latency. While up to `max_in_flight` batches are in flight
/// only a full head batch is dispatched. Beyond that nothing is.
pub(crate) fn submit_ready(push: usize, front_full: bool, wait: usize, max_in_flight: usize) -> bool {
    if push == 0 {
        return false;
    }
    if max_in_flight < wait {
        return false;
    }
    if wait < 1 {
        return true;
    }
    front_full
}

/// Lists plus the condition variables the stages block on.
pub(crate) struct Pipeline {
    lists: Mutex<Lists>,
    /// Signaled by intake and collect when submit may have work
    pub cv_push: Condvar,
    /// Signaled by submit when collect has work
    pub cv_wait: Condvar,
    /// Signaled whenever a stage hands an accumulator back to a list
    pub cv_settled: Condvar,
    pub capacity: usize,
    pub max_in_flight: usize,
    pub geometry: Geometry,
}

impl Pipeline {
    pub fn new(capacity: usize, max_in_flight: usize, geometry: Geometry) -> Self {
        Self {
            lists: Mutex::new(Lists::new()),
            cv_push: Condvar::new(),
            cv_wait: Condvar::new(),
            cv_settled: Condvar::new(),
            capacity,
            max_in_flight,
            geometry,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock()
    }

    pub fn stats(&self) -> PipelineStats {
        self.lock().stats()
    }

    /// Sets the quit flag and wakes both stages.
    pub fn quit(&self) {
        self.lock().quit = true;
        self.cv_wait.notify_all();
        self.cv_push.notify_all();
    }
}
