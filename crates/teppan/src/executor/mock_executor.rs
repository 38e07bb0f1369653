use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{Condvar, Mutex};
use super::{BatchInput, ExecHandle, Executor, ExecutorFactory};
use crate::config::{Backend, Geometry};
use crate::error::{Result, ServiceError};

/// Observation and control point shared between a test and its mock executors.
pub(crate) struct Monitor {
    submitted: Mutex<Vec<usize>>,
    collected: Mutex<Vec<u64>>,
    resets: Mutex<Vec<PathBuf>>,
    open: Mutex<bool>,
    opened: Condvar,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            submitted: Mutex::new(vec![]),
            collected: Mutex::new(vec![]),
            resets: Mutex::new(vec![]),
            open: Mutex::new(true),
            opened: Condvar::new(),
        }
    }
}

impl Monitor {
    /// Batch sizes in submission order.
    pub fn submitted(&self) -> Vec<usize> {
        self.submitted.lock().clone()
    }

    /// Handle ids in the order they were awaited.
    pub fn collected(&self) -> Vec<u64> {
        self.collected.lock().clone()
    }

    pub fn resets(&self) -> Vec<PathBuf> {
        self.resets.lock().clone()
    }

    /// Makes `wait` block until [`Monitor::open_gate`].
    pub fn close_gate(&self) {
        *self.open.lock() = false;
    }

    pub fn open_gate(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

/// Deterministic executor: a row's value is its first input feature and the
/// probability of each candidate move is its move id.
pub(crate) struct MockExecutor {
    geometry: Geometry,
    monitor: Arc<Monitor>,
    next: AtomicU64,
    pending: Mutex<HashMap<u64, (Vec<f32>, Vec<f32>)>>,
}

impl MockExecutor {
    pub fn new(geometry: Geometry) -> Self {
        Self::with_monitor(geometry, Arc::new(Monitor::default()))
    }

    pub fn with_monitor(geometry: Geometry, monitor: Arc<Monitor>) -> Self {
        Self {
            geometry,
            monitor,
            next: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl Executor for MockExecutor {
    fn submit(&self, batch: BatchInput<'_>) -> Result<ExecHandle> {
        let maxm = self.geometry.maxsize_moves;
        let mut probs = vec![0.0; batch.size * maxm];
        let mut values = vec![0.0; batch.size];
        for u in 0..batch.size {
            values[u] = batch.row_input(u)[0];
            for (k, &m) in batch.row_moves(u).iter().enumerate() {
                probs[u * maxm + k] = m as f32;
            }
        }

        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(id, (probs, values));
        self.monitor.submitted.lock().push(batch.size);
        Ok(ExecHandle::new(id))
    }

    fn wait(&self, handle: ExecHandle, probs: &mut [f32], values: &mut [f32]) -> Result<()> {
        {
            let mut open = self.monitor.open.lock();
            self.monitor.opened.wait_while(&mut open, |open| !*open);
        }
        let (p, v) = self.pending
            .lock()
            .remove(&handle.id())
            .ok_or_else(|| ServiceError::Executor(format!("unknown handle {}", handle.id())))?;
        probs[..p.len()].copy_from_slice(&p);
        values[..v.len()].copy_from_slice(&v);
        self.monitor.collected.lock().push(handle.id());
        Ok(())
    }
}

/// Factory handing out [`MockExecutor`]s that share one monitor.
pub(crate) struct MockFactory {
    pub monitor: Arc<Monitor>,
}

impl MockFactory {
    pub fn new() -> (Self, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::default());
        (Self { monitor: monitor.clone() }, monitor)
    }
}

impl ExecutorFactory for MockFactory {
    fn create(
        &self,
        path: &Path,
        _backend: &Backend,
        _size_batch: usize,
        geometry: &Geometry,
    ) -> Result<Box<dyn Executor>> {
        self.monitor.resets.lock().push(path.to_path_buf());
        Ok(Box::new(MockExecutor::with_monitor(*geometry, self.monitor.clone())))
    }
}
