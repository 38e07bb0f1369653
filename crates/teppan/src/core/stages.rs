//! The three pipeline stages.
//!
//! * intake drains the shared job queue and folds requests into accumulators
//! * submit hands accumulators to the executor
//! * collect awaits the executor and delivers results to clients
//!
//! Accumulators move between the stages through the pool / push / wait lists
//! of [`Pipeline`]; a stage that popped one owns it exclusively until it puts
//! it back into a list.

use std::path::PathBuf;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, trace};
use super::accumulator::ClientSlot;
use super::pipeline::Pipeline;
use crate::communication::{JobKind, JobQueue};
use crate::config::ServiceConfig;
use crate::error::{fatal, OrFatal, Result, ServiceError};
use crate::executor::{Executor, ExecutorFactory};

/// A reset requested by the owner, waiting for the intake stage.
pub(crate) struct PendingReset {
    pub path: PathBuf,
    pub done: oneshot::Sender<()>,
}

/// State shared by the owner and the three stage threads.
pub(crate) struct ServiceCore {
    pub config: ServiceConfig,
    pub queue: JobQueue,
    pub clients: Box<[ClientSlot]>,
    pub pipeline: Pipeline,
    pub executor: RwLock<Option<Box<dyn Executor>>>,
    pub factory: Box<dyn ExecutorFactory>,
    pub pending_reset: Mutex<Option<PendingReset>>,
}

/// Job dispatcher. Returns on [`JobKind::End`].
pub(crate) fn intake(core: &ServiceCore) {
    let nnet_id = core.config.nnet_id;
    let max_clients = core.config.max_clients;
    loop {
        let job = core.queue.dequeue().or_fatal();
        match (job.kind().or_fatal(), job.client(max_clients).or_fatal()) {
            (JobKind::End, _) => {
                info!(nnet_id, "terminate");
                return;
            }
            (JobKind::NNReset, _) => nnreset(core).or_fatal(),
            (JobKind::Register, Some(client)) => register(core, client).or_fatal(),
            (JobKind::FeedForward, Some(client)) => feed_forward(core, client).or_fatal(),
            (_, None) => fatal(ServiceError::InvalidJobId { id: job.id, max_clients }),
        }
    }
}

fn register(core: &ServiceCore, client: usize) -> Result<()> {
    let slot = &core.clients[client];
    let expected = core.config.nnet_id;
    let found = slot.with(|ipc| ipc.nnet_id())?;
    if found != expected {
        return Err(ServiceError::ForeignClient { client, found, expected });
    }
    slot.semaphore.inc()?;
    info!(client, nnet_id = expected, "register");
    Ok(())
}

fn nnreset(core: &ServiceCore) -> Result<()> {
    let pipeline = &core.pipeline;
    {
        let mut lists = pipeline.lock();
        pipeline.cv_settled.wait_while(&mut lists, |lists| !lists.settled());
        lists.check_drained()?;
    }

    let njob = core.queue.locked(|service| {
        service.set_id_ipc_next(0);
        service.njob()
    })?;
    if njob > 0 {
        return Err(ServiceError::ResetWithQueuedJobs { njob });
    }

    let request = core.pending_reset
        .lock()
        .take()
        .ok_or(ServiceError::ResetWithoutRequest)?;
    // the requester only waits for the drain; loading happens behind it
    let _ = request.done.send(());

    let config = &core.config;
    info!(
        nnet_id = config.nnet_id,
        file = %request.path.display(),
        backend = config.backend.name(),
        "reset"
    );
    let executor = core.factory.create(&request.path, &config.backend, config.size_batch, &config.geometry)?;
    *core.executor.write() = Some(executor);
    Ok(())
}

fn feed_forward(core: &ServiceCore, client: usize) -> Result<()> {
    let slot = &core.clients[client];
    let pipeline = &core.pipeline;
    let notify = pipeline.lock().add_request(pipeline.capacity, pipeline.geometry, |entry| {
        slot.with(|ipc| entry.add(ipc.input(), ipc.size_nnmove(), ipc.nnmoves(), client))?
    })?;
    if notify {
        pipeline.cv_push.notify_one();
    }
    trace!(client, "request queued");
    Ok(())
}

/// Dispatches accumulators to the executor.
///
/// Returns on quit, leaving `push` as is. A batch already submitted when the
/// flag is seen still goes to `wait`; collect does not stop before this
/// stage has.
pub(crate) fn submit(core: &ServiceCore) {
    let pipeline = &core.pipeline;
    loop {
        let mut entry = {
            let mut lists = pipeline.lock();
            pipeline.cv_push.wait_while(&mut lists, |lists| {
                !lists.quit && !lists.submit_ready(pipeline.max_in_flight)
            });
            if lists.quit {
                lists.submit_stopped = true;
                pipeline.cv_wait.notify_all();
                return;
            }
            match lists.push.pop_front() {
                Some(entry) => entry,
                None => continue,
            }
        };

        {
            let executor = core.executor.read();
            let executor = executor.as_deref().ok_or(ServiceError::NoModel).or_fatal();
            entry.submit(executor).or_fatal();
        }
        debug!(filled = entry.filled(), "batch submitted");
        trace!(clients = ?entry.clients(), "batch rows");

        pipeline.lock().wait.push_back(entry);
        pipeline.cv_wait.notify_one();
        pipeline.cv_settled.notify_all();
    }
}

/// Awaits submitted accumulators in submission order and delivers results.
///
/// On quit, batches already handed to the executor are still collected so
/// that every handle is awaited; returns once the submit stage has stopped
/// and `wait` is empty.
pub(crate) fn collect(core: &ServiceCore) {
    let pipeline = &core.pipeline;
    loop {
        let mut entry = {
            let mut lists = pipeline.lock();
            pipeline.cv_wait.wait_while(&mut lists, |lists| lists.wait.is_empty() && !lists.submit_stopped);
            match lists.wait.pop_front() {
                Some(entry) => entry,
                None => return,
            }
        };
        // a shorter wait list may re-enable dispatch
        pipeline.cv_push.notify_one();

        let filled = entry.filled();
        {
            let executor = core.executor.read();
            let executor = executor.as_deref().ok_or(ServiceError::NoModel).or_fatal();
            entry.collect(executor, &core.clients).or_fatal();
        }
        debug!(filled, "batch collected");

        pipeline.lock().pool.push(entry);
        pipeline.cv_push.notify_one();
        pipeline.cv_settled.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use crate::config::{Backend, Geometry};
    use crate::core::PipelineStats;
    use crate::core::accumulator::Accumulator;
    use crate::executor::mock_executor::{MockExecutor, MockFactory, Monitor};
    use crate::ipc::{NameScheme, Namespace};

    const GEOMETRY: Geometry = Geometry { size_input: 1, maxsize_moves: 2 };

    fn core(namespace: &Namespace) -> (Arc<ServiceCore>, Arc<Monitor>) {
        let config = ServiceConfig::new(0, 1, 2, Backend::CpuBlas { thread_num: 1 }).with_geometry(GEOMETRY);
        let scheme = NameScheme::new(config.names.clone(), 1, 0);
        let (factory, monitor) = MockFactory::new();
        let executor = MockExecutor::with_monitor(GEOMETRY, monitor.clone());
        let core = ServiceCore {
            queue: JobQueue::create(namespace, &scheme, 1).unwrap(),
            clients: vec![ClientSlot::create(namespace, &scheme, 0, &GEOMETRY).unwrap()].into_boxed_slice(),
            pipeline: Pipeline::new(config.size_batch, config.max_in_flight, GEOMETRY),
            executor: RwLock::new(Some(Box::new(executor))),
            factory: Box::new(factory),
            pending_reset: Mutex::new(None),
            config,
        };
        (Arc::new(core), monitor)
    }

    #[test]
    fn test_collect_outlives_submit_on_quit() {
        let namespace = Namespace::new();
        let (core, monitor) = core(&namespace);
        core.pipeline.quit();

        let collector = {
            let core = core.clone();
            thread::spawn(move || collect(&core))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!collector.is_finished());

        // a batch the submit stage handed over just as quit was set
        let mut entry = Box::new(Accumulator::new(2, GEOMETRY));
        entry.add(&[0.5], 1, &[1, 0], 0).unwrap();
        entry.submit(core.executor.read().as_deref().unwrap()).unwrap();
        {
            let mut lists = core.pipeline.lock();
            lists.allocated += 1;
            lists.wait.push_back(entry);
        }
        core.pipeline.cv_wait.notify_one();

        submit(&core);
        assert!(core.pipeline.lock().submit_stopped);
        collector.join().unwrap();

        assert_eq!(monitor.collected(), vec![0]);
        assert_eq!(core.pipeline.stats(), PipelineStats { pool: 1, push: 0, wait: 0, allocated: 1 });
        assert_eq!(core.clients[0].semaphore.value().unwrap(), 1);
        assert_eq!(core.clients[0].with(|ipc| ipc.value()).unwrap(), 0.5);
    }

    #[test]
    fn test_submit_dispatches_until_quit() {
        let namespace = Namespace::new();
        let (core, monitor) = core(&namespace);
        let submitter = {
            let core = core.clone();
            thread::spawn(move || submit(&core))
        };

        let notify = core.pipeline.lock().add_request(2, GEOMETRY, |entry| entry.add(&[1.0], 0, &[], 0)).unwrap();
        assert!(notify);
        core.pipeline.cv_push.notify_one();
        while core.pipeline.stats().wait == 0 {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(monitor.submitted(), vec![1]);

        core.pipeline.quit();
        submitter.join().unwrap();
        assert!(core.pipeline.lock().submit_stopped);
    }
}
