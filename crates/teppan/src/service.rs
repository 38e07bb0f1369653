use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{info, warn};
use crate::communication::{Job, JobKind, JobQueue};
use crate::config::ServiceConfig;
use crate::core::PipelineStats;
use crate::core::accumulator::ClientSlot;
use crate::core::pipeline::Pipeline;
use crate::core::stages::{self, PendingReset, ServiceCore};
use crate::core::worker::StageHandle;
use crate::error::{OrFatal, Result, ServiceError};
use crate::executor::ExecutorFactory;
use crate::ipc::{NameScheme, Namespace};

/// One batching inference service instance.
///
/// Owns the shared job queue, one IPC slot and semaphore per client, the
/// accumulator pipeline and the three stage threads. Clients attach by
/// name through [`NNetClient`](crate::NNetClient); the owner loads and
/// swaps models with [`NNetService::reset`].
///
/// Dropping the service stops the stages, marks every client semaphore as
/// shut down, so blocked clients wake up and observe
/// [`ServiceError::ServiceClosed`], and unlinks every IPC object. A request
/// collected before the stages stopped is still answered.
///
/// # Example
///
/// ```ignore
/// let namespace = Namespace::new();
/// let config = ServiceConfig::new(0, 4, 8, Backend::CpuBlas { thread_num: 1 });
/// let service = NNetService::with_model(config, &namespace, engine, "weights.safetensors")?;
///
/// let client = NNetClient::connect(&namespace, service.pid(), service.config())?;
/// let evaluation = client.feed_forward(&features, &moves)?;
/// ```
pub struct NNetService {
    core: Arc<ServiceCore>,
    stages: Vec<StageHandle>,
    scheme: NameScheme,
    reset_gate: tokio::sync::Mutex<()>,
}

impl NNetService {
    /// Creates the IPC objects and starts the stages. No model is loaded yet.
    ///
    /// # Parameters
    ///
    /// * `config` - Validated before anything is created
    /// * `namespace` - Where the queue, slots and semaphores are created;
    ///   stale objects under the same names are replaced
    /// * `factory` - Builds an executor on every reset
    ///
    /// # Returns
    ///
    /// The running service, or the first error met while creating the IPC
    /// objects or spawning the stages. Objects created up to that point are
    /// unlinked again.
    pub fn new<F>(config: ServiceConfig, namespace: &Namespace, factory: F) -> Result<Self>
    where
        F: ExecutorFactory + 'static,
    {
        config.validate()?;
        let scheme = NameScheme::new(config.names.clone(), std::process::id(), config.nnet_id);

        let queue = JobQueue::create(namespace, &scheme, config.max_clients)?;
        let clients = (0..config.max_clients)
            .map(|u| ClientSlot::create(namespace, &scheme, u, &config.geometry))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();
        let pipeline = Pipeline::new(config.size_batch, config.max_in_flight, config.geometry);

        info!(
            nnet_id = config.nnet_id,
            pid = scheme.pid(),
            max_clients = config.max_clients,
            size_batch = config.size_batch,
            backend = config.backend.name(),
            "starting service"
        );

        let core = Arc::new(ServiceCore {
            config,
            queue,
            clients,
            pipeline,
            executor: RwLock::new(None),
            factory: Box::new(factory),
            pending_reset: Mutex::new(None),
        });

        // stages spawned so far are stopped by Drop if a later spawn fails
        let mut service = Self {
            core,
            stages: Vec::with_capacity(3),
            scheme,
            reset_gate: tokio::sync::Mutex::new(()),
        };
        let loops: [(&'static str, fn(&ServiceCore)); 3] = [
            ("intake", stages::intake),
            ("submit", stages::submit),
            ("collect", stages::collect),
        ];
        for (name, stage) in loops {
            let core = service.core.clone();
            service.stages.push(StageHandle::spawn(name, move || stage(&core))?);
        }
        Ok(service)
    }

    /// Creates the service and loads its first model.
    ///
    /// # Parameters
    ///
    /// * `file` - Model handed to the factory before the first client job
    ///
    /// See [`NNetService::new`] for the others.
    pub fn with_model<F>(
        config: ServiceConfig,
        namespace: &Namespace,
        factory: F,
        file: impl AsRef<Path>,
    ) -> Result<Self>
    where
        F: ExecutorFactory + 'static,
    {
        let service = Self::new(config, namespace, factory)?;
        service.nnreset(file)?;
        Ok(service)
    }

    /// Swaps the model for the one in `file`.
    ///
    /// Resolves once the intake stage has drained the pipeline and taken
    /// the request; the load itself runs behind the acknowledgement, ahead
    /// of any job queued afterwards. Concurrent resets are serialized.
    ///
    /// # Parameters
    ///
    /// * `file` - Model handed to the factory
    ///
    /// # Returns
    ///
    /// [`ServiceError::ServiceClosed`] when the stages stopped before taking
    /// the request. A failing load aborts the process.
    pub async fn reset(&self, file: impl AsRef<Path>) -> Result<()> {
        let path = file.as_ref().to_path_buf();
        let _serial = self.reset_gate.lock().await;

        let (done, ticket) = oneshot::channel();
        *self.core.pending_reset.lock() = Some(PendingReset { path, done });
        self.core.queue.enqueue(Job::internal(JobKind::NNReset, self.core.config.max_clients))?;
        ticket.await.map_err(|_| ServiceError::ServiceClosed)
    }

    /// Blocking form of [`NNetService::reset`].
    pub fn nnreset(&self, file: impl AsRef<Path>) -> Result<()> {
        futures::executor::block_on(self.reset(file))
    }

    /// Occupancy of the accumulator lists.
    pub fn stats(&self) -> PipelineStats {
        self.core.pipeline.stats()
    }

    /// Jobs waiting in the shared queue.
    pub fn queued_jobs(&self) -> Result<usize> {
        self.core.queue.len()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.core.config
    }

    /// Process id the IPC names are derived from.
    pub fn pid(&self) -> u32 {
        self.scheme.pid()
    }

    pub fn names(&self) -> &NameScheme {
        &self.scheme
    }
}

impl Drop for NNetService {
    fn drop(&mut self) {
        let max_clients = self.core.config.max_clients;
        self.core.queue.enqueue(Job::internal(JobKind::End, max_clients)).or_fatal();
        self.core.pipeline.quit();
        for stage in &mut self.stages {
            stage.join();
        }

        let nnet_id = self.core.config.nnet_id;
        for slot in self.core.clients.iter() {
            if let Err(err) = slot.semaphore.shut_down() {
                warn!(error = %err, "failed to wake client");
            }
        }
        match Arc::get_mut(&mut self.core) {
            Some(core) => teardown(core),
            None => warn!(nnet_id, "service state still shared, objects unlinked on last release"),
        }
        info!(nnet_id, "service stopped");
    }
}

/// Unlinks the IPC objects. Attached clients keep their mappings and see
/// the shut-down mark on their semaphore.
fn teardown(core: &mut ServiceCore) {
    for slot in core.clients.iter_mut() {
        slot.segment.close();
        slot.semaphore.close();
    }
    core.queue.close();
}
