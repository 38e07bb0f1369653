use tracing::debug;
use crate::communication::{IpcView, Job, JobQueue, SharedIpc};
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::ipc::{NameScheme, Namespace, Segment, Semaphore};

/// Result of one feed-forward request.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One probability per requested move, in request order
    pub probs: Vec<f32>,
    pub value: f32,
}

/// A client endpoint of a running [`NNetService`](crate::NNetService).
///
/// Each endpoint claims one client slot and has at most one request
/// outstanding; requests block until the service has written the results
/// back into the slot.
pub struct NNetClient {
    id: usize,
    queue: JobQueue,
    segment: Segment<SharedIpc>,
    semaphore: Semaphore,
}

impl NNetClient {
    /// Attaches to a service instance, claims the next free slot and
    /// registers with the service.
    ///
    /// # Parameters
    ///
    /// * `namespace` - Namespace the service created its objects in
    /// * `pid` - Process id of the server
    /// * `config` - The service's configuration; `nnet_id`, `names`,
    ///   `max_clients` and `geometry` must match
    ///
    /// # Returns
    ///
    /// The registered endpoint, or [`ServiceError::NoFreeSlot`] once every
    /// slot has been claimed since the last reset.
    pub fn connect(namespace: &Namespace, pid: u32, config: &ServiceConfig) -> Result<Self> {
        let scheme = NameScheme::new(config.names.clone(), pid, config.nnet_id);
        let queue = JobQueue::attach(namespace, &scheme)?;

        let max_clients = config.max_clients;
        let id = queue
            .locked(|service| {
                let id = service.id_ipc_next() as usize;
                (id < max_clients).then(|| {
                    service.set_id_ipc_next(id as u32 + 1);
                    id
                })
            })?
            .ok_or(ServiceError::NoFreeSlot(max_clients))?;

        let semaphore = Semaphore::open(namespace, &scheme.client_semaphore(id), false, 0)?;
        let segment = Segment::<SharedIpc>::attach(namespace, &scheme.client_segment(id))?;
        if segment.shape() != config.geometry {
            return Err(ServiceError::Config(format!(
                "slot {id} holds {:?}, configured {:?}", segment.shape(), config.geometry
            )));
        }

        let client = Self { id, queue, segment, semaphore };
        client.slot(|ipc| ipc.set_nnet_id(config.nnet_id))?;
        client.queue.enqueue(Job::register(id))?;
        client.semaphore.dec_wait()?;
        debug!(client = id, nnet_id = config.nnet_id, "registered");
        Ok(client)
    }

    /// Slot index claimed by this endpoint.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Evaluates one position restricted to `nnmoves`.
    ///
    /// # Parameters
    ///
    /// * `input` - Exactly the configured number of features
    /// * `nnmoves` - Candidate move ids, at most `maxsize_moves` of them
    ///
    /// # Returns
    ///
    /// One probability per move in `nnmoves` order and the position value.
    /// [`ServiceError::ServiceClosed`] when the service stopped before or
    /// while the request was pending.
    pub fn feed_forward(&self, input: &[f32], nnmoves: &[u16]) -> Result<Evaluation> {
        if self.semaphore.is_shut_down()? {
            return Err(ServiceError::ServiceClosed);
        }
        self.slot(|ipc| ipc.write_request(input, nnmoves))??;
        self.queue.enqueue(Job::feed_forward(self.id))?;
        self.semaphore.dec_wait()?;

        self.slot(|ipc| Evaluation {
            probs: ipc.probs().to_vec(),
            value: ipc.value(),
        })
    }

    /// Runs `f` on the slot record.
    fn slot<R>(&self, f: impl FnOnce(&mut IpcView<'_>) -> R) -> Result<R> {
        // SAFETY: between the service's post and our next enqueue the slot
        // belongs to this endpoint alone
        let mut ipc = unsafe { self.segment.view() }?;
        Ok(f(&mut ipc))
    }
}
