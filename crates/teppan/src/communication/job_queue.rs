use super::{Job, ServiceView, SharedService};
use crate::error::{Result, ServiceError};
use crate::ipc::{NameScheme, Namespace, Segment, Semaphore};

/// Cross-process FIFO of [`Job`]s.
///
/// Two semaphores guard the shared array: a binary queue lock giving mutual
/// exclusion on the [`SharedService`] record, and a counting semaphore
/// holding one permit per queued job so that consumers block without
/// touching the record.
pub struct JobQueue {
    lock: Semaphore,
    available: Semaphore,
    segment: Segment<SharedService>,
}

impl JobQueue {
    /// Creates the queue objects for the instance named by `scheme`.
    ///
    /// # Parameters
    ///
    /// * `namespace` - Where the semaphores and the segment are created
    /// * `scheme` - Names of the instance's objects
    /// * `capacity` - Number of job records; one per client slot suffices,
    ///   since each client has at most one job queued
    pub fn create(namespace: &Namespace, scheme: &NameScheme, capacity: usize) -> Result<Self> {
        let lock = Semaphore::open(namespace, &scheme.queue_lock(), true, 1)?;
        let available = Semaphore::open(namespace, &scheme.queue_jobs(), true, 0)?;
        let segment = Segment::create(namespace, &scheme.queue_segment(), capacity)?;
        Ok(Self { lock, available, segment })
    }

    /// Attaches to a queue created by a running service.
    pub fn attach(namespace: &Namespace, scheme: &NameScheme) -> Result<Self> {
        Ok(Self {
            lock: Semaphore::open(namespace, &scheme.queue_lock(), false, 0)?,
            available: Semaphore::open(namespace, &scheme.queue_jobs(), false, 0)?,
            segment: Segment::attach(namespace, &scheme.queue_segment())?,
        })
    }

    /// Runs `f` on the shared record while holding the queue lock.
    pub fn locked<R>(&self, f: impl FnOnce(&mut ServiceView<'_>) -> R) -> Result<R> {
        self.lock.dec_wait()?;
        // SAFETY: every party touches the record only between dec_wait and
        // inc on the queue lock
        let result = unsafe { self.segment.view() }.map(|mut service| f(&mut service));
        self.lock.inc()?;
        result
    }

    /// Appends `job` and posts one permit.
    ///
    /// # Errors
    ///
    /// [`ServiceError::QueueFull`] when every record is taken; no permit is
    /// posted then.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        self.locked(|service| service.push(job))??;
        self.available.inc()
    }

    /// Blocks until a job is queued and removes it.
    pub fn dequeue(&self) -> Result<Job> {
        self.available.dec_wait()?;
        self.locked(|service| service.pop_front())?
            .ok_or_else(|| ServiceError::Ipc {
                name: self.segment.name().to_string(),
                reason: "job permit without a queued job",
            })
    }

    /// Number of queued jobs.
    pub fn len(&self) -> Result<usize> {
        self.locked(|service| service.njob())
    }

    pub fn close(&mut self) {
        self.lock.close();
        self.available.close();
        self.segment.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::JobKind;
    use crate::config::Names;
    use std::thread;
    use std::time::Duration;

    fn scheme() -> NameScheme {
        NameScheme::new(Names::default(), 1, 0)
    }

    #[test]
    fn test_fifo_across_handles() {
        let ns = Namespace::new();
        let server = JobQueue::create(&ns, &scheme(), 4).unwrap();
        let client = JobQueue::attach(&ns, &scheme()).unwrap();

        client.enqueue(Job::register(0)).unwrap();
        client.enqueue(Job::feed_forward(0)).unwrap();
        assert_eq!(server.len().unwrap(), 2);

        assert_eq!(server.dequeue().unwrap(), Job::register(0));
        assert_eq!(server.dequeue().unwrap(), Job::feed_forward(0));
        assert_eq!(server.len().unwrap(), 0);
    }

    #[test]
    fn test_overflow_is_rejected_without_a_permit() {
        let ns = Namespace::new();
        let queue = JobQueue::create(&ns, &scheme(), 1).unwrap();
        queue.enqueue(Job::feed_forward(0)).unwrap();
        assert!(matches!(
            queue.enqueue(Job::internal(JobKind::End, 1)),
            Err(ServiceError::QueueFull { capacity: 1 })
        ));
        assert_eq!(queue.available.value().unwrap(), 1);
        assert_eq!(queue.dequeue().unwrap(), Job::feed_forward(0));
        // the lock was released on the failed path
        assert_eq!(queue.len().unwrap(), 0);
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let ns = Namespace::new();
        let server = JobQueue::create(&ns, &scheme(), 4).unwrap();
        let client = JobQueue::attach(&ns, &scheme()).unwrap();

        let consumer = thread::spawn(move || server.dequeue().unwrap());
        thread::sleep(Duration::from_millis(20));
        assert!(!consumer.is_finished());

        client.enqueue(Job::feed_forward(2)).unwrap();
        assert_eq!(consumer.join().unwrap(), Job::feed_forward(2));
    }

    #[test]
    fn test_locked_sees_id_counter() {
        let ns = Namespace::new();
        let server = JobQueue::create(&ns, &scheme(), 4).unwrap();
        let client = JobQueue::attach(&ns, &scheme()).unwrap();

        let id = client
            .locked(|s| {
                let id = s.id_ipc_next();
                s.set_id_ipc_next(id + 1);
                id
            })
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(server.locked(|s| s.id_ipc_next()).unwrap(), 1);
    }

    #[test]
    fn test_attach_reads_capacity() {
        let ns = Namespace::new();
        let _server = JobQueue::create(&ns, &scheme(), 3).unwrap();
        let client = JobQueue::attach(&ns, &scheme()).unwrap();
        assert_eq!(client.segment.shape(), 3);
        assert_eq!(client.locked(|s| s.capacity()).unwrap(), 3);
    }
}
