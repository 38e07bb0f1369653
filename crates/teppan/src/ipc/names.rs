use crate::config::Names;

/// Deterministic names of one service instance's IPC objects.
///
/// Derived from the server process id, the instance index and, for
/// per-client objects, the client index, so that several instances and
/// many clients can share a host without collisions.
#[derive(Debug, Clone)]
pub struct NameScheme {
    names: Names,
    pid: u32,
    nnet_id: u32,
}

impl NameScheme {
    pub fn new(names: Names, pid: u32, nnet_id: u32) -> Self {
        Self { names, pid, nnet_id }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn nnet_id(&self) -> u32 {
        self.nnet_id
    }

    fn service(&self, prefix: &str) -> String {
        format!("{}.{:07}.{:03}", prefix, self.pid, self.nnet_id)
    }

    fn client(&self, prefix: &str, client: usize) -> String {
        format!("{}.{:07}.{:03}.{:03}", prefix, self.pid, self.nnet_id, client)
    }

    /// Binary semaphore guarding the job array.
    pub fn queue_lock(&self) -> String {
        self.service(&self.names.sem_lock)
    }

    /// Counting semaphore of queued jobs.
    pub fn queue_jobs(&self) -> String {
        self.service(&self.names.sem)
    }

    /// Segment holding the job array.
    pub fn queue_segment(&self) -> String {
        self.service(&self.names.mmap)
    }

    pub fn client_semaphore(&self, client: usize) -> String {
        self.client(&self.names.sem, client)
    }

    pub fn client_segment(&self, client: usize) -> String {
        self.client(&self.names.mmap, client)
    }

    /// Segment of the shared pseudo-random sequence; one per server process.
    pub fn seq_prn(&self) -> String {
        format!("{}.{:07}", self.names.seq_prn, self.pid)
    }
}
