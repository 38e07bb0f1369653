use crate::error::ServiceError;
use crate::ipc::Plain;

/// Type of a job on the shared queue.
///
/// The discriminants are part of the wire layout shared with clients.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobKind {
    /// Complete a client's registration handshake
    #[default]
    Register = 0,
    /// Load a new model; server-internal
    NNReset = 1,
    /// Evaluate the request in the client's slot
    FeedForward = 2,
    /// Stop the intake stage; server-internal
    End = 3,
}

impl TryFrom<u32> for JobKind {
    type Error = ServiceError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobKind::Register),
            1 => Ok(JobKind::NNReset),
            2 => Ok(JobKind::FeedForward),
            3 => Ok(JobKind::End),
            other => Err(ServiceError::UnknownJobKind(other)),
        }
    }
}

impl From<JobKind> for u32 {
    fn from(kind: JobKind) -> Self {
        kind as u32
    }
}

/// One fixed-size record of the shared job queue.
///
/// `id` is a client index for [`JobKind::Register`] and
/// [`JobKind::FeedForward`], and the sentinel `max_clients` for
/// server-internal jobs. The kind travels as its raw discriminant, since the
/// other side of the queue may write anything.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Job {
    pub id: u32,
    kind: u32,
}

unsafe impl Plain for Job {}

impl Job {
    pub fn new(id: u32, kind: JobKind) -> Self {
        Self { id, kind: kind.into() }
    }

    pub fn register(client: usize) -> Self {
        Self::new(client as u32, JobKind::Register)
    }

    pub fn feed_forward(client: usize) -> Self {
        Self::new(client as u32, JobKind::FeedForward)
    }

    /// A server-internal job addressed with the sentinel id.
    pub fn internal(kind: JobKind, max_clients: usize) -> Self {
        Self::new(max_clients as u32, kind)
    }

    /// Decodes the job type.
    pub fn kind(&self) -> Result<JobKind, ServiceError> {
        JobKind::try_from(self.kind)
    }

    /// Client index this job refers to, `None` for the sentinel.
    ///
    /// Any other id is a corrupted record.
    pub fn client(&self, max_clients: usize) -> Result<Option<usize>, ServiceError> {
        let id = self.id as usize;
        if id < max_clients {
            Ok(Some(id))
        } else if id == max_clients {
            Ok(None)
        } else {
            Err(ServiceError::InvalidJobId { id: self.id, max_clients })
        }
    }
}
