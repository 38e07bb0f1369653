//! Wire-level protocol between the service and its clients: job records, the
//! shared job queue, and the `#[repr(C)]` service / client records.

mod job;
mod job_queue;
mod shared;

pub use job::{Job, JobKind};
pub use job_queue::JobQueue;
pub use shared::{IpcView, ServiceView, SharedIpc, SharedService};
