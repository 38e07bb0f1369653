//! Error taxonomy for the service.
//!
//! Every fallible operation returns [`Result`]. Inside the pipeline stages an
//! error is never recovered from: it is handed to [`fatal`], which logs the
//! diagnostic and terminates the process.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the service, its IPC layer, and its collaborators.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// IO error while reading configuration or weight files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named semaphore or segment could not be opened
    #[error("IPC object `{name}` is unavailable: {reason}")]
    Ipc { name: String, reason: &'static str },

    /// A record's shape does not fit the address space
    #[error("record layout overflow: {0}")]
    Layout(#[from] std::alloc::LayoutError),

    /// The shared job queue already holds `capacity` jobs
    #[error("job queue overflow (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// A job record carried a client id outside the registered range
    #[error("job id {id} is neither a client index below {max_clients} nor the server sentinel")]
    InvalidJobId { id: u32, max_clients: usize },

    /// A job record carried an unknown type discriminant
    #[error("unknown job type {0}")]
    UnknownJobKind(u32),

    /// A reset was attempted while batches were still in the pipeline
    #[error("reset with non-empty pipeline (push: {push}, wait: {wait})")]
    ResetWithPendingWork { push: usize, wait: usize },

    /// A reset job arrived without a pending reset request
    #[error("reset job without a pending request")]
    ResetWithoutRequest,

    /// Jobs were found in the shared queue while processing a reset
    #[error("reset found {njob} queued jobs")]
    ResetWithQueuedJobs { njob: usize },

    /// A client slot registered against another service instance
    #[error("client {client} registered with nnet_id {found}, expected {expected}")]
    ForeignClient { client: usize, found: u32, expected: u32 },

    /// `add` on an accumulator with no free rows
    #[error("accumulator is full ({capacity} rows)")]
    AccumulatorFull { capacity: usize },

    /// `submit` on an accumulator with no rows
    #[error("accumulator is empty")]
    AccumulatorEmpty,

    /// `submit` twice, or `collect` without a prior `submit`
    #[error("accumulator is {0}")]
    AccumulatorState(&'static str),

    /// A feed-forward job arrived before any model was loaded
    #[error("no model loaded")]
    NoModel,

    /// The configured backend cannot be built in this binary
    #[error("backend `{0}` is not supported by this build")]
    UnsupportedBackend(&'static str),

    /// The compute executor failed
    #[error("executor error: {0}")]
    Executor(String),

    /// The weight file could not be decoded
    #[error("failed to load weights from {path}: {reason}")]
    Weights { path: PathBuf, reason: String },

    /// The client has no free slot index left
    #[error("no free client slot (max {0})")]
    NoFreeSlot(usize),

    /// A client request does not fit the slot geometry
    #[error("request does not fit slot: {0}")]
    RequestShape(String),

    /// The service shut down while the client was waiting
    #[error("service closed")]
    ServiceClosed,
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<toml::de::Error> for ServiceError {
    fn from(e: toml::de::Error) -> Self {
        ServiceError::Config(e.to_string())
    }
}

/// Terminates the process after logging `err`.
///
/// Used for invariant violations inside the pipeline, which indicate shared
/// state corruption or a programming error. There is no local recovery; an
/// external supervisor is expected to restart the server.
pub fn fatal(err: ServiceError) -> ! {
    tracing::error!(error = %err, "fatal invariant violation");
    std::process::abort()
}

/// Unwraps `result`, routing an error to [`fatal`].
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    #[inline]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServiceError::ResetWithPendingWork { push: 1, wait: 2 };
        assert_eq!(err.to_string(), "reset with non-empty pipeline (push: 1, wait: 2)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "weights.bin");
        let err: ServiceError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_or_fatal_passes_values_through() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.or_fatal(), 7);
    }
}
