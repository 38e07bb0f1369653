//! Logging setup.
//!
//! The library only emits `tracing` events; binaries embedding the service
//! decide where they go. [`init_logging`] is a convenience for the common
//! case of a single stderr sink.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use crate::error::{Result, ServiceError};

/// Installs a global `fmt` subscriber filtered at `level`.
///
/// `RUST_LOG` overrides `level` when set. Fails if a global subscriber is
/// already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|e| ServiceError::Config(format!("failed to initialize logging: {e}")))
}
