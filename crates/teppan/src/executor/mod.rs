//! # Compute executor
//!
//! The numeric backend is external to the service and consumed through a
//! small contract:
//!
//! * [`Executor`] - non-blocking `submit` of a batch returning an
//!   [`ExecHandle`], blocking `wait` consuming that handle
//! * [`WeightLoader`] - reads a model file into weights, version and digest
//! * [`ExecutorBuilder`] - builds an executor per [`Backend`](crate::config::Backend)
//! * [`ExecutorFactory`] - what the service holds; [`Engine`] composes a loader
//!   and a builder into one
//!
//! The backend is picked once, in the service configuration; each reset
//! rebuilds the executor for that backend with fresh weights.

mod core_trait;
mod engine;

pub use core_trait::*;
pub use engine::{Engine, ExecutorFactory};

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle executor implementation.
///
/// Only available with the `candle` feature. The CPU backend runs on
/// `Device::Cpu`, the GPU backend on a CUDA device, optionally in half
/// precision.
pub mod candle;

#[cfg(test)]
/// Mock executor.
///
/// Produces outputs derived from the inputs so tests can check routing.
pub(crate) mod mock_executor;
