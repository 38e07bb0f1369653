//! # Teppan
//!
//! A batching feed-forward inference service: many clients each ask for one
//! position to be evaluated, a single server owns the (expensive) compute
//! executor and groups their requests into fixed-capacity micro-batches
//! before dispatch.
//!
//! ## Overview
//!
//! Clients and the server meet through named IPC objects: a shared job
//! queue guarded by two semaphores, and one slot plus one semaphore per
//! client. A client writes its request into its slot, enqueues a job and
//! blocks on its semaphore; the server writes the policy and value back into
//! the slot and posts the semaphore.
//!
//! Inside the server three stages run on their own threads:
//!
//! - **intake** dequeues jobs and folds requests into accumulators
//! - **submit** hands accumulators to the executor
//! - **collect** awaits the executor in submission order and delivers results
//!
//! ## Architecture
//!
//! ### Dispatch policy
//!
//! With nothing in flight a partial batch is dispatched at once, so a lone
//! request is never held back waiting for company. While batches are in
//! flight only full batches leave, and past
//! [`ServiceConfig::max_in_flight`] nothing does until a batch is collected.
//!
//! ### Executor
//!
//! The numeric backend sits behind the [`Executor`] trait, built by an
//! [`ExecutorFactory`] for the configured [`Backend`] on every model reset.
//!
//! ### Fatal errors
//!
//! Invariant violations inside the stages, such as queue overflow or a reset
//! against a non-empty pipeline, terminate the process. An external
//! supervisor is expected to restart it.
//!
//! ## Features
//!
//! - **candle** - Enables the candle executor and safetensors weight loader
//!

mod communication;
mod core;
mod client;
mod seq_prn;
mod service;

pub mod config;
pub mod error;
pub mod executor;
pub mod ipc;
pub mod telemetry;

pub use client::{Evaluation, NNetClient};
pub use communication::{Job, JobKind};
pub use config::{Backend, Geometry, Names, ServiceConfig, MAX_CLIENTS, MAX_NNET};
pub use crate::core::PipelineStats;
pub use error::{Result, ServiceError};
pub use executor::{Engine, Executor, ExecutorFactory};
pub use ipc::Namespace;
pub use seq_prn::{SeqPrnService, DEFAULT_SEQ_PRN_LEN, SEQ_PRN_SEED};
pub use service::NNetService;
