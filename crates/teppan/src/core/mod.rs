//! # Batching core
//!
//! The pipeline that turns single-position requests into batched executor
//! calls and fans the results back out to client slots.
//!
//! ## Module Structure
//!
//! * [`accumulator`] - One batch under construction: packed inputs, move
//!   lists, result buffers and the client each row belongs to.
//!
//! * [`pipeline`] - The pool / push / wait lists, their condition variables
//!   and the dispatch policy that decides when a batch leaves.
//!
//! * [`stages`] - The intake, submit and collect loops.
//!
//! * [`worker`] - Thread handles for the stages.
//!
pub(crate) mod accumulator;
pub(crate) mod pipeline;
pub(crate) mod stages;
pub(crate) mod worker;
mod pill;

pub use pipeline::PipelineStats;
