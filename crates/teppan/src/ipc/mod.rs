//! # IPC primitives
//!
//! The service talks to its clients exclusively through named objects:
//! counting semaphores and shared records. This module provides them behind
//! the open / close / inc / dec-wait / ok contract the rest of the crate is
//! written against.
//!
//! * [`Namespace`] - the table objects are created in and attached from
//! * [`Semaphore`] - named counting semaphore
//! * [`Segment`] - named shared [`Record`]: a `#[repr(C)]` header followed by
//!   arrays of [`Plain`] values, sized once at creation
//! * [`NameScheme`] - deterministic naming from pid, instance and client index
//!
//! Objects live either in host shared memory ([`Namespace::host`]), where
//! clients in other processes attach by name, or on the heap of the server
//! process ([`Namespace::new`]) for clients running as threads. Both hold
//! the same bytes; neither serializes access. Who may touch a record when is
//! decided by the semaphores.

mod namespace;
mod names;
mod record;
mod segment;
mod semaphore;

pub use namespace::Namespace;
pub use names::NameScheme;
pub use record::{Bytes, Plain, Record};
pub use segment::Segment;
pub use semaphore::{Semaphore, SemaphoreRecord};
