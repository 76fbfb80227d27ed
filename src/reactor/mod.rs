//! Event-driven reactor.
//!
//! This module owns everything that talks to the operating system:
//! - [`core`]: the [`Reactor`](core::Reactor) handle, condition registry and poll loop
//! - [`condition`]: what a registered condition watches
//! - [`poller`]: the pluggable readiness backend
//! - `timer`, `signal` and `notify`: deadline bookkeeping, the signal self-pipe and the
//!   cross-thread wake pipe

pub mod condition;
pub mod core;
pub mod notify;
pub mod poller;

pub(crate) mod signal;
pub(crate) mod timer;
