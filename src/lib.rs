//! Composable suspended computations ("lambdas") driven by a single-threaded reactor.
//!
//! A [`Lambda`] expresses a sequence of non-blocking operations as a state machine: its
//! callbacks register interest in future events through predicates, and the [`Reactor`]
//! resumes the lambda when those events fire. Lambdas nest through [`Lambda::tail`], so a
//! computation can suspend on another computation exactly like it suspends on a socket.
//!
//! # Architecture
//!
//! - **Lambda**: the state machine (Passive, Running, Finished, Cancelled) with its context
//!   stack, outstanding conditions and result
//! - **Predicate**: the closed set of operations that turn a context tuple into a condition
//! - **Reactor**: owns every outstanding condition, multiplexes them over a [`Poller`] and
//!   dispatches what fired
//! - **ReactorBuilder**: fluent configuration of a reactor
//! - **runtime**: the current-reactor context and the blocking `wait` drivers
//! - **time**, **io**, **net**: ready-made lambdas for timers, descriptors and TCP
//!
//! # Example
//!
//! ```ignore
//! use iolambda::{Lambda, Value};
//! use std::time::Duration;
//!
//! let lambda = Lambda::new(|this, _| {
//!     this.timeout(Duration::from_millis(10), |_, _| Ok(vec![Value::Int(42)]))?;
//!     Ok(vec![])
//! });
//! assert_eq!(lambda.wait(vec![])?, vec![Value::Int(42)]);
//! ```

mod builder;
mod error;
mod lambda;
mod reactor;
mod value;

pub mod io;
pub mod net;
pub mod runtime;
pub mod time;

pub use builder::ReactorBuilder;
pub use error::{Error, Result};
pub use lambda::compose;
pub use lambda::{ContextStack, Lambda, LambdaId, Predicate, State};
pub use reactor::condition::{Condition, ConditionId, Kind, Resource};
pub use reactor::core::Reactor;
pub use reactor::notify::Notifier;
pub use reactor::poller::{Interest, PollPoller, Poller, Readiness};
pub use value::{Value, Values, errno_of};
