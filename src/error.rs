//! Error type shared by lambdas, predicates and the reactor.
//!
//! Four families of failure exist:
//!
//! - **Configuration errors** ([`Error::Config`] and friends) are raised synchronously by the
//!   predicate call that detected them, before the reactor is touched.
//! - **Transient conditions** (`EINTR` from the readiness primitive) never show up here; the
//!   reactor retries them with the remaining time budget.
//! - **Resource errors** are not errors at this level at all: they reach the owning callback as a
//!   [`Value::Errno`](crate::Value::Errno) inside its argument tuple.
//! - **Fatal reactor errors** ([`Error::Poll`]) abort the driving `wait`, which cancels its lambda.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A predicate was invoked with a context tuple of the wrong shape.
    #[error("predicate `{predicate}` expects context ({expected}), got ({found})")]
    Config {
        predicate: &'static str,
        expected: String,
        found: String,
    },

    /// Conditions can only be registered on behalf of a running lambda.
    #[error("lambda is not running")]
    NotRunning,

    /// `again` was called while no fired condition is being handled.
    #[error("`again` called outside of a fired callback")]
    NothingToRearm,

    /// A lambda tried to wait on its own completion.
    #[error("a lambda cannot wait on itself")]
    SelfComposition,

    /// The lambda was cancelled and has no result.
    #[error("lambda was cancelled")]
    Cancelled,

    /// A callback was invoked again while it was still executing.
    #[error("callback re-entered while still running")]
    Reentrant,

    /// `poll()` was called while nothing is registered anywhere.
    #[error("reactor has nothing to wait for")]
    NothingToWait,

    /// A predicate needs a reactor capability that was switched off at build time.
    #[error("{feature} support not enabled. Use {hint}.")]
    FeatureDisabled {
        feature: &'static str,
        hint: &'static str,
    },

    /// The underlying readiness primitive failed.
    #[error("reactor poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Setting up reactor plumbing (pipes, handlers) failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Raised by user callbacks to abort their computation.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Builds an [`Error::Aborted`] from anything printable.
    pub fn aborted(reason: impl std::fmt::Display) -> Self {
        Error::Aborted(reason.to_string())
    }

    /// Returns true for configuration errors raised synchronously by predicate calls.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::SelfComposition | Error::FeatureDisabled { .. }
        )
    }
}
