//! Fluent builder for Reactor construction.
//!
//! Provides a builder pattern interface for choosing which process-wide facilities a reactor
//! may use and which readiness backend it drives.

use crate::error::Result;
use crate::reactor::core::Reactor;
use crate::reactor::poller::{PollPoller, Poller};

use std::time::Duration;

/// Settings a reactor is built with.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Config {
    /// Whether the signal frame may install handlers.
    pub(crate) signals: bool,

    /// Upper bound on a single poll wait while child processes are watched.
    pub(crate) child_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signals: true,
            child_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Builder for constructing [`Reactor`] instances with a fluent API.
///
/// # Example
/// ```ignore
/// let reactor = ReactorBuilder::new()
///     .disable_signals()
///     .child_poll_interval(Duration::from_millis(20))
///     .build()?;
/// ```
pub struct ReactorBuilder {
    config: Config,
    backend: Option<Box<dyn Poller>>,
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorBuilder {
    /// Creates a builder with the defaults: signals enabled, 100ms child polling and the
    /// `poll(2)` backend.
    ///
    /// # Example
    /// ```ignore
    /// let builder = ReactorBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            backend: None,
        }
    }

    /// Lets `Predicate::Signal` install process-wide handlers. On by default.
    pub fn enable_signals(mut self) -> Self {
        self.config.signals = true;
        self
    }

    /// Makes the signal predicate fail with [`Error::FeatureDisabled`](crate::Error::FeatureDisabled).
    /// Child processes are then found by interval polling alone.
    pub fn disable_signals(mut self) -> Self {
        self.config.signals = false;
        self
    }

    /// Caps how long a single poll may block while child processes are watched.
    ///
    /// Exits are normally noticed through `SIGCHLD`, but that signal can be consumed by other
    /// code in the process (or be disabled), so the reactor also reaps on this interval.
    ///
    /// # Arguments
    /// * `interval` - Longest blocking wait while any `child` condition is outstanding
    ///
    /// # Example
    /// ```ignore
    /// let reactor = ReactorBuilder::new()
    ///     .child_poll_interval(Duration::from_millis(10))
    ///     .build()?;
    /// ```
    pub fn child_poll_interval(mut self, interval: Duration) -> Self {
        self.config.child_poll_interval = interval;
        self
    }

    /// Replaces the readiness backend.
    ///
    /// The reactor registers its wake pipe with the backend during [`build`](Self::build), so
    /// a backend must accept readable interest on arbitrary descriptors.
    ///
    /// # Example
    /// ```ignore
    /// let reactor = ReactorBuilder::new().backend(Box::new(PollPoller::new())).build()?;
    /// ```
    pub fn backend(mut self, poller: Box<dyn Poller>) -> Self {
        self.backend = Some(poller);
        self
    }

    /// Builds the reactor. Fails only if its wake pipe cannot be created.
    ///
    /// # Returns
    /// A new reactor owning the configured backend, or [`Error::Io`](crate::Error::Io)
    ///
    /// # Example
    /// ```ignore
    /// let reactor = ReactorBuilder::new().build()?;
    /// ```
    pub fn build(self) -> Result<Reactor> {
        let poller = self
            .backend
            .unwrap_or_else(|| Box::new(PollPoller::new()));

        Reactor::with_config(self.config, poller)
    }
}

impl std::fmt::Debug for ReactorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorBuilder")
            .field("config", &self.config)
            .field("custom_backend", &self.backend.is_some())
            .finish()
    }
}
