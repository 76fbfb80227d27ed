//! Readiness backends.
//!
//! The reactor talks to the operating system through the [`Poller`] trait only, so the
//! readiness primitive is pluggable (see
//! [`ReactorBuilder::backend`](crate::ReactorBuilder::backend)). The reference backend is
//! [`PollPoller`], built on the universally available `poll(2)`.

mod poll;

pub use poll::PollPoller;

use std::io;
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Interest flags indicating what readiness to watch on a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0b001);
    pub const WRITABLE: Interest = Interest(0b010);
    /// Out-of-band / exceptional data.
    pub const PRIORITY: Interest = Interest(0b100);

    pub const fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub const fn is_priority(&self) -> bool {
        self.0 & Self::PRIORITY.0 != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

/// One readiness report for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub priority: bool,
    pub error: bool,
    pub hangup: bool,
    /// The descriptor is not open.
    pub invalid: bool,
}

/// A readiness-selection primitive.
///
/// `register` sets (or replaces) the interest for a descriptor, `deregister` forgets it and
/// `poll` blocks for at most `timeout` (forever when `None`), filling `events` with the
/// descriptors that became ready. An `Interrupted` error is retried by the reactor.
pub trait Poller {
    /// Sets the interest for `fd`, replacing any earlier one.
    ///
    /// # Arguments
    /// * `fd` - Descriptor to watch
    /// * `interest` - Readiness kinds to report; never empty
    ///
    /// # Returns
    /// An error when the backend cannot watch `fd`. The reactor hands it to the condition's
    /// callback as an `Errno`.
    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Stops watching `fd`. Unknown descriptors are not an error.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Waits for readiness on the registered descriptors.
    ///
    /// # Arguments
    /// * `events` - Cleared, then filled with one entry per ready descriptor
    /// * `timeout` - Longest wait; `None` blocks until something is ready
    ///
    /// # Example
    /// ```ignore
    /// let mut events = Vec::new();
    /// poller.poll(&mut events, Some(Duration::from_millis(10)))?;
    /// for event in &events {
    ///     println!("fd {} readable: {}", event.fd, event.readable);
    /// }
    /// ```
    fn poll(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;
}
