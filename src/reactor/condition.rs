//! A single pending subscription to a future event.

use crate::lambda::LambdaId;

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CONDITION: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered condition. Unique for the whole process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(u64);

impl ConditionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONDITION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// The descriptor a condition watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Fd(RawFd),
    /// A pure timer. Timers carry no identity of their own and are never deduplicated.
    Timer,
    Signal(i32),
    Child(i32),
    Notify(u64),
    /// Completion of another lambda (composition). Never handed to the reactor.
    Lambda(LambdaId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Readable,
    Writable,
    Exceptional,
    Timeout,
    Signal,
    Completion,
}

/// What to watch, as the reactor sees it.
///
/// The callback and its context tuple stay with the owning lambda; the reactor only keeps
/// enough to decide when the condition fires and whom to resume.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub resource: Resource,
    pub kind: Kind,
    /// Relative deadline. Mandatory for [`Kind::Timeout`], optional for I/O kinds, where
    /// expiry delivers `Bool(false)` instead of readiness.
    pub after: Option<Duration>,
}

impl Condition {
    pub fn io(fd: RawFd, kind: Kind, after: Option<Duration>) -> Self {
        Self {
            resource: Resource::Fd(fd),
            kind,
            after,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            resource: Resource::Timer,
            kind: Kind::Timeout,
            after: Some(after),
        }
    }

    pub fn signal(signum: i32) -> Self {
        Self {
            resource: Resource::Signal(signum),
            kind: Kind::Signal,
            after: None,
        }
    }

    pub fn child(pid: i32) -> Self {
        Self {
            resource: Resource::Child(pid),
            kind: Kind::Completion,
            after: None,
        }
    }

    pub fn notify(token: u64) -> Self {
        Self {
            resource: Resource::Notify(token),
            kind: Kind::Completion,
            after: None,
        }
    }

    pub(crate) fn is_io(&self) -> bool {
        matches!(self.resource, Resource::Fd(_))
    }
}
