use super::{Interest, Poller, Readiness};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, nfds_t, pollfd};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Backend over `poll(2)`.
///
/// Interest is kept in an ordered map and the `pollfd` array is rebuilt on every call, which
/// keeps dispatch order deterministic (ascending descriptor).
#[derive(Debug, Default)]
pub struct PollPoller {
    interests: BTreeMap<RawFd, Interest>,
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Poller for PollPoller {
    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        self.interests.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.interests.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        self.fds.clear();
        self.fds.extend(self.interests.iter().map(|(&fd, interest)| {
            let mut wanted = 0;
            if interest.is_readable() {
                wanted |= POLLIN;
            }
            if interest.is_writable() {
                wanted |= POLLOUT;
            }
            if interest.is_priority() {
                wanted |= POLLPRI;
            }

            pollfd {
                fd,
                events: wanted,
                revents: 0,
            }
        }));

        let res = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_ms(timeout),
            )
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        for entry in self.fds.iter().filter(|entry| entry.revents != 0) {
            let revents = entry.revents;
            events.push(Readiness {
                fd: entry.fd,
                readable: revents & POLLIN != 0,
                writable: revents & POLLOUT != 0,
                priority: revents & POLLPRI != 0,
                error: revents & POLLERR != 0,
                hangup: revents & POLLHUP != 0,
                invalid: revents & POLLNVAL != 0,
            });
        }

        Ok(())
    }
}

// Rounds up so a sub-millisecond deadline never turns into a busy loop.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(duration) => {
            let mut ms = duration.as_millis();
            if Duration::from_millis(ms as u64) < duration {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}
