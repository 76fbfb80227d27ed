//! Wake pipe and cross-thread completion notification.
//!
//! Every reactor owns one non-blocking pipe whose read end is always part of the poll set.
//! A [`Notifier`] handed to a worker thread records its token and writes one byte to the pipe,
//! which interrupts a blocking poll promptly. The reactor then turns the recorded tokens into
//! fired `Completion` conditions.

use parking_lot::Mutex;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Opens a pipe with both ends non-blocking and close-on-exec.
pub(crate) fn open_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];

    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }

    for fd in fds {
        let prepared = crate::io::set_nonblocking(fd).and_then(|_| set_cloexec(fd));
        if let Err(error) = prepared {
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(error);
        }
    }

    Ok((fds[0], fds[1]))
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Reads and discards everything currently buffered in a non-blocking pipe.
/// Returns the bytes read.
pub(crate) fn drain_pipe(fd: RawFd) -> Vec<u8> {
    let mut drained = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if res <= 0 {
            break;
        }
        drained.extend_from_slice(&buf[..res as usize]);
    }

    drained
}

struct Shared {
    write: RawFd,
    completed: Mutex<Vec<u64>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.write);
        }
    }
}

pub(crate) struct WakePipe {
    read: RawFd,
    shared: Arc<Shared>,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = open_pipe()?;

        Ok(Self {
            read,
            shared: Arc::new(Shared {
                write,
                completed: Mutex::new(Vec::new()),
            }),
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.read
    }

    pub(crate) fn notifier(&self, token: u64) -> Notifier {
        Notifier {
            token,
            shared: self.shared.clone(),
        }
    }

    /// Empties the pipe and returns the tokens notified since the last drain.
    pub(crate) fn drain(&self) -> Vec<u64> {
        drain_pipe(self.read);
        std::mem::take(&mut *self.shared.completed.lock())
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
        }
    }
}

/// Sendable handle that completes a `Notify` condition from any thread.
///
/// Obtained from [`Reactor::notifier`](crate::Reactor::notifier). A lambda waits for it by
/// pushing `Value::Token(notifier.token())` and calling
/// [`Lambda::notify`](crate::Lambda::notify).
#[derive(Clone)]
pub struct Notifier {
    token: u64,
    shared: Arc<Shared>,
}

impl Notifier {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Marks the token complete and wakes the reactor.
    pub fn notify(&self) {
        self.shared.completed.lock().push(self.token);

        // A full pipe already guarantees a wake-up, so EAGAIN is fine to ignore.
        let byte = [1u8; 1];
        unsafe {
            libc::write(self.shared.write, byte.as_ptr() as *const _, 1);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_records_token_and_wakes_pipe() {
        let wake = WakePipe::new().expect("wake pipe");
        let notifier = wake.notifier(9);

        let handle = std::thread::spawn(move || notifier.notify());
        handle.join().unwrap();

        let mut fds = [libc::pollfd {
            fd: wake.fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let res = unsafe { libc::poll(fds.as_mut_ptr(), 1, 1_000) };
        assert_eq!(res, 1);

        assert_eq!(wake.drain(), vec![9]);
        assert!(wake.drain().is_empty());
    }
}
