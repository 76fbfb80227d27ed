//! Process-wide signal frame.
//!
//! Signal handlers cannot touch the reactor, so the handler only writes the signal number
//! into a self-pipe. The pipe's read end joins the poll set of whichever reactor watches
//! signals, so a signal arriving during a blocking poll wakes it immediately.
//!
//! Signal dispositions are process-wide: only one reactor per process should watch signals
//! (or child processes, which rely on `SIGCHLD`).

use crate::reactor::notify::{drain_pipe, open_pipe};

use libc::c_int;
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

static READ_FD: AtomicI32 = AtomicI32::new(-1);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static PIPE_LOCK: Mutex<()> = Mutex::new(());

/// Handlers we installed, with the disposition they replaced.
static INSTALLED: Mutex<Vec<(c_int, libc::sigaction)>> = Mutex::new(Vec::new());

extern "C" fn on_signal(signum: c_int) {
    let fd = WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        // The interrupted code may be about to read errno; `write` must not clobber it.
        let saved = unsafe { *errno_location() };
        let byte = [signum as u8; 1];
        unsafe {
            libc::write(fd, byte.as_ptr() as *const _, 1);
            *errno_location() = saved;
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "emscripten"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "freebsd"
))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}

/// Read end of the self-pipe, created on first use.
pub(crate) fn pipe_fd() -> io::Result<RawFd> {
    let fd = READ_FD.load(Ordering::Acquire);
    if fd >= 0 {
        return Ok(fd);
    }

    let _guard = PIPE_LOCK.lock();
    let fd = READ_FD.load(Ordering::Acquire);
    if fd >= 0 {
        return Ok(fd);
    }

    let (read, write) = open_pipe()?;
    WRITE_FD.store(write, Ordering::Release);
    READ_FD.store(read, Ordering::Release);

    Ok(read)
}

/// Routes `signum` into the self-pipe. Idempotent.
pub(crate) fn install(signum: c_int) -> io::Result<()> {
    let mut installed = INSTALLED.lock();
    if installed.iter().any(|(n, _)| *n == signum) {
        return Ok(());
    }

    pipe_fd()?;

    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signum, &action, &mut previous) } < 0 {
        return Err(io::Error::last_os_error());
    }

    installed.push((signum, previous));
    tracing::debug!(signum, "signal handler installed");

    Ok(())
}

/// Puts back the disposition that was active before [`install`].
pub(crate) fn restore(signum: c_int) {
    let mut installed = INSTALLED.lock();
    let Some(index) = installed.iter().position(|(n, _)| *n == signum) else {
        return;
    };

    let (_, previous) = installed.swap_remove(index);
    unsafe {
        libc::sigaction(signum, &previous, ptr::null_mut());
    }
    tracing::debug!(signum, "signal handler restored");
}

/// Signal numbers delivered since the last drain, in arrival order, deduplicated.
pub(crate) fn drain() -> Vec<c_int> {
    let fd = READ_FD.load(Ordering::Acquire);
    if fd < 0 {
        return Vec::new();
    }

    let mut signals: Vec<c_int> = Vec::new();
    for byte in drain_pipe(fd) {
        let signum = c_int::from(byte);
        if !signals.contains(&signum) {
            signals.push(signum);
        }
    }

    signals
}
