//! Lambdas over raw non-blocking descriptors.
//!
//! Both helpers report failures as a result value (`[Errno(code)]`) rather than as an error,
//! so the composing lambda decides what a failed read or write means.

use crate::lambda::Lambda;
use crate::value::{Value, errno_of};

use libc::{F_GETFL, F_SETFL, O_NONBLOCK, fcntl};
use std::io;
use std::os::unix::io::RawFd;

/// Puts a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Pending `SO_ERROR` of a socket; 0 when there is none.
pub(crate) fn socket_error(fd: RawFd) -> io::Result<i32> {
    let mut code: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut code as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(code)
}

fn retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn errno(error: &io::Error) -> Value {
    Value::Errno(error.raw_os_error().unwrap_or(libc::EIO))
}

/// Reads at most `max` bytes once `fd` is readable.
///
/// Result: `[Bytes(data)]` (empty at end of file) or `[Errno(code)]`.
pub fn read(fd: RawFd, max: usize) -> Lambda {
    Lambda::new(move |this, _| {
        this.context(vec![Value::Fd(fd)]).readable(move |this, args| {
            if let Some(code) = errno_of(&args) {
                return Ok(vec![Value::Errno(code)]);
            }

            let mut buf = vec![0u8; max];
            let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };

            if res < 0 {
                let error = io::Error::last_os_error();
                if retryable(&error) {
                    this.again()?;
                    return Ok(Vec::new());
                }
                return Ok(vec![errno(&error)]);
            }

            buf.truncate(res as usize);
            Ok(vec![Value::Bytes(buf)])
        })?;

        Ok(Vec::new())
    })
}

/// Writes all of `bytes` to `fd`, waiting for writability as often as needed.
///
/// Result: `[Int(written)]` or `[Errno(code)]`.
pub fn write(fd: RawFd, bytes: Vec<u8>) -> Lambda {
    Lambda::new(move |this, _| {
        let data = bytes.clone();
        let mut offset = 0usize;

        this.context(vec![Value::Fd(fd)]).writable(move |this, args| {
            if let Some(code) = errno_of(&args) {
                return Ok(vec![Value::Errno(code)]);
            }

            let rest = &data[offset..];
            let res = unsafe { libc::write(fd, rest.as_ptr() as *const _, rest.len()) };

            if res < 0 {
                let error = io::Error::last_os_error();
                if retryable(&error) {
                    this.again()?;
                    return Ok(vec![Value::from(offset)]);
                }
                return Ok(vec![errno(&error)]);
            }

            offset += res as usize;
            if offset < data.len() {
                this.again()?;
            }
            Ok(vec![Value::from(offset)])
        })?;

        Ok(Vec::new())
    })
}
