//! TCP connect and accept as lambdas.
//!
//! Sockets are plain descriptors (`Value::Fd`); ownership passes to whoever receives the
//! result, which closes them when done.

use crate::io::{set_nonblocking, socket_error};
use crate::lambda::Lambda;
use crate::value::{Value, errno_of};

use libc::{AF_INET, AF_INET6, SOCK_STREAM, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

/// Connects to `address` without blocking.
///
/// Result: `[Fd(socket)]` once connected, or `[Errno(code)]`.
pub fn connect(address: SocketAddr) -> Lambda {
    Lambda::new(move |this, _| {
        let fd = match open_socket(&address) {
            Ok(fd) => fd,
            Err(error) => return Ok(vec![errno(&error)]),
        };

        let (storage, len) = to_sockaddr(&address);
        let res = unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, len) };

        if res == 0 {
            return Ok(vec![Value::Fd(fd)]);
        }

        let error = io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::EINPROGRESS) {
            close(fd);
            return Ok(vec![errno(&error)]);
        }

        this.context(vec![Value::Fd(fd)]).writable(move |_, args| {
            let code = match errno_of(&args) {
                Some(code) => code,
                None => socket_error(fd).unwrap_or_else(|error| error.raw_os_error().unwrap_or(libc::EIO)),
            };

            if code != 0 {
                close(fd);
                return Ok(vec![Value::Errno(code)]);
            }
            Ok(vec![Value::Fd(fd)])
        })?;

        Ok(Vec::new())
    })
}

/// Accepts one connection on a listening socket.
///
/// Result: `[Fd(client), Str(peer)]` with the client in non-blocking mode, or `[Errno(code)]`.
pub fn accept(listener: RawFd) -> Lambda {
    Lambda::new(move |this, _| {
        this.context(vec![Value::Fd(listener)]).readable(move |this, args| {
            if let Some(code) = errno_of(&args) {
                return Ok(vec![Value::Errno(code)]);
            }

            let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
            let client = unsafe {
                libc::accept(listener, &mut storage as *mut _ as *mut sockaddr, &mut len)
            };

            if client < 0 {
                let error = io::Error::last_os_error();
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                    this.again()?;
                    return Ok(Vec::new());
                }
                return Ok(vec![errno(&error)]);
            }

            if let Err(error) = set_nonblocking(client) {
                close(client);
                return Ok(vec![errno(&error)]);
            }

            let peer = from_sockaddr(&storage)
                .map(|peer| peer.to_string())
                .unwrap_or_default();
            Ok(vec![Value::Fd(client), Value::Str(peer)])
        })?;

        Ok(Vec::new())
    })
}

/// Binds a non-blocking listening socket. Returns the descriptor and the bound address,
/// which resolves port 0.
pub fn listen(address: SocketAddr, backlog: i32) -> io::Result<(RawFd, SocketAddr)> {
    let fd = open_socket(&address)?;

    let setup = || -> io::Result<SocketAddr> {
        let reuse: libc::c_int = 1;
        let res = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &reuse as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as socklen_t,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        let (storage, len) = to_sockaddr(&address);
        if unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, len) } < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::listen(fd, backlog) } < 0 {
            return Err(io::Error::last_os_error());
        }

        local_addr(fd)
    };

    match setup() {
        Ok(bound) => Ok((fd, bound)),
        Err(error) => {
            close(fd);
            Err(error)
        }
    }
}

/// Address a socket is bound to.
pub fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    if unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) } < 0 {
        return Err(io::Error::last_os_error());
    }

    from_sockaddr(&storage)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unsupported address family"))
}

fn open_socket(address: &SocketAddr) -> io::Result<RawFd> {
    let family = match address {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = unsafe { libc::socket(family, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let cloexec = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    let prepared = if cloexec < 0 {
        Err(io::Error::last_os_error())
    } else {
        set_nonblocking(fd)
    };

    if let Err(error) = prepared {
        close(fd);
        return Err(error);
    }

    Ok(fd)
}

fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn errno(error: &io::Error) -> Value {
    Value::Errno(error.raw_os_error().unwrap_or(libc::EIO))
}

fn to_sockaddr(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    let len = match address {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sin.sin_family = AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin.sin_len = mem::size_of::<sockaddr_in>() as u8;
            }
            mem::size_of::<sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sin6.sin6_family = AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin6.sin6_len = mem::size_of::<sockaddr_in6>() as u8;
            }
            mem::size_of::<sockaddr_in6>()
        }
    };

    (storage, len as socklen_t)
}

fn from_sockaddr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match i32::from(storage.ss_family) {
        AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_conversion_preserves_v4_and_v6() {
        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let v6: SocketAddr = "[::1]:9090".parse().unwrap();

        for address in [v4, v6] {
            let (storage, _) = to_sockaddr(&address);
            assert_eq!(from_sockaddr(&storage), Some(address));
        }
    }
}
