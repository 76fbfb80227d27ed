use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use iolambda::{Error, Lambda, Reactor, Value, io};

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(res, 0, "pipe() failed");
    (fds[0], fds[1])
}

fn close(fd: i32) {
    unsafe {
        libc::close(fd);
    }
}

fn write_bytes(fd: i32, bytes: &[u8]) {
    let wrote = unsafe { libc::write(fd, bytes.as_ptr() as *const _, bytes.len()) };
    assert_eq!(wrote, bytes.len() as isize);
}

#[test]
fn test_readable_fires_exactly_once() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();
    let fires = Rc::new(Cell::new(0));
    let counter = fires.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        let counter = counter.clone();
        this.context(vec![Value::Fd(rfd)]).readable(move |_, args| {
            counter.set(counter.get() + 1);
            Ok(args)
        })?;
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    write_bytes(wfd, b"hello");

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Bool(true)]);
    assert_eq!(fires.get(), 1);

    // Data is still buffered, but the condition was consumed.
    assert!(matches!(reactor.poll(), Err(Error::NothingToWait)));
    assert_eq!(fires.get(), 1);

    close(rfd);
    close(wfd);
}

#[test]
fn test_again_rearms_the_same_callback() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();
    io::set_nonblocking(rfd).unwrap();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        let mut total = 0i64;
        this.context(vec![Value::Fd(rfd)]).readable(move |this, _| {
            let mut byte = [0u8; 1];
            let res = unsafe { libc::read(rfd, byte.as_mut_ptr() as *mut _, 1) };
            if res == 1 {
                total += 1;
                this.again()?;
            }
            Ok(vec![Value::Int(total)])
        })?;
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    write_bytes(wfd, b"12345");
    close(wfd);

    // Five single-byte reads, then EOF stops the loop.
    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Int(5)]);
    close(rfd);
}

#[test]
fn test_readable_deadline_delivers_false() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Fd(rfd), Value::Float(0.01)])
            .readable(|_, args| Ok(args))?;
        Ok(vec![])
    });

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Bool(false)]);
    assert_eq!(reactor.pending(), 0);

    close(rfd);
    close(wfd);
}

#[test]
fn test_invalid_descriptor_reports_errno() {
    let reactor = Reactor::new().unwrap();

    let lambda = Lambda::with_reactor(&reactor, |this, _| {
        this.context(vec![Value::Fd(4000)]).readable(|_, args| Ok(args))?;
        Ok(vec![])
    });

    assert_eq!(
        lambda.wait(vec![]).unwrap(),
        vec![Value::Bool(true), Value::Errno(libc::EBADF)]
    );
}

#[test]
fn test_empty_reactor_has_nothing_to_wait_for() {
    let reactor = Reactor::new().unwrap();
    assert!(reactor.is_idle());
    assert!(matches!(reactor.poll(), Err(Error::NothingToWait)));
    assert!(reactor.run().is_ok());
}

#[test]
fn test_timers_fire_in_deadline_order() {
    let reactor = Reactor::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    let log = order.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        for ms in [30u64, 10, 20] {
            let log = log.clone();
            this.timeout(Duration::from_millis(ms), move |_, _| {
                log.borrow_mut().push(ms);
                Ok(vec![])
            })?;
        }
        Ok(vec![])
    });

    lambda.wait(vec![]).unwrap();
    assert_eq!(*order.borrow(), vec![10, 20, 30]);
}

#[test]
fn test_duplicate_registration_replaces_previous() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();
    let which = Rc::new(RefCell::new(Vec::new()));
    let log = which.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Fd(rfd)]);
        for name in ["first", "second"] {
            let log = log.clone();
            this.readable(move |_, _| {
                log.borrow_mut().push(name);
                Ok(vec![])
            })?;
        }
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    assert_eq!(lambda.outstanding(), 1);
    assert_eq!(reactor.pending(), 1);

    write_bytes(wfd, b"x");
    lambda.wait(vec![]).unwrap();
    assert_eq!(*which.borrow(), vec!["second"]);

    close(rfd);
    close(wfd);
}

#[test]
fn test_huge_deadline_still_waits_for_data() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Fd(rfd), Value::Int(i64::MAX)])
            .readable(|_, args| Ok(args))?;
        this.context(vec![Value::Fd(rfd), Value::Float(1e18)])
            .exception(|_, args| Ok(args))?;
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    assert_eq!(lambda.outstanding(), 2);

    write_bytes(wfd, b"x");
    while lambda.outstanding() == 2 {
        reactor.poll().unwrap();
    }
    assert_eq!(lambda.peek(), vec![Value::Bool(true)]);

    lambda.cancel();
    close(rfd);
    close(wfd);
}

#[test]
fn test_readable_inside_timeout_callback_uses_outer_context() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();
    write_bytes(wfd, b"ready");

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Fd(rfd)]);
        this.timeout(Duration::ZERO, |this, _| {
            this.readable(|_, args| Ok(args))?;
            Ok(vec![])
        })?;
        Ok(vec![])
    });

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Bool(true)]);

    close(rfd);
    close(wfd);
}
