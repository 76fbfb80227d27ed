use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use iolambda::{Error, Lambda, Reactor, State, Value};

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(res, 0, "pipe() failed");
    (fds[0], fds[1])
}

#[test]
fn test_cancel_before_fire_prevents_resumption() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();
    let resumed = Rc::new(Cell::new(false));
    let flag = resumed.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        let flag = flag.clone();
        this.context(vec![Value::Fd(rfd)]).readable(move |_, _| {
            flag.set(true);
            Ok(vec![])
        })?;
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    assert_eq!(reactor.pending(), 1);

    lambda.cancel();
    assert_eq!(lambda.state(), State::Cancelled);
    assert_eq!(lambda.outstanding(), 0);
    assert_eq!(reactor.pending(), 0);

    let wrote = unsafe { libc::write(wfd, b"hello".as_ptr() as *const _, 5) };
    assert_eq!(wrote, 5);

    assert!(matches!(reactor.poll(), Err(Error::NothingToWait)));
    assert!(!resumed.get());
    assert!(matches!(lambda.wait(vec![]), Err(Error::Cancelled)));

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn test_cancel_is_a_no_op_once_finished() {
    let reactor = Reactor::new().unwrap();
    let lambda = Lambda::with_reactor(&reactor, |_, _| Ok(vec![Value::Int(1)]));

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Int(1)]);
    lambda.cancel();

    assert!(lambda.is_finished());
    assert_eq!(lambda.peek(), vec![Value::Int(1)]);
}

#[test]
fn test_cancelled_lambda_releases_its_waiters() {
    let reactor = Reactor::new().unwrap();
    let b = Lambda::with_reactor(&reactor, |this, _| {
        this.timeout(Duration::from_secs(60), |_, _| Ok(vec![]))?;
        Ok(vec![])
    });
    let ran = Rc::new(Cell::new(false));

    let a = Lambda::with_reactor(&reactor, {
        let b = b.clone();
        let ran = ran.clone();
        move |this, _| {
            let ran = ran.clone();
            this.tail(&b, move |_, _| {
                ran.set(true);
                Ok(vec![])
            })?;
            Ok(vec![Value::from("waiting")])
        }
    });

    a.call(vec![]).unwrap();
    b.cancel();
    assert_eq!(reactor.pending(), 0);

    assert_eq!(a.wait(vec![]).unwrap(), vec![Value::from("waiting")]);
    assert!(!ran.get());
}

#[test]
fn test_cancel_from_inside_a_callback() {
    let reactor = Reactor::new().unwrap();

    let lambda = Lambda::with_reactor(&reactor, |this, _| {
        this.timeout(Duration::from_secs(60), |_, _| Ok(vec![]))?;
        this.timeout(Duration::ZERO, |this, _| {
            this.cancel();
            Ok(vec![Value::Int(1)])
        })?;
        Ok(vec![])
    });

    assert!(matches!(lambda.wait(vec![]), Err(Error::Cancelled)));
    assert!(lambda.peek().is_empty());
    assert_eq!(reactor.pending(), 0);
}

#[test]
fn test_unwatch_drops_a_single_condition() {
    let reactor = Reactor::new().unwrap();
    let (rfd, wfd) = pipe();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        let id = this.context(vec![Value::Fd(rfd)]).readable(|_, _| Ok(vec![Value::from("read")]))?;
        this.timeout(Duration::from_millis(5), move |this, _| {
            assert!(this.unwatch(id));
            assert!(!this.unwatch(id));
            Ok(vec![Value::from("gave up")])
        })?;
        Ok(vec![])
    });

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::from("gave up")]);
    assert_eq!(reactor.pending(), 0);

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn test_cancel_restart_runs_init_again() {
    let reactor = Reactor::new().unwrap();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        counter.set(counter.get() + 1);
        this.timeout(Duration::ZERO, |_, _| Ok(vec![Value::Bool(true)]))?;
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();
    lambda.cancel();
    lambda.call(vec![]).unwrap();

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Bool(true)]);
    assert_eq!(runs.get(), 2);
}
