use std::thread;
use std::time::Duration;

use iolambda::{Lambda, Reactor, Value};

#[test]
fn test_worker_thread_completion() {
    let reactor = Reactor::new().unwrap();
    let notifier = reactor.notifier();
    let token = notifier.token();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Token(token)]).notify(|_, args| Ok(args))?;
        Ok(vec![])
    });
    lambda.call(vec![]).unwrap();

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        notifier.notify();
    });

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Token(token)]);
    worker.join().unwrap();
}

#[test]
fn test_notification_before_watch_is_kept() {
    let reactor = Reactor::new().unwrap();
    let notifier = reactor.notifier();
    let token = notifier.token();

    thread::spawn(move || notifier.notify()).join().unwrap();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        // Wake-pipe bytes are drained by the next poll; watch something to let it run.
        this.timeout(Duration::from_millis(1), move |this, _| {
            this.context(vec![Value::Token(token)]).notify(|_, args| Ok(args))?;
            Ok(vec![])
        })?;
        Ok(vec![])
    });

    assert_eq!(lambda.wait(vec![]).unwrap(), vec![Value::Token(token)]);
}

#[test]
fn test_notifiers_get_distinct_tokens() {
    let reactor = Reactor::new().unwrap();
    let a = reactor.notifier();
    let b = reactor.notifier();
    assert_ne!(a.token(), b.token());
}
