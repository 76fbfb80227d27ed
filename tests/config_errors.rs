use std::cell::RefCell;
use std::rc::Rc;

use iolambda::{Error, Lambda, Reactor, ReactorBuilder, Value};

#[test]
fn test_readable_without_context_fails_synchronously() {
    let reactor = Reactor::new().unwrap();
    let observed = Rc::new(RefCell::new(None));
    let slot = observed.clone();

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        let result = this.readable(|_, _| Ok(vec![]));
        *slot.borrow_mut() = Some(result.map_err(|err| err.is_config()));
        Ok(vec![])
    });

    lambda.call(vec![]).unwrap();

    assert_eq!(*observed.borrow(), Some(Err(true)));
    assert_eq!(reactor.pending(), 0);
    assert!(lambda.is_finished());
}

#[test]
fn test_config_error_propagates_out_of_call() {
    let reactor = Reactor::new().unwrap();

    let lambda = Lambda::with_reactor(&reactor, |this, _| {
        this.context(vec![Value::from("not a descriptor")]);
        this.writable(|_, _| Ok(vec![]))?;
        Ok(vec![])
    });

    let err = lambda.call(vec![]).unwrap_err();
    assert!(matches!(
        err,
        Error::Config { predicate: "writable", ref found, .. } if found == "str"
    ));
    assert!(lambda.is_cancelled());
    assert_eq!(reactor.pending(), 0);
}

#[test]
fn test_context_is_checked_before_state() {
    let reactor = Reactor::new().unwrap();
    let lambda = Lambda::with_reactor(&reactor, |_, _| Ok(vec![]));

    assert!(matches!(
        lambda.readable(|_, _| Ok(vec![])),
        Err(Error::Config { .. })
    ));

    lambda.context(vec![Value::Fd(0)]);
    assert!(matches!(
        lambda.readable(|_, _| Ok(vec![])),
        Err(Error::NotRunning)
    ));
}

#[test]
fn test_signals_disabled_at_build_time() {
    let reactor = ReactorBuilder::new().disable_signals().build().unwrap();

    let lambda = Lambda::with_reactor(&reactor, |this, _| {
        this.context(vec![Value::Signal(libc::SIGUSR2)]).signal(|_, v| Ok(v))?;
        Ok(vec![])
    });

    let err = lambda.call(vec![]).unwrap_err();
    assert!(matches!(err, Error::FeatureDisabled { feature: "signal", .. }));
    assert!(err.is_config());
    assert_eq!(
        err.to_string(),
        "signal support not enabled. Use ReactorBuilder::enable_signals()."
    );
}
