use std::process::Command;
use std::time::Duration;

use iolambda::{Lambda, ReactorBuilder, Value};

#[test]
fn test_child_exit_status_is_delivered() {
    let reactor = ReactorBuilder::new()
        .child_poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
    let pid = child.id() as i32;

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Pid(pid)]).child(|_, args| Ok(args))?;
        Ok(vec![])
    });

    let result = lambda.wait(vec![]).unwrap();
    assert_eq!(result[0], Value::Pid(pid));

    let status = result[1].as_int().unwrap() as i32;
    assert!(libc::WIFEXITED(status));
    assert_eq!(libc::WEXITSTATUS(status), 3);
}

#[test]
fn test_child_polling_without_signals() {
    let reactor = ReactorBuilder::new()
        .disable_signals()
        .child_poll_interval(Duration::from_millis(5))
        .build()
        .unwrap();

    let child = Command::new("sh").args(["-c", "sleep 0.05"]).spawn().unwrap();
    let pid = child.id() as i32;

    let lambda = Lambda::with_reactor(&reactor, move |this, _| {
        this.context(vec![Value::Int(i64::from(pid))])
            .child(|_, args| Ok(args))?;
        Ok(vec![])
    });

    let result = lambda.wait(vec![]).unwrap();
    let status = result[1].as_int().unwrap() as i32;
    assert!(libc::WIFEXITED(status));
    assert_eq!(libc::WEXITSTATUS(status), 0);
}

#[test]
fn test_foreign_pid_reports_echild() {
    let reactor = ReactorBuilder::new().disable_signals().build().unwrap();

    let lambda = Lambda::with_reactor(&reactor, |this, _| {
        this.context(vec![Value::Pid(1)]).child(|_, args| Ok(args))?;
        Ok(vec![])
    });

    assert_eq!(
        lambda.wait(vec![]).unwrap(),
        vec![Value::Pid(1), Value::Errno(libc::ECHILD)]
    );
}
