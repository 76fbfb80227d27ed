//! The closed set of predicates a lambda can suspend on.
//!
//! Every predicate has a fixed context signature. [`Predicate::bind`] checks the current
//! context tuple against it and turns it into either a reactor [`Condition`] or a composition
//! link to another lambda. A mismatch is a configuration error raised before the reactor is
//! touched.

use crate::error::{Error, Result};
use crate::lambda::Lambda;
use crate::reactor::condition::{Condition, Kind};
use crate::value::{Value, Values};

use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// `(fd, seconds?)`: the descriptor is readable, or the optional deadline passed.
    Readable,
    /// `(fd, seconds?)`: the descriptor is writable, or the optional deadline passed.
    Writable,
    /// `(fd, seconds?)`: out-of-band data is pending, or the optional deadline passed.
    Exception,
    /// `(seconds)`
    Timeout,
    /// `(signal)`: the signal frame hook.
    Signal,
    /// `(pid)`: a child process exited.
    Child,
    /// `(token)`: a [`Notifier`](crate::Notifier) fired.
    Notify,
    /// `(lambda, args...)`: another lambda finished.
    Tail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Fd,
    Seconds,
    Signal,
    Pid,
    Token,
    Lambda,
}

impl Shape {
    fn name(self) -> &'static str {
        match self {
            Shape::Fd => "fd",
            Shape::Seconds => "seconds",
            Shape::Signal => "signal",
            Shape::Pid => "pid",
            Shape::Token => "token",
            Shape::Lambda => "lambda",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Shape::Fd => matches!(value, Value::Fd(fd) if *fd >= 0),
            Shape::Seconds => value.as_duration().is_some(),
            Shape::Signal => signal_number(value).is_some(),
            Shape::Pid => pid(value).is_some(),
            Shape::Token => matches!(value, Value::Token(_)),
            Shape::Lambda => matches!(value, Value::Lambda(_)),
        }
    }
}

struct Signature {
    required: &'static [Shape],
    optional: &'static [Shape],
    rest: bool,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.required.iter().map(|s| s.name().to_owned()).collect();
        parts.extend(self.optional.iter().map(|s| format!("{}?", s.name())));
        if self.rest {
            parts.push("...".to_owned());
        }
        f.write_str(&parts.join(", "))
    }
}

impl Signature {
    fn matches(&self, tuple: &[Value]) -> bool {
        let min = self.required.len();
        let max = min + self.optional.len();

        if tuple.len() < min || (!self.rest && tuple.len() > max) {
            return false;
        }

        let shapes = self.required.iter().chain(self.optional.iter());
        tuple.iter().zip(shapes).all(|(value, shape)| shape.accepts(value))
    }
}

/// What a predicate call resolves to once its context has been validated.
pub(crate) enum Binding {
    Condition(Condition),
    Tail { other: Lambda, args: Values },
}

impl Predicate {
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Readable => "readable",
            Predicate::Writable => "writable",
            Predicate::Exception => "exception",
            Predicate::Timeout => "timeout",
            Predicate::Signal => "signal",
            Predicate::Child => "child",
            Predicate::Notify => "notify",
            Predicate::Tail => "tail",
        }
    }

    fn signature(&self) -> Signature {
        const IO: Signature = Signature {
            required: &[Shape::Fd],
            optional: &[Shape::Seconds],
            rest: false,
        };

        match self {
            Predicate::Readable | Predicate::Writable | Predicate::Exception => IO,
            Predicate::Timeout => exactly(&[Shape::Seconds]),
            Predicate::Signal => exactly(&[Shape::Signal]),
            Predicate::Child => exactly(&[Shape::Pid]),
            Predicate::Notify => exactly(&[Shape::Token]),
            Predicate::Tail => Signature {
                required: &[Shape::Lambda],
                optional: &[],
                rest: true,
            },
        }
    }

    /// Checks a context tuple against this predicate's signature.
    pub fn validate(&self, tuple: &[Value]) -> Result<()> {
        if self.signature().matches(tuple) {
            Ok(())
        } else {
            Err(self.mismatch(tuple))
        }
    }

    fn mismatch(&self, tuple: &[Value]) -> Error {
        let found: Vec<&str> = tuple.iter().map(Value::type_name).collect();
        Error::Config {
            predicate: self.name(),
            expected: self.signature().to_string(),
            found: found.join(", "),
        }
    }

    pub(crate) fn bind(&self, tuple: &[Value]) -> Result<Binding> {
        self.validate(tuple)?;

        let binding = match (self, tuple) {
            (Predicate::Readable, [Value::Fd(fd), rest @ ..]) => {
                Binding::Condition(Condition::io(*fd, Kind::Readable, deadline(rest)))
            }
            (Predicate::Writable, [Value::Fd(fd), rest @ ..]) => {
                Binding::Condition(Condition::io(*fd, Kind::Writable, deadline(rest)))
            }
            (Predicate::Exception, [Value::Fd(fd), rest @ ..]) => {
                Binding::Condition(Condition::io(*fd, Kind::Exceptional, deadline(rest)))
            }
            (Predicate::Timeout, [after]) => {
                Binding::Condition(Condition::timeout(after.as_duration().unwrap_or_default()))
            }
            (Predicate::Signal, [signum]) => {
                Binding::Condition(Condition::signal(signal_number(signum).unwrap_or_default()))
            }
            (Predicate::Child, [child]) => {
                Binding::Condition(Condition::child(pid(child).unwrap_or_default()))
            }
            (Predicate::Notify, [Value::Token(token)]) => {
                Binding::Condition(Condition::notify(*token))
            }
            (Predicate::Tail, [Value::Lambda(other), args @ ..]) => Binding::Tail {
                other: other.clone(),
                args: args.to_vec(),
            },
            _ => return Err(self.mismatch(tuple)),
        };

        Ok(binding)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn exactly(required: &'static [Shape]) -> Signature {
    Signature {
        required,
        optional: &[],
        rest: false,
    }
}

fn deadline(rest: &[Value]) -> Option<Duration> {
    rest.first().and_then(Value::as_duration)
}

fn signal_number(value: &Value) -> Option<i32> {
    match value {
        Value::Signal(n) if (1..=64).contains(n) => Some(*n),
        Value::Int(n) if (1..=64).contains(n) => Some(*n as i32),
        _ => None,
    }
}

fn pid(value: &Value) -> Option<i32> {
    match value {
        Value::Pid(p) if *p > 0 => Some(*p),
        Value::Int(p) if *p > 0 && *p <= i64::from(i32::MAX) => Some(*p as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::condition::Resource;

    #[test]
    fn io_predicates_take_an_optional_deadline() {
        let Binding::Condition(condition) = Predicate::Readable
            .bind(&[Value::Fd(4), Value::Float(0.5)])
            .unwrap()
        else {
            panic!("expected a condition");
        };

        assert_eq!(condition.resource, Resource::Fd(4));
        assert_eq!(condition.kind, Kind::Readable);
        assert_eq!(condition.after, Some(Duration::from_millis(500)));

        assert!(Predicate::Writable.validate(&[Value::Fd(4)]).is_ok());
    }

    #[test]
    fn empty_context_is_a_config_error() {
        let err = Predicate::Readable.validate(&[]).unwrap_err();
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "predicate `readable` expects context (fd, seconds?), got ()"
        );
    }

    #[test]
    fn wrong_types_and_arity_are_rejected() {
        assert!(Predicate::Readable.validate(&[Value::Int(3)]).is_err());
        assert!(Predicate::Readable.validate(&[Value::Fd(-1)]).is_err());
        assert!(
            Predicate::Writable
                .validate(&[Value::Fd(1), Value::Int(1), Value::Int(2)])
                .is_err()
        );
        assert!(Predicate::Timeout.validate(&[Value::Int(-1)]).is_err());
        assert!(Predicate::Signal.validate(&[Value::Int(0)]).is_err());
        assert!(Predicate::Child.validate(&[Value::Pid(0)]).is_err());
        assert!(Predicate::Notify.validate(&[Value::Int(1)]).is_err());
        assert!(Predicate::Tail.validate(&[Value::Nil]).is_err());
    }

    #[test]
    fn signal_accepts_plain_integers() {
        let Binding::Condition(condition) = Predicate::Signal.bind(&[Value::Int(10)]).unwrap()
        else {
            panic!("expected a condition");
        };
        assert_eq!(condition.resource, Resource::Signal(10));
    }
}
