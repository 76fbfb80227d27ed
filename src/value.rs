//! Dynamically shaped values carried by context tuples, callback arguments and results.

use crate::lambda::Lambda;

use std::os::unix::io::RawFd;
use std::time::Duration;

/// An ordered tuple of values: a context frame, a callback's arguments or a lambda's result.
pub type Values = Vec<Value>;

/// One element of a context tuple or of a result.
///
/// Predicates validate the variants they receive (see
/// [`Predicate`](crate::Predicate)), so the typed variants (`Fd`, `Signal`, `Pid`, `Token`)
/// are what tells a predicate which resource to watch.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Fd(RawFd),
    Duration(Duration),
    Signal(i32),
    Pid(i32),
    Token(u64),
    /// An OS error code delivered alongside an event.
    Errno(i32),
    Lambda(Lambda),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Fd(_) => "fd",
            Value::Duration(_) => "duration",
            Value::Signal(_) => "signal",
            Value::Pid(_) => "pid",
            Value::Token(_) => "token",
            Value::Errno(_) => "errno",
            Value::Lambda(_) => "lambda",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_fd(&self) -> Option<RawFd> {
        match self {
            Value::Fd(fd) => Some(*fd),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_errno(&self) -> Option<i32> {
        match self {
            Value::Errno(code) => Some(*code),
            _ => None,
        }
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Value::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    /// Interprets the value as a relative duration, accepting whole or fractional seconds.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Duration(d) => Some(*d),
            Value::Int(secs) if *secs >= 0 => Some(Duration::from_secs(*secs as u64)),
            Value::Float(secs) => Duration::try_from_secs_f64(*secs).ok(),
            _ => None,
        }
    }
}

/// Finds the first [`Value::Errno`] in a tuple, if any.
pub fn errno_of(values: &[Value]) -> Option<i32> {
    values.iter().find_map(Value::as_errno)
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<Lambda> for Value {
    fn from(lambda: Lambda) -> Self {
        Value::Lambda(lambda)
    }
}

impl From<&Lambda> for Value {
    fn from(lambda: &Lambda) -> Self {
        Value::Lambda(lambda.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_seconds_in_several_forms() {
        assert_eq!(Value::Int(2).as_duration(), Some(Duration::from_secs(2)));
        assert_eq!(
            Value::Float(0.25).as_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(Value::Int(-1).as_duration(), None);
        assert_eq!(Value::Float(f64::NAN).as_duration(), None);
        assert_eq!(Value::Str("1".into()).as_duration(), None);
    }

    #[test]
    fn errno_is_found_anywhere_in_the_tuple() {
        let values = vec![Value::Bool(true), Value::Errno(libc::EPIPE)];
        assert_eq!(errno_of(&values), Some(libc::EPIPE));
        assert_eq!(errno_of(&[Value::Bool(true)]), None);
    }
}
