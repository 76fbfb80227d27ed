//! Timer lambdas.

use crate::lambda::Lambda;
use crate::reactor::condition::ConditionId;
use crate::value::Value;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A lambda that finishes with an empty result once `duration` has elapsed.
///
/// # Example
/// ```ignore
/// time::sleep(Duration::from_millis(50)).wait(vec![])?;
/// ```
pub fn sleep(duration: Duration) -> Lambda {
    Lambda::new(move |this, _| {
        this.timeout(duration, |_, _| Ok(Vec::new()))?;
        Ok(Vec::new())
    })
}

/// Runs `inner` with a deadline.
///
/// Finishes with `inner`'s result if it finishes within `limit`. Otherwise `inner` is
/// cancelled and the result is `[Errno(ETIMEDOUT)]`.
pub fn timeout(limit: Duration, inner: Lambda) -> Lambda {
    let reactor = inner.bound_reactor();

    Lambda::build(reactor, move |this, _| {
        let timer: Rc<Cell<Option<ConditionId>>> = Rc::new(Cell::new(None));
        let tail: Rc<Cell<Option<ConditionId>>> = Rc::new(Cell::new(None));

        let tail_id = this.tail(&inner, {
            let timer = timer.clone();
            move |this, values| {
                if let Some(id) = timer.get() {
                    this.unwatch(id);
                }
                Ok(values)
            }
        })?;
        tail.set(Some(tail_id));

        let timer_id = this.timeout(limit, {
            let inner = inner.clone();
            move |this, _| {
                if let Some(id) = tail.get() {
                    this.unwatch(id);
                }
                inner.cancel();
                Ok(vec![Value::Errno(libc::ETIMEDOUT)])
            }
        })?;
        timer.set(Some(timer_id));

        Ok(Vec::new())
    })
}
