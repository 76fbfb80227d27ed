//! Thread-local current reactor.
//!
//! Lambdas created without an explicit reactor bind to the current one when first activated.
//! Each thread lazily gets a default reactor; [`enter`] scopes another one as current, which is
//! how tests and embedders run isolated reactors without passing handles around.

use crate::error::Result;
use crate::reactor::core::Reactor;

use std::cell::RefCell;

thread_local! {
    /// Reactor entered with [`enter`], if any.
    static CURRENT_REACTOR: RefCell<Option<Reactor>> = const { RefCell::new(None) };

    /// The thread's default reactor, created on first use and kept for the thread's lifetime.
    static DEFAULT_REACTOR: RefCell<Option<Reactor>> = const { RefCell::new(None) };
}

/// Makes `reactor` current for the duration of `function`. The previous one is restored on
/// exit, so calls nest.
///
/// # Arguments
/// * `reactor` - Reactor that `Lambda::new` and the helper lambdas bind to inside `function`
/// * `function` - Closure to run with the reactor entered
///
/// # Returns
/// Whatever `function` returns
///
/// # Example
///
/// ```ignore
/// let reactor = ReactorBuilder::new().build()?;
/// let result = iolambda::runtime::enter(&reactor, || time::sleep(Duration::ZERO).wait(vec![]))?;
/// ```
pub fn enter<F, R>(reactor: &Reactor, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT_REACTOR.with(|current| current.borrow_mut().replace(reactor.clone()));

    // Restores the outer reactor even if `function` unwinds.
    struct Restore(Option<Reactor>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT_REACTOR.with(|current| *current.borrow_mut() = previous);
        }
    }

    let _restore = Restore(previous);
    function()
}

/// The entered reactor, or the thread's default one.
pub(crate) fn current_reactor() -> Result<Reactor> {
    if let Some(reactor) = CURRENT_REACTOR.with(|current| current.borrow().clone()) {
        return Ok(reactor);
    }

    DEFAULT_REACTOR.with(|default| {
        let mut default = default.borrow_mut();
        if let Some(reactor) = default.as_ref() {
            return Ok(reactor.clone());
        }

        let reactor = Reactor::new()?;
        tracing::debug!("default reactor created for this thread");
        *default = Some(reactor.clone());
        Ok(reactor)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_scopes_and_restores() {
        let outer = Reactor::new().unwrap();
        let inner = Reactor::new().unwrap();

        enter(&outer, || {
            assert!(current_reactor().unwrap().ptr_eq(&outer));
            enter(&inner, || {
                assert!(current_reactor().unwrap().ptr_eq(&inner));
            });
            assert!(current_reactor().unwrap().ptr_eq(&outer));
        });
    }

    #[test]
    fn default_reactor_is_reused() {
        let first = current_reactor().unwrap();
        let second = current_reactor().unwrap();
        assert!(first.ptr_eq(&second));
    }
}
