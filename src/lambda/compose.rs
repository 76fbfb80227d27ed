//! Combinators over several lambdas, built on `tail`.

use crate::lambda::Lambda;
use crate::reactor::condition::ConditionId;
use crate::value::Values;

use std::cell::RefCell;
use std::rc::Rc;

/// A lambda that finishes once every input has finished. Its result is the concatenation of
/// the inputs' results in argument order.
///
/// An input that gets cancelled contributes nothing.
pub fn join_all(lambdas: Vec<Lambda>) -> Lambda {
    let reactor = lambdas.iter().find_map(Lambda::bound_reactor);

    Lambda::build(reactor, move |this, _| {
        let results: Rc<RefCell<Vec<Option<Values>>>> =
            Rc::new(RefCell::new(vec![None; lambdas.len()]));

        for (index, lambda) in lambdas.iter().enumerate() {
            let results = results.clone();
            this.tail(lambda, move |_, values| {
                let mut results = results.borrow_mut();
                results[index] = Some(values);
                Ok(results.iter().flatten().flatten().cloned().collect())
            })?;
        }

        Ok(Vec::new())
    })
}

/// A lambda that finishes with the result of whichever input finishes first; the others are
/// cancelled.
pub fn first_of(lambdas: Vec<Lambda>) -> Lambda {
    let reactor = lambdas.iter().find_map(Lambda::bound_reactor);
    let lambdas = Rc::new(lambdas);

    Lambda::build(reactor, move |this, _| {
        let ids: Rc<RefCell<Vec<ConditionId>>> = Rc::new(RefCell::new(Vec::new()));

        for (index, lambda) in lambdas.iter().enumerate() {
            let ids_for_callback = ids.clone();
            let lambdas = lambdas.clone();

            let id = this.tail(lambda, move |this, values| {
                for id in ids_for_callback.borrow().iter() {
                    this.unwatch(*id);
                }
                for (other, lambda) in lambdas.iter().enumerate() {
                    if other != index {
                        lambda.cancel();
                    }
                }
                Ok(values)
            })?;

            ids.borrow_mut().push(id);
        }

        Ok(Vec::new())
    })
}
