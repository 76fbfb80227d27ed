//! The lambda state machine.
//!
//! A [`Lambda`] is a suspended computation: one initialization callback plus the conditions
//! it is currently waiting on. Activating it runs the callback, which registers conditions
//! through predicates; every fired condition resumes the lambda by running the callback that
//! registered it. Once nothing is outstanding the lambda is Finished and its result is the
//! value returned by the last callback that ran.
//!
//! ```text
//! Passive --call--> Running --last condition done--> Finished --call--> Running
//!                      |
//!                      +--cancel / callback error--> Cancelled --call--> Running
//! ```

pub mod compose;
pub mod context;
pub mod predicate;

pub use context::ContextStack;
pub use predicate::Predicate;

use crate::error::{Error, Result};
use crate::reactor::condition::ConditionId;
use crate::reactor::core::{Outcome, Reactor};
use crate::value::{Value, Values};
use predicate::Binding;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

static NEXT_LAMBDA: AtomicU64 = AtomicU64::new(1);

/// Identity of a lambda, unique for the whole process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LambdaId(u64);

impl LambdaId {
    fn next() -> Self {
        Self(NEXT_LAMBDA.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LambdaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "λ{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Created, never activated.
    Passive,
    Running,
    Finished,
    /// Cancelled explicitly, by a failing callback or by a fatal reactor error. Has no result.
    Cancelled,
}

pub(crate) type LambdaCell = RefCell<Inner>;

type Callback = Rc<RefCell<dyn FnMut(&Lambda, Values) -> Result<Values>>>;

/// Everything needed to register a condition again: the predicate, the tuple it was bound
/// from and the callback to run.
///
/// `context` is the tuple that was current on the stack at registration. It differs from
/// `tuple` for predicates that take their arguments directly, like `timeout` and `tail`.
#[derive(Clone)]
struct Pending {
    predicate: Predicate,
    tuple: Values,
    context: Values,
    callback: Callback,
    repeat: bool,
}

struct Outstanding {
    pending: Pending,
    /// The awaited lambda of a tail condition. Held strongly: the composing lambda owns what
    /// it needs to read the result, the awaited one only keeps a weak waiter back.
    target: Option<Lambda>,
}

struct Waiter {
    lambda: Weak<LambdaCell>,
    condition: ConditionId,
}

/// The condition whose callback is running, kept so `again` can re-register it.
struct LastFired {
    id: ConditionId,
    pending: Pending,
    rearmed: bool,
    stopped: bool,
}

pub(crate) struct Inner {
    id: LambdaId,
    reactor: Option<Reactor>,
    state: State,
    init: Callback,
    outstanding: BTreeMap<ConditionId, Outstanding>,
    result: Values,
    waiters: Vec<Waiter>,
    call_args: Values,
    context: ContextStack,
    last: Option<LastFired>,
    // Callbacks of this lambda currently on the stack.
    busy: u32,
}

/// A composable suspended computation.
///
/// Cloning a `Lambda` clones the handle; all clones drive the same state machine.
///
/// ```ignore
/// let lambda = Lambda::new(|this, _| {
///     this.context(vec![Value::Fd(fd)]).readable(|_, args| Ok(args))?;
///     Ok(vec![])
/// });
/// let result = lambda.wait(vec![])?;
/// ```
#[derive(Clone)]
pub struct Lambda(pub(crate) Rc<LambdaCell>);

impl Lambda {
    /// Creates a Passive lambda bound to the thread's current reactor at activation.
    pub fn new<F>(init: F) -> Self
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        Self::build(None, init)
    }

    /// Creates a Passive lambda driven by `reactor`.
    pub fn with_reactor<F>(reactor: &Reactor, init: F) -> Self
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        Self::build(Some(reactor.clone()), init)
    }

    pub(crate) fn build<F>(reactor: Option<Reactor>, init: F) -> Self
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        Self(Rc::new(RefCell::new(Inner {
            id: LambdaId::next(),
            reactor,
            state: State::Passive,
            init: Rc::new(RefCell::new(init)),
            outstanding: BTreeMap::new(),
            result: Vec::new(),
            waiters: Vec::new(),
            call_args: Vec::new(),
            context: ContextStack::new(),
            last: None,
            busy: 0,
        })))
    }

    pub(crate) fn from_cell(cell: Rc<LambdaCell>) -> Self {
        Self(cell)
    }

    /// Process-unique identifier, used in logs.
    pub fn id(&self) -> LambdaId {
        self.0.borrow().id
    }

    /// Current lifecycle state.
    ///
    /// # Example
    /// ```ignore
    /// let lambda = Lambda::new(|_, args| Ok(args));
    /// assert_eq!(lambda.state(), State::Passive);
    /// lambda.call(vec![])?;
    /// assert_eq!(lambda.state(), State::Finished);
    /// ```
    pub fn state(&self) -> State {
        self.0.borrow().state
    }

    pub fn is_passive(&self) -> bool {
        self.state() == State::Passive
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state() == State::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == State::Cancelled
    }

    /// The current result, without driving the reactor.
    pub fn peek(&self) -> Values {
        self.0.borrow().result.clone()
    }

    /// Arguments of the most recent `call` or `wait`.
    pub fn call_args(&self) -> Values {
        self.0.borrow().call_args.clone()
    }

    /// Number of conditions (including pending compositions) the lambda waits on.
    pub fn outstanding(&self) -> usize {
        self.0.borrow().outstanding.len()
    }

    /// The reactor driving this lambda, binding the thread's current one if none was given.
    pub(crate) fn reactor(&self) -> Result<Reactor> {
        if let Some(reactor) = self.0.borrow().reactor.clone() {
            return Ok(reactor);
        }

        let reactor = Reactor::current()?;
        self.0.borrow_mut().reactor = Some(reactor.clone());
        Ok(reactor)
    }

    pub(crate) fn bound_reactor(&self) -> Option<Reactor> {
        self.0.borrow().reactor.clone()
    }

    fn adopt(&self, reactor: &Reactor) {
        let mut inner = self.0.borrow_mut();
        if inner.reactor.is_none() {
            inner.reactor = Some(reactor.clone());
        }
    }

    /// Activates the lambda.
    ///
    /// A Running lambda only records `args` for its next activation. Any other state
    /// (re)starts it: the result and context are reset and the initialization callback runs
    /// with `args`. An error from the callback cancels the lambda and is returned.
    pub fn call(&self, args: Values) -> Result<()> {
        if self.is_running() {
            self.0.borrow_mut().call_args = args;
            return Ok(());
        }

        self.reactor()?;

        let init = {
            let mut inner = self.0.borrow_mut();
            inner.state = State::Running;
            inner.result.clear();
            inner.context.clear();
            inner.last = None;
            inner.call_args = args.clone();
            inner.busy += 1;
            inner.init.clone()
        };
        debug!(lambda = %self.id(), "started");

        let outcome = invoke(&init, self, args);
        self.0.borrow_mut().busy -= 1;

        self.conclude(outcome)
    }

    pub(crate) fn set_call_args(&self, args: Values) {
        self.0.borrow_mut().call_args = args;
    }

    /// Delivers a fired condition. Unknown ids and non-running lambdas are ignored, which is
    /// what keeps a cancelled lambda from ever resuming.
    pub(crate) fn fire(&self, id: ConditionId, outcome: Outcome) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.state != State::Running {
            return Ok(());
        }
        let Some(entry) = inner.outstanding.remove(&id) else {
            return Ok(());
        };

        let args = match outcome {
            Outcome::Fire(args) => args,
            Outcome::Release => {
                trace!(lambda = %inner.id, condition = %id, "awaited lambda cancelled, released");
                drop(inner);
                self.settle();
                return Ok(());
            }
        };

        let pending = entry.pending;
        trace!(lambda = %inner.id, condition = %id, predicate = %pending.predicate, "resumed");

        inner.context.inherit(pending.context.clone());
        if pending.predicate == Predicate::Tail {
            inner.context.push(args.clone());
        }
        let previous = inner.last.replace(LastFired {
            id,
            pending: pending.clone(),
            rearmed: false,
            stopped: false,
        });
        inner.busy += 1;
        drop(inner);

        let outcome = invoke(&pending.callback, self, args);

        let last = {
            let mut inner = self.0.borrow_mut();
            inner.busy -= 1;
            std::mem::replace(&mut inner.last, previous)
        };

        if outcome.is_ok() && pending.repeat && self.is_running() {
            let keep = last.is_some_and(|last| !last.rearmed && !last.stopped);
            if keep {
                if let Err(error) = self.arm(id, pending, true) {
                    self.cancel();
                    return Err(error);
                }
            }
        }

        self.conclude(outcome)
    }

    fn conclude(&self, outcome: Result<Values>) -> Result<()> {
        match outcome {
            Err(error) => {
                debug!(lambda = %self.id(), %error, "callback failed");
                self.cancel();
                Err(error)
            }
            Ok(values) => {
                {
                    let mut inner = self.0.borrow_mut();
                    // Terminated or cancelled from inside the callback.
                    if inner.state != State::Running {
                        return Ok(());
                    }
                    inner.result = values;
                }
                self.settle();
                Ok(())
            }
        }
    }

    // Finishes the lambda once nothing is outstanding and no callback is on the stack.
    fn settle(&self) {
        {
            let inner = self.0.borrow();
            if inner.busy > 0 || inner.state != State::Running || !inner.outstanding.is_empty() {
                return;
            }
        }
        self.finish();
    }

    fn finish(&self) {
        let (result, waiters) = {
            let mut inner = self.0.borrow_mut();
            inner.state = State::Finished;
            inner.context.clear();
            inner.last = None;
            (inner.result.clone(), std::mem::take(&mut inner.waiters))
        };

        debug!(lambda = %self.id(), waiters = waiters.len(), "finished");
        for waiter in waiters {
            deliver(waiter, Outcome::Fire(result.clone()));
        }
    }

    /// Unregisters everything outstanding and moves to Cancelled with no result.
    ///
    /// Lambdas waiting on this one through `tail` are released: their pending callback never
    /// runs. A no-op on Finished or Cancelled lambdas.
    pub fn cancel(&self) {
        if matches!(self.state(), State::Finished | State::Cancelled) {
            return;
        }

        self.detach();
        let waiters = {
            let mut inner = self.0.borrow_mut();
            inner.state = State::Cancelled;
            inner.result.clear();
            std::mem::take(&mut inner.waiters)
        };

        debug!(lambda = %self.id(), "cancelled");
        for waiter in waiters {
            deliver(waiter, Outcome::Release);
        }
    }

    /// Finishes a running lambda right away with `values` as its result, dropping whatever
    /// it still waits on.
    pub fn terminate(&self, values: Values) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        self.detach();
        self.0.borrow_mut().result = values;
        self.finish();

        Ok(())
    }

    // Drops every outstanding condition, both in the reactor and on awaited lambdas.
    fn detach(&self) {
        let (id, reactor, outstanding) = {
            let mut inner = self.0.borrow_mut();
            inner.context.clear();
            inner.last = None;
            (
                inner.id,
                inner.reactor.clone(),
                std::mem::take(&mut inner.outstanding),
            )
        };

        if let Some(reactor) = reactor {
            reactor.unregister_owner(id);
        }

        for (condition, entry) in outstanding {
            if let Some(target) = entry.target {
                target.remove_waiter(&self.0, condition);
            }
        }
    }

    fn remove_waiter(&self, waiter: &Rc<LambdaCell>, condition: ConditionId) {
        self.0.borrow_mut().waiters.retain(|w| {
            !(w.condition == condition && std::ptr::eq(w.lambda.as_ptr(), Rc::as_ptr(waiter)))
        });
    }

    /// Pushes a tuple onto the context stack; the next predicate call reads it.
    pub fn context(&self, values: Values) -> &Self {
        self.0.borrow_mut().context.push(values);
        self
    }

    /// The tuple the next predicate call would read.
    pub fn current_context(&self) -> Values {
        self.0.borrow().context.peek().to_vec()
    }

    pub fn pop_context(&self) -> Option<Values> {
        self.0.borrow_mut().context.pop()
    }

    /// Registers a one-shot condition for `predicate`, bound from the current context.
    pub fn watch<F>(&self, predicate: Predicate, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        let tuple = self.current_context();
        self.register(predicate, tuple, Rc::new(RefCell::new(callback)), false)
    }

    /// Like [`watch`](Self::watch), but the condition is re-armed after every fire until it is
    /// unwatched or the callback re-arms it itself.
    pub fn watch_repeat<F>(&self, predicate: Predicate, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        let tuple = self.current_context();
        self.register(predicate, tuple, Rc::new(RefCell::new(callback)), true)
    }

    /// Context `(fd, seconds?)`. The callback receives `[Bool(true)]` when the descriptor is
    /// readable (plus an `Errno` if the OS reported an error) or `[Bool(false)]` on deadline.
    pub fn readable<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Readable, callback)
    }

    /// Context `(fd, seconds?)`. Same deliveries as [`readable`](Self::readable), for write
    /// readiness.
    pub fn writable<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Writable, callback)
    }

    /// Context `(fd, seconds?)`. Fires on out-of-band data (`POLLPRI`).
    pub fn exception<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Exception, callback)
    }

    /// Context `(signal)`. Receives `[Signal(n)]`.
    pub fn signal<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Signal, callback)
    }

    /// Context `(pid)`. Receives `[Pid, Int(status)]`, or `[Pid, Errno]` when it cannot be reaped.
    pub fn child<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Child, callback)
    }

    /// Context `(token)`. Receives `[Token]`.
    pub fn notify<F>(&self, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        self.watch(Predicate::Notify, callback)
    }

    /// Runs `callback` with no arguments once `after` has elapsed.
    ///
    /// The duration is passed directly instead of through the context stack, so the callback
    /// inherits whatever tuple was current when it was registered. A duration too large to
    /// represent as a deadline never expires.
    ///
    /// # Example
    /// ```ignore
    /// lambda.context(vec![Value::Fd(fd)]);
    /// lambda.timeout(Duration::from_millis(50), |this, _| {
    ///     // Still sees `[Fd(fd)]`.
    ///     this.readable(|_, args| Ok(args))?;
    ///     Ok(vec![])
    /// })?;
    /// ```
    pub fn timeout<F>(&self, after: Duration, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        let tuple = vec![Value::Duration(after)];
        self.register(Predicate::Timeout, tuple, Rc::new(RefCell::new(callback)), false)
    }

    /// Suspends on `other`: activates it if Passive and runs `callback` with its result once
    /// it finishes. A Finished `other` delivers its current result on the next poll.
    ///
    /// The result arrives both as the callback's argument and as the current context frame,
    /// pushed on top of the tuple inherited from registration. Popping it with
    /// [`pop_context`](Self::pop_context) exposes that inherited tuple again.
    pub fn tail<F>(&self, other: &Lambda, callback: F) -> Result<ConditionId>
    where
        F: FnMut(&Lambda, Values) -> Result<Values> + 'static,
    {
        let tuple = vec![Value::Lambda(other.clone())];
        self.register(Predicate::Tail, tuple, Rc::new(RefCell::new(callback)), false)
    }

    /// Re-registers the condition whose callback is running, with the same callback.
    ///
    /// Returns the same id. A tail re-armed this way restarts the awaited lambda.
    pub fn again(&self) -> Result<ConditionId> {
        let (id, pending) = {
            let mut inner = self.0.borrow_mut();
            if inner.state != State::Running {
                return Err(Error::NotRunning);
            }
            let Some(last) = inner.last.as_mut() else {
                return Err(Error::NothingToRearm);
            };
            if last.rearmed {
                return Ok(last.id);
            }
            last.rearmed = true;
            last.stopped = false;
            (last.id, last.pending.clone())
        };

        self.arm(id, pending, true)
    }

    /// Drops one outstanding condition. Called from the callback of a repeating condition
    /// with that condition's id, it stops the repetition.
    ///
    /// Returns false if there was nothing to drop.
    pub fn unwatch(&self, id: ConditionId) -> bool {
        let (entry, reactor, stopped) = {
            let mut inner = self.0.borrow_mut();
            let stopped = match inner.last.as_mut().filter(|last| last.id == id) {
                Some(last) => {
                    last.stopped = true;
                    last.rearmed = false;
                    last.pending.repeat
                }
                None => false,
            };
            (inner.outstanding.remove(&id), inner.reactor.clone(), stopped)
        };

        let Some(entry) = entry else {
            return stopped;
        };

        match entry.target {
            Some(target) => target.remove_waiter(&self.0, id),
            None => {
                if let Some(reactor) = reactor {
                    reactor.unregister(id);
                }
            }
        }
        trace!(lambda = %self.id(), condition = %id, "unwatched");

        self.settle();
        true
    }

    fn register(
        &self,
        predicate: Predicate,
        tuple: Values,
        callback: Callback,
        repeat: bool,
    ) -> Result<ConditionId> {
        let pending = Pending {
            predicate,
            tuple,
            context: self.current_context(),
            callback,
            repeat,
        };
        self.arm(ConditionId::next(), pending, false)
    }

    // Validates first, so a malformed context fails even outside a running lambda.
    fn arm(&self, id: ConditionId, pending: Pending, restart: bool) -> Result<ConditionId> {
        let binding = pending.predicate.bind(&pending.tuple)?;

        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        match binding {
            Binding::Condition(condition) => {
                let reactor = self.reactor()?;
                let replaced = reactor.register(Rc::downgrade(&self.0), self.id(), id, condition)?;

                let mut inner = self.0.borrow_mut();
                if let Some(old) = replaced {
                    inner.outstanding.remove(&old);
                }
                inner.outstanding.insert(
                    id,
                    Outstanding {
                        pending,
                        target: None,
                    },
                );
            }
            Binding::Tail { other, args } => self.attach(id, pending, other, args, restart)?,
        }

        Ok(id)
    }

    fn attach(
        &self,
        id: ConditionId,
        pending: Pending,
        other: Lambda,
        args: Values,
        restart: bool,
    ) -> Result<()> {
        if Rc::ptr_eq(&self.0, &other.0) {
            return Err(Error::SelfComposition);
        }

        let state = other.state();
        if state == State::Cancelled {
            return Err(Error::Cancelled);
        }

        let reactor = self.reactor()?;
        if other.bound_reactor().is_some_and(|theirs| !theirs.ptr_eq(&reactor)) {
            debug!(lambda = %self.id(), awaited = %other.id(), "awaited lambda is driven by another reactor");
        }

        // One composition per awaited lambda: a second tail replaces the first.
        let replaced: Vec<ConditionId> = self
            .0
            .borrow()
            .outstanding
            .iter()
            .filter(|(_, entry)| entry.target.as_ref().is_some_and(|t| Rc::ptr_eq(&t.0, &other.0)))
            .map(|(id, _)| *id)
            .collect();
        for old in replaced {
            self.0.borrow_mut().outstanding.remove(&old);
            other.remove_waiter(&self.0, old);
        }

        self.0.borrow_mut().outstanding.insert(
            id,
            Outstanding {
                pending,
                target: Some(other.clone()),
            },
        );

        let waiter = Waiter {
            lambda: Rc::downgrade(&self.0),
            condition: id,
        };

        match state {
            State::Finished if !restart => {
                reactor.schedule(Rc::downgrade(&self.0), id, Outcome::Fire(other.peek()));
            }
            State::Running => other.0.borrow_mut().waiters.push(waiter),
            _ => {
                other.adopt(&reactor);
                other.0.borrow_mut().waiters.push(waiter);
                other.call(args)?;
            }
        }

        trace!(lambda = %self.id(), awaited = %other.id(), condition = %id, "tail attached");
        Ok(())
    }
}

fn invoke(callback: &Callback, lambda: &Lambda, args: Values) -> Result<Values> {
    let mut callback = callback.try_borrow_mut().map_err(|_| Error::Reentrant)?;
    (&mut *callback)(lambda, args)
}

fn deliver(waiter: Waiter, outcome: Outcome) {
    let Some(cell) = waiter.lambda.upgrade() else {
        return;
    };

    let reactor = cell.borrow().reactor.clone();
    if let Some(reactor) = reactor {
        reactor.schedule(waiter.lambda, waiter.condition, outcome);
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(inner) => f
                .debug_struct("Lambda")
                .field("id", &inner.id)
                .field("state", &inner.state)
                .field("outstanding", &inner.outstanding.len())
                .finish(),
            Err(_) => f.write_str("Lambda { <busy> }"),
        }
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
