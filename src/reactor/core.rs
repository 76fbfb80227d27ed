use crate::builder::Config;
use crate::error::{Error, Result};
use crate::lambda::{Lambda, LambdaCell, LambdaId};
use crate::reactor::condition::{Condition, ConditionId, Kind, Resource};
use crate::reactor::notify::{Notifier, WakePipe};
use crate::reactor::poller::{Interest, Poller, Readiness};
use crate::reactor::signal;
use crate::reactor::timer::TimerQueue;
use crate::value::{Value, Values};

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

/// What a dispatched condition delivers to its owner.
pub(crate) enum Outcome {
    /// Run the condition's callback with these arguments.
    Fire(Values),
    /// Drop the condition without running its callback (the awaited lambda was cancelled).
    Release,
}

pub(crate) struct Fired {
    pub(crate) owner: Weak<LambdaCell>,
    pub(crate) id: ConditionId,
    pub(crate) outcome: Outcome,
}

struct Entry {
    owner: Weak<LambdaCell>,
    owner_id: LambdaId,
    condition: Condition,
    deadline: Option<Instant>,
}

pub(crate) struct ReactorCore {
    poller: Box<dyn Poller>,
    config: Config,
    conditions: HashMap<ConditionId, Entry>,
    keys: HashMap<(Resource, Kind, LambdaId), ConditionId>,
    owners: HashMap<LambdaId, BTreeSet<ConditionId>>,
    read_set: BTreeMap<RawFd, Vec<ConditionId>>,
    write_set: BTreeMap<RawFd, Vec<ConditionId>>,
    except_set: BTreeMap<RawFd, Vec<ConditionId>>,
    timers: TimerQueue,
    signal_table: BTreeMap<i32, Vec<ConditionId>>,
    children: BTreeMap<i32, Vec<ConditionId>>,
    notify: BTreeMap<u64, Vec<ConditionId>>,
    completed: BTreeSet<u64>,
    next_token: u64,
    wake: WakePipe,
    signal_fd: Option<RawFd>,
    ready: VecDeque<Fired>,
    events: Vec<Readiness>,
    dispatching: usize,
    released: BTreeSet<i32>,
}

/// Handle to a reactor: the event multiplexer that owns every outstanding condition.
///
/// A reactor is single-threaded (`!Send`); cloning the handle is cheap and every clone drives
/// the same state. Each thread gets a default reactor on first use (see
/// [`Reactor::current`]); tests and embedders can build isolated ones with
/// [`ReactorBuilder`](crate::ReactorBuilder).
#[derive(Clone)]
pub struct Reactor {
    core: Rc<RefCell<ReactorCore>>,
}

impl Reactor {
    /// Builds a reactor with the default configuration.
    pub fn new() -> Result<Self> {
        crate::ReactorBuilder::new().build()
    }

    /// The reactor bound to the current thread, created with the defaults on first use.
    ///
    /// Inside [`runtime::enter`](crate::runtime::enter) this is the entered reactor.
    pub fn current() -> Result<Self> {
        crate::runtime::context::current_reactor()
    }

    /// Polls until nothing is left to wait for.
    pub fn run(&self) -> Result<()> {
        loop {
            match self.poll() {
                Ok(_) => {}
                Err(Error::NothingToWait) => return Ok(()),
                Err(error) => return Err(error),
            }
        }
    }

    pub(crate) fn with_config(config: Config, mut poller: Box<dyn Poller>) -> Result<Self> {
        let wake = WakePipe::new()?;
        poller.register(wake.fd(), Interest::READABLE)?;

        debug!(
            signals = config.signals,
            child_poll_interval = ?config.child_poll_interval,
            "reactor created"
        );

        Ok(Self {
            core: Rc::new(RefCell::new(ReactorCore {
                poller,
                config,
                conditions: HashMap::new(),
                keys: HashMap::new(),
                owners: HashMap::new(),
                read_set: BTreeMap::new(),
                write_set: BTreeMap::new(),
                except_set: BTreeMap::new(),
                timers: TimerQueue::new(),
                signal_table: BTreeMap::new(),
                children: BTreeMap::new(),
                notify: BTreeMap::new(),
                completed: BTreeSet::new(),
                next_token: 1,
                wake,
                signal_fd: None,
                ready: VecDeque::new(),
                events: Vec::with_capacity(64),
                dispatching: 0,
                released: BTreeSet::new(),
            })),
        })
    }

    /// Registers `condition` under `id` on behalf of `owner`.
    ///
    /// Re-registering a live id replaces it in place. When the owner already had a different
    /// live condition for the same resource and kind, that one is dropped and its id returned.
    pub(crate) fn register(
        &self,
        owner: Weak<LambdaCell>,
        owner_id: LambdaId,
        id: ConditionId,
        condition: Condition,
    ) -> Result<Option<ConditionId>> {
        self.core.borrow_mut().register(owner, owner_id, id, condition)
    }

    /// Removes one condition. Unknown ids are ignored.
    pub(crate) fn unregister(&self, id: ConditionId) {
        self.core.borrow_mut().remove_entry(id);
    }

    /// Removes every condition owned by `owner`.
    pub(crate) fn unregister_owner(&self, owner: LambdaId) -> usize {
        let mut core = self.core.borrow_mut();
        let ids = core.owners.remove(&owner).unwrap_or_default();
        let count = ids.len();
        for id in ids {
            core.remove_entry(id);
        }
        trace!(lambda = %owner, count, "owner unregistered");
        count
    }

    /// Queues an outcome for dispatch on the next [`poll`](Self::poll), which then does not block.
    pub(crate) fn schedule(&self, owner: Weak<LambdaCell>, id: ConditionId, outcome: Outcome) {
        self.core
            .borrow_mut()
            .ready
            .push_back(Fired { owner, id, outcome });
    }

    /// Creates a notifier whose token can be awaited with the `Notify` predicate.
    pub fn notifier(&self) -> Notifier {
        let mut core = self.core.borrow_mut();
        let token = core.next_token;
        core.next_token += 1;
        core.wake.notifier(token)
    }

    /// Number of conditions the reactor is currently watching.
    pub fn pending(&self) -> usize {
        self.core.borrow().conditions.len()
    }

    /// True when nothing is registered and nothing is queued for dispatch.
    pub fn is_idle(&self) -> bool {
        let core = self.core.borrow();
        core.conditions.is_empty() && core.ready.is_empty()
    }

    pub(crate) fn ptr_eq(&self, other: &Reactor) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Runs one poll iteration: waits for the earliest of I/O readiness, a timer deadline, a
    /// signal or a completion, then dispatches everything that fired.
    ///
    /// Returns the number of dispatched conditions. Calling it with nothing registered is
    /// [`Error::NothingToWait`]. When several callbacks fail in one iteration the first error
    /// is returned and the rest are logged.
    pub fn poll(&self) -> Result<usize> {
        self.core.borrow_mut().dispatching += 1;
        let result = self.dispatch();

        let mut core = self.core.borrow_mut();
        core.dispatching -= 1;
        if core.dispatching == 0 {
            core.release_deferred_signals();
        }

        result
    }

    fn dispatch(&self) -> Result<usize> {
        let fired = self.core.borrow_mut().collect()?;
        let count = fired.len();
        let mut first_error = None;

        for Fired { owner, id, outcome } in fired {
            let Some(cell) = owner.upgrade() else {
                continue;
            };

            if let Err(error) = Lambda::from_cell(cell).fire(id, outcome) {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    warn!(%error, condition = %id, "callback failed after an earlier failure in the same poll");
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => f
                .debug_struct("Reactor")
                .field("conditions", &core.conditions.len())
                .field("timers", &core.timers.len())
                .field("ready", &core.ready.len())
                .finish(),
            Err(_) => f.write_str("Reactor { <polling> }"),
        }
    }
}

impl ReactorCore {
    fn register(
        &mut self,
        owner: Weak<LambdaCell>,
        owner_id: LambdaId,
        id: ConditionId,
        condition: Condition,
    ) -> Result<Option<ConditionId>> {
        self.remove_entry(id);

        if let Resource::Signal(signum) = condition.resource {
            if !self.config.signals {
                return Err(Error::FeatureDisabled {
                    feature: "signal",
                    hint: "ReactorBuilder::enable_signals()",
                });
            }

            if let Err(error) = self.watch_signal(signum) {
                // Resource errors belong to the callback, not to the registering caller.
                self.ready.push_back(Fired {
                    owner,
                    id,
                    outcome: Outcome::Fire(vec![Value::Signal(signum), errno(&error)]),
                });
                return Ok(None);
            }
        }

        let replaced = match condition.resource {
            Resource::Timer | Resource::Lambda(_) => None,
            resource => self.keys.insert((resource, condition.kind, owner_id), id),
        };
        if let Some(old) = replaced {
            self.remove_entry(old);
        }

        // A deadline past what `Instant` can represent never expires.
        let deadline = condition
            .after
            .and_then(|after| Instant::now().checked_add(after));
        if condition.after.is_some() && deadline.is_none() {
            trace!(condition = %id, "deadline out of range, never expires");
        }
        if let Some(deadline) = deadline {
            self.timers.insert(id, deadline);
        }

        let mut rejected = None;
        match condition.resource {
            Resource::Fd(fd) => {
                if let Some(set) = self.set_for(condition.kind) {
                    set.entry(fd).or_default().push(id);
                }
                rejected = self.sync_interest(fd).err();
            }
            Resource::Signal(signum) => {
                self.signal_table.entry(signum).or_default().push(id);
            }
            Resource::Child(pid) => {
                if self.config.signals {
                    if let Err(error) = self.watch_signal(libc::SIGCHLD) {
                        debug!(%error, "SIGCHLD unavailable, falling back to interval polling");
                    }
                }
                self.children.entry(pid).or_default().push(id);
            }
            Resource::Notify(token) => {
                self.notify.entry(token).or_default().push(id);
            }
            Resource::Timer | Resource::Lambda(_) => {}
        }

        trace!(condition = %id, lambda = %owner_id, resource = ?condition.resource, kind = ?condition.kind, "registered");

        self.owners.entry(owner_id).or_default().insert(id);
        self.conditions.insert(
            id,
            Entry {
                owner: owner.clone(),
                owner_id,
                condition,
                deadline,
            },
        );

        // The backend refused the descriptor: deliver the failure to the callback instead.
        if let Some(error) = rejected {
            debug!(condition = %id, %error, "descriptor rejected by backend");
            self.remove_entry(id);
            self.ready.push_back(Fired {
                owner,
                id,
                outcome: Outcome::Fire(vec![Value::Bool(true), errno(&error)]),
            });
        }

        Ok(replaced)
    }

    fn remove_entry(&mut self, id: ConditionId) -> Option<Entry> {
        let entry = self.conditions.remove(&id)?;
        let condition = &entry.condition;

        let key = (condition.resource, condition.kind, entry.owner_id);
        if self.keys.get(&key) == Some(&id) {
            self.keys.remove(&key);
        }

        if let Some(ids) = self.owners.get_mut(&entry.owner_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.owners.remove(&entry.owner_id);
            }
        }

        if entry.deadline.is_some() {
            self.timers.remove(id);
        }

        match condition.resource {
            Resource::Fd(fd) => {
                if let Some(set) = self.set_for(condition.kind) {
                    forget(set, fd, id);
                }
                if let Err(error) = self.sync_interest(fd) {
                    warn!(fd, %error, "failed to update descriptor interest");
                }
            }
            Resource::Signal(signum) => {
                if forget(&mut self.signal_table, signum, id) {
                    self.release_signal(signum);
                }
            }
            Resource::Child(pid) => {
                if forget(&mut self.children, pid, id) && self.children.is_empty() {
                    self.release_signal(libc::SIGCHLD);
                }
            }
            Resource::Notify(token) => {
                forget(&mut self.notify, token, id);
            }
            Resource::Timer | Resource::Lambda(_) => {}
        }

        trace!(condition = %id, "unregistered");
        Some(entry)
    }

    fn set_for(&mut self, kind: Kind) -> Option<&mut BTreeMap<RawFd, Vec<ConditionId>>> {
        match kind {
            Kind::Readable => Some(&mut self.read_set),
            Kind::Writable => Some(&mut self.write_set),
            Kind::Exceptional => Some(&mut self.except_set),
            _ => None,
        }
    }

    fn sync_interest(&mut self, fd: RawFd) -> io::Result<()> {
        let mut interest = Interest::NONE;
        if self.read_set.contains_key(&fd) {
            interest = interest | Interest::READABLE;
        }
        if self.write_set.contains_key(&fd) {
            interest = interest | Interest::WRITABLE;
        }
        if self.except_set.contains_key(&fd) {
            interest = interest | Interest::PRIORITY;
        }

        if interest.is_empty() {
            self.poller.deregister(fd)
        } else {
            self.poller.register(fd, interest)
        }
    }

    fn watch_signal(&mut self, signum: i32) -> io::Result<()> {
        signal::install(signum)?;

        if self.signal_fd.is_none() {
            let fd = signal::pipe_fd()?;
            self.poller.register(fd, Interest::READABLE)?;
            self.signal_fd = Some(fd);
        }

        Ok(())
    }

    // While a poll is dispatching, the handler stays installed until every callback has had
    // the chance to re-arm; otherwise a second signal would hit the default disposition.
    fn release_signal(&mut self, signum: i32) {
        if self.dispatching > 0 {
            self.released.insert(signum);
        } else {
            self.unwatch_signal(signum);
        }
    }

    fn release_deferred_signals(&mut self) {
        for signum in std::mem::take(&mut self.released) {
            self.unwatch_signal(signum);
        }
    }

    fn unwatch_signal(&mut self, signum: i32) {
        let still_needed = self.signal_table.contains_key(&signum)
            || (signum == libc::SIGCHLD && !self.children.is_empty());
        if still_needed {
            return;
        }

        signal::restore(signum);

        if self.signal_table.is_empty() && self.children.is_empty() {
            if let Some(fd) = self.signal_fd.take() {
                let _ = self.poller.deregister(fd);
            }
        }
    }

    // Drops conditions whose owning lambda no longer exists.
    fn purge(&mut self) {
        let dead: Vec<ConditionId> = self
            .conditions
            .iter()
            .filter(|(_, entry)| entry.owner.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();

        for id in dead {
            trace!(condition = %id, "owner dropped, purging");
            self.remove_entry(id);
        }

        self.ready.retain(|fired| fired.owner.strong_count() > 0);
    }

    fn take(&mut self, id: ConditionId, args: Values, fired: &mut Vec<Fired>) {
        if let Some(entry) = self.remove_entry(id) {
            fired.push(Fired {
                owner: entry.owner,
                id,
                outcome: Outcome::Fire(args),
            });
        }
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        let timer = self.timers.next_remaining(now);
        let child = (!self.children.is_empty()).then_some(self.config.child_poll_interval);

        match (timer, child) {
            (Some(timer), Some(child)) => Some(timer.min(child)),
            (timer, child) => timer.or(child),
        }
    }

    // Blocks on the backend, restarting with the remaining budget when interrupted.
    fn wait_ready(&mut self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        loop {
            let remaining = match (timeout, deadline) {
                (Some(_), Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
                // Too far out to represent: the backend clamps it.
                (timeout, _) => timeout,
            };

            match self.poller.poll(&mut self.events, remaining) {
                Ok(()) => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                    trace!("poll interrupted, retrying");
                }
                Err(error) => return Err(Error::Poll(error)),
            }
        }
    }

    /// One poll step up to (not including) running callbacks.
    fn collect(&mut self) -> Result<Vec<Fired>> {
        self.purge();

        let mut fired: Vec<Fired> = self.ready.drain(..).collect();
        if fired.is_empty() && self.conditions.is_empty() {
            return Err(Error::NothingToWait);
        }

        self.reap_children(&mut fired);
        self.complete_notifications(&mut fired);

        if fired.is_empty() {
            let timeout = self.next_timeout(Instant::now());
            self.wait_ready(timeout)?;
        } else {
            self.wait_ready(Some(Duration::ZERO))?;
        }

        let events = std::mem::take(&mut self.events);
        let mut io_fired = Vec::new();
        let mut signals = Vec::new();

        for event in &events {
            if event.fd == self.wake.fd() {
                self.completed.extend(self.wake.drain());
                continue;
            }

            if Some(event.fd) == self.signal_fd {
                signals = signal::drain();
                continue;
            }

            self.dispatch_io(event, &mut io_fired);
        }
        self.events = events;

        let now = Instant::now();
        for id in self.timers.expired(now) {
            let Some(entry) = self.conditions.get(&id) else {
                continue;
            };
            let args = if entry.condition.is_io() {
                vec![Value::Bool(false)]
            } else {
                Vec::new()
            };
            self.take(id, args, &mut fired);
        }

        fired.append(&mut io_fired);

        for signum in signals {
            let ids = self.signal_table.get(&signum).cloned().unwrap_or_default();
            // SIGCHLD only wakes the poll when children are watched; they are reaped below.
            if ids.is_empty() && signum != libc::SIGCHLD {
                warn!(signum, "signal arrived with no watcher");
            }
            for id in ids {
                self.take(id, vec![Value::Signal(signum)], &mut fired);
            }
        }

        self.complete_notifications(&mut fired);
        self.reap_children(&mut fired);

        trace!(count = fired.len(), "poll collected");
        Ok(fired)
    }

    fn dispatch_io(&mut self, event: &Readiness, fired: &mut Vec<Fired>) {
        let fault = if event.invalid {
            Some(libc::EBADF)
        } else if event.error {
            // Pending socket error, or EIO for descriptors that are not sockets.
            let code = crate::io::socket_error(event.fd).unwrap_or(0);
            Some(if code != 0 { code } else { libc::EIO })
        } else {
            None
        };

        let args = || {
            let mut args = vec![Value::Bool(true)];
            if let Some(code) = fault {
                args.push(Value::Errno(code));
            }
            args
        };

        let failed = event.error || event.invalid;
        let groups = [
            (Kind::Readable, event.readable || event.hangup || failed),
            (Kind::Writable, event.writable || event.hangup || failed),
            (Kind::Exceptional, event.priority || failed),
        ];

        for (kind, ready) in groups {
            if !ready {
                continue;
            }
            let ids = self
                .set_for(kind)
                .and_then(|set| set.get(&event.fd).cloned())
                .unwrap_or_default();
            for id in ids {
                self.take(id, args(), fired);
            }
        }
    }

    fn complete_notifications(&mut self, fired: &mut Vec<Fired>) {
        let done: Vec<u64> = self
            .completed
            .iter()
            .copied()
            .filter(|token| self.notify.contains_key(token))
            .collect();

        for token in done {
            self.completed.remove(&token);
            let ids = self.notify.get(&token).cloned().unwrap_or_default();
            for id in ids {
                self.take(id, vec![Value::Token(token)], fired);
            }
        }
    }

    fn reap_children(&mut self, fired: &mut Vec<Fired>) {
        let pids: Vec<i32> = self.children.keys().copied().collect();

        for pid in pids {
            let mut status = 0;
            let res = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };

            let args = match res {
                0 => continue,
                r if r == pid => vec![Value::Pid(pid), Value::Int(i64::from(status))],
                _ => {
                    let error = io::Error::last_os_error();
                    if error.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    vec![Value::Pid(pid), errno(&error)]
                }
            };

            debug!(pid, "child completed");
            let ids = self.children.get(&pid).cloned().unwrap_or_default();
            for id in ids {
                self.take(id, args.clone(), fired);
            }
        }
    }
}

impl Drop for ReactorCore {
    fn drop(&mut self) {
        for signum in self.signal_table.keys().chain(self.released.iter()) {
            signal::restore(*signum);
        }
        if !self.children.is_empty() {
            signal::restore(libc::SIGCHLD);
        }
    }
}

// Removes `id` from the list stored under `key`; true when the list became empty.
fn forget<K: Ord>(table: &mut BTreeMap<K, Vec<ConditionId>>, key: K, id: ConditionId) -> bool {
    let Some(ids) = table.get_mut(&key) else {
        return false;
    };
    ids.retain(|other| *other != id);
    if ids.is_empty() {
        table.remove(&key);
        return true;
    }
    false
}

fn errno(error: &io::Error) -> Value {
    Value::Errno(error.raw_os_error().unwrap_or(libc::EIO))
}
