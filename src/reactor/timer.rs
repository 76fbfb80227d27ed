//! Deadline-ordered timer bookkeeping.
//!
//! Replaces a scan-everything list of `(deadline, waker)` pairs with an ordered set, so the
//! next deadline and the expired prefix are both cheap to compute. Equal deadlines fire in
//! registration order because condition ids grow monotonically.

use crate::reactor::condition::ConditionId;

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    order: BTreeSet<(Instant, ConditionId)>,
    deadlines: HashMap<ConditionId, Instant>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: ConditionId, deadline: Instant) {
        if let Some(previous) = self.deadlines.insert(id, deadline) {
            self.order.remove(&(previous, id));
        }
        self.order.insert((deadline, id));
    }

    pub(crate) fn remove(&mut self, id: ConditionId) -> Option<Instant> {
        let deadline = self.deadlines.remove(&id)?;
        self.order.remove(&(deadline, id));
        Some(deadline)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.order.first().map(|(deadline, _)| *deadline)
    }

    /// Time left until the earliest deadline, zero if it already passed.
    pub(crate) fn next_remaining(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Removes and returns every timer due at `now`, in ascending deadline order.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<ConditionId> {
        let mut due = Vec::new();

        while let Some(&(deadline, id)) = self.order.first() {
            if deadline > now {
                break;
            }
            self.order.pop_first();
            self.deadlines.remove(&id);
            due.push(id);
        }

        due
    }

    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn expired_returns_only_due_timers() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let (a, b, c) = (ConditionId::next(), ConditionId::next(), ConditionId::next());

        timers.insert(a, now + Duration::from_millis(30));
        timers.insert(b, now);
        timers.insert(c, now + Duration::from_millis(10));

        assert_eq!(timers.next_deadline(), Some(now));
        assert_eq!(timers.expired(now), vec![b]);
        assert_eq!(timers.len(), 2);
        assert_eq!(
            timers.expired(now + Duration::from_millis(40)),
            vec![c, a]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn reinsert_moves_the_deadline() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let id = ConditionId::next();

        timers.insert(id, now + Duration::from_secs(10));
        timers.insert(id, now);

        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_remaining(now), Some(Duration::ZERO));
        assert_eq!(timers.remove(id), Some(now));
        assert_eq!(timers.remove(id), None);
    }

    proptest! {
        #[test]
        fn expiry_is_ascending_by_deadline(offsets in proptest::collection::vec(0u64..500, 1..40)) {
            let mut timers = TimerQueue::new();
            let base = Instant::now();
            let mut expected = Vec::new();

            for offset in &offsets {
                let id = ConditionId::next();
                let deadline = base + Duration::from_millis(*offset);
                timers.insert(id, deadline);
                expected.push((deadline, id));
            }
            expected.sort();

            let fired = timers.expired(base + Duration::from_millis(1_000));
            let expected_ids: Vec<ConditionId> = expected.into_iter().map(|(_, id)| id).collect();
            prop_assert_eq!(fired, expected_ids);
            prop_assert!(timers.is_empty());
        }
    }
}
