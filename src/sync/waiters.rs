//! FIFO list of suspended tasks, each released with a boolean outcome.

use slab::Slab;
use std::collections::VecDeque;
use std::task::Waker;

/// Slab slot plus a registration id; slots are reused after release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WaiterKey {
    slot: usize,
    id: u64,
}

struct Entry {
    id: u64,
    waker: Waker,
    outcome: Option<bool>,
}

#[derive(Default)]
pub(crate) struct Waiters {
    entries: Slab<Entry>,
    order: VecDeque<WaiterKey>,
    next_id: u64,
}

impl Waiters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, waker: &Waker) -> WaiterKey {
        let id = self.next_id;
        self.next_id += 1;

        let slot = self.entries.insert(Entry {
            id,
            waker: waker.clone(),
            outcome: None,
        });

        let key = WaiterKey { slot, id };
        self.order.push_back(key);
        key
    }

    fn entry_mut(&mut self, key: WaiterKey) -> Option<&mut Entry> {
        self.entries
            .get_mut(key.slot)
            .filter(|entry| entry.id == key.id)
    }

    /// Replaces the waker of a still pending waiter.
    pub(crate) fn update(&mut self, key: WaiterKey, waker: &Waker) {
        if let Some(entry) = self.entry_mut(key) {
            entry.waker.clone_from(waker);
        }
    }

    /// Takes the outcome of a released waiter, freeing its slot. `None`
    /// while it is still pending.
    pub(crate) fn take(&mut self, key: WaiterKey) -> Option<bool> {
        let outcome = self.entry_mut(key)?.outcome?;
        self.entries.remove(key.slot);

        Some(outcome)
    }

    /// Forgets a waiter that stopped waiting. Returns its outcome if it had
    /// already been released.
    pub(crate) fn remove(&mut self, key: WaiterKey) -> Option<bool> {
        let outcome = self.entry_mut(key)?.outcome;
        self.entries.remove(key.slot);

        // Released waiters have already left the queue.
        if outcome.is_none() {
            self.order.retain(|queued| *queued != key);
        }

        outcome
    }

    /// Releases every pending waiter with `outcome`. The wakers are returned
    /// so they can be invoked after the caller's lock is dropped.
    pub(crate) fn release_all(&mut self, outcome: bool) -> Vec<Waker> {
        let mut woken = Vec::new();

        while let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.entry_mut(key)
                && entry.outcome.is_none()
            {
                entry.outcome = Some(outcome);
                woken.push(entry.waker.clone());
            }
        }

        woken
    }

    /// Releases the oldest pending waiter, if there is one.
    pub(crate) fn release_one(&mut self, outcome: bool) -> Option<Waker> {
        while let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.entry_mut(key)
                && entry.outcome.is_none()
            {
                entry.outcome = Some(outcome);
                return Some(entry.waker.clone());
            }
        }

        None
    }

    /// Number of waiters not yet released.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.outcome.is_none())
            .count()
    }
}

pub(crate) fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_one_is_fifo() {
        let mut waiters = Waiters::new();
        let first = waiters.register(Waker::noop());
        let second = waiters.register(Waker::noop());

        assert!(waiters.release_one(true).is_some());
        assert_eq!(waiters.take(first), Some(true));
        assert_eq!(waiters.take(second), None);
        assert_eq!(waiters.pending(), 1);
    }

    #[test]
    fn removed_waiter_is_skipped() {
        let mut waiters = Waiters::new();
        let gone = waiters.register(Waker::noop());
        let kept = waiters.register(Waker::noop());

        assert_eq!(waiters.remove(gone), None);
        assert!(waiters.release_one(false).is_some());
        assert_eq!(waiters.take(kept), Some(false));
        assert!(waiters.release_one(true).is_none());
    }

    #[test]
    fn stale_key_after_slot_reuse() {
        let mut waiters = Waiters::new();
        let old = waiters.register(Waker::noop());
        waiters.release_all(true);
        assert_eq!(waiters.take(old), Some(true));

        let new = waiters.register(Waker::noop());
        assert_eq!(waiters.remove(old), None);
        assert_eq!(waiters.pending(), 1);
        assert_eq!(waiters.release_all(true).len(), 1);
        assert_eq!(waiters.take(new), Some(true));
    }

    #[test]
    fn abandoned_waiters_leave_the_queue() {
        let mut waiters = Waiters::new();

        for _ in 0..1000 {
            let key = waiters.register(Waker::noop());
            assert_eq!(waiters.remove(key), None);
        }

        assert_eq!(waiters.order.len(), 0);
        assert_eq!(waiters.pending(), 0);
    }
}
