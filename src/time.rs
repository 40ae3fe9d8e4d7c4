//! Timers driven by the runtime loop.
//!
//! A [`Sleep`] registers its deadline with the runtime's timer set on first
//! poll. The runtime bounds each reactor wait by the nearest deadline and
//! wakes every expired timer after the wait returns.
//!
//! ```ignore
//! use strand::time::sleep;
//! use std::time::Duration;
//!
//! async fn wait() {
//!     sleep(Duration::from_millis(100)).await;
//! }
//! ```

use crate::runtime::context;

use parking_lot::Mutex;
use slab::Slab;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct Entry {
    deadline: Instant,
    waker: Waker,
    id: u64,
}

/// Slab key plus a registration id; slab keys are reused once a timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TimerKey {
    slot: usize,
    id: u64,
}

/// Registered deadlines of one runtime.
#[derive(Default)]
pub(crate) struct Timers {
    entries: Slab<Entry>,
    next_id: u64,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, deadline: Instant, waker: &Waker) -> TimerKey {
        let id = self.next_id;
        self.next_id += 1;

        let slot = self.entries.insert(Entry {
            deadline,
            waker: waker.clone(),
            id,
        });

        TimerKey { slot, id }
    }

    fn update(&mut self, key: TimerKey, waker: &Waker) {
        if let Some(entry) = self.entries.get_mut(key.slot)
            && entry.id == key.id
        {
            entry.waker.clone_from(waker);
        }
    }

    fn cancel(&mut self, key: TimerKey) {
        if self
            .entries
            .get(key.slot)
            .is_some_and(|entry| entry.id == key.id)
        {
            self.entries.remove(key.slot);
        }
    }

    /// Removes every timer whose deadline is at or before `now` and returns
    /// their wakers.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Waker> {
        let expired: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(slot, _)| slot)
            .collect();

        expired
            .into_iter()
            .map(|slot| self.entries.remove(slot).waker)
            .collect()
    }

    /// Time left until the nearest deadline, zero if one already passed.
    pub(crate) fn next_remaining(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|(_, entry)| entry.deadline.saturating_duration_since(now))
            .min()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Future returned by [`sleep`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    deadline: Instant,
    registration: Option<(Arc<Mutex<Timers>>, TimerKey)>,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self::until(Instant::now() + duration)
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            registration: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_elapsed() {
            if let Some((timers, key)) = self.registration.take() {
                timers.lock().cancel(key);
            }
            return Poll::Ready(());
        }

        if let Some((timers, key)) = &self.registration {
            timers.lock().update(*key, cx.waker());
            return Poll::Pending;
        }

        let timers =
            context::current_timers().expect("sleep() polled outside of a runtime context");
        let key = timers.lock().register(self.deadline, cx.waker());
        self.registration = Some((timers, key));

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some((timers, key)) = self.registration.take() {
            timers.lock().cancel(key);
        }
    }
}

impl std::fmt::Debug for Timers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timers").field("len", &self.len()).finish()
    }
}

/// Completes once `duration` has elapsed. A zero duration completes on the
/// first poll without registering anything.
///
/// # Panics
/// Polling a pending sleep outside of [`Runtime::block_on`](crate::Runtime::block_on)
/// panics.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// Completes at `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep::until(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_only_past_deadlines() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let waker = Waker::noop();

        timers.register(now - Duration::from_millis(1), waker);
        timers.register(now + Duration::from_secs(60), waker);

        assert_eq!(timers.expire(now).len(), 1);
        assert_eq!(timers.len(), 1);

        let remaining = timers.next_remaining(now).unwrap();
        assert!(remaining > Duration::from_secs(59));
    }

    #[test]
    fn zero_sleep_is_ready_without_runtime() {
        let mut sleep = sleep(Duration::ZERO);
        let mut cx = Context::from_waker(Waker::noop());

        assert_eq!(Pin::new(&mut sleep).poll(&mut cx), Poll::Ready(()));
        assert!(sleep.registration.is_none());
    }

    #[test]
    fn stale_key_does_not_cancel_reused_slot() {
        let mut timers = Timers::new();
        let now = Instant::now();

        let fired = timers.register(now, Waker::noop());
        assert_eq!(timers.expire(now).len(), 1);

        let live = timers.register(now + Duration::from_secs(1), Waker::noop());
        assert_eq!(fired.slot, live.slot);

        timers.cancel(fired);
        assert_eq!(timers.len(), 1);

        timers.cancel(live);
        assert_eq!(timers.len(), 0);
        assert!(timers.next_remaining(now).is_none());
    }
}
