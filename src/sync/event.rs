//! One-shot events.
//!
//! [`Event`] stays set once set: every past and future wait completes with
//! `true`. [`AutoResetEvent`] hands each `set` to exactly one waiter, or
//! keeps it for the next wait if nobody is waiting.
//!
//! `cancel` releases the waiters pending at that moment with `false`. It
//! races with `set`; a waiter observes whichever reached it first.

use super::waiters::{WaiterKey, Waiters, wake_all};

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

trait Source: Sync {
    fn poll_wait(&self, key: &mut Option<WaiterKey>, cx: &mut Context<'_>) -> Poll<bool>;
    fn forget(&self, key: WaiterKey);
}

/// Future returned by [`Event::wait`] and [`AutoResetEvent::wait`].
/// Resolves to `true` when signaled, `false` when cancelled.
#[must_use = "futures do nothing unless awaited"]
pub struct Wait<'a> {
    source: &'a dyn Source,
    key: Option<WaiterKey>,
}

impl Future for Wait<'_> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        this.source.poll_wait(&mut this.key, cx)
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.source.forget(key);
        }
    }
}

struct State {
    signaled: bool,
    waiters: Waiters,
}

impl State {
    fn new() -> Self {
        Self {
            signaled: false,
            waiters: Waiters::new(),
        }
    }
}

/// Blocks on `condvar` until `ready` holds or the deadline passes.
fn block_until(
    condvar: &Condvar,
    state: &mut parking_lot::MutexGuard<'_, State>,
    timeout: Option<Duration>,
    mut ready: impl FnMut(&mut State) -> bool,
) -> bool {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        if ready(state) {
            return true;
        }

        match deadline {
            None => condvar.wait(state),
            Some(deadline) => {
                if condvar.wait_until(state, deadline).timed_out() {
                    return ready(state);
                }
            }
        }
    }
}

/// Manual-reset event.
pub struct Event {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            condvar: Condvar::new(),
        }
    }

    /// Sets the event and releases every waiter. Returns `false` if it was
    /// already set.
    pub fn set(&self) -> bool {
        let woken = {
            let mut state = self.state.lock();
            if state.signaled {
                return false;
            }

            state.signaled = true;
            state.waiters.release_all(true)
        };

        self.condvar.notify_all();
        wake_all(woken);
        true
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().signaled
    }

    /// Releases the currently pending waiters with `false`. Returns how
    /// many were released.
    pub fn cancel(&self) -> usize {
        let woken = self.state.lock().waiters.release_all(false);
        let released = woken.len();

        wake_all(woken);
        released
    }

    /// Completes with `true` once the event is set, immediately if it
    /// already is.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            source: self,
            key: None,
        }
    }

    /// Blocks the calling thread until the event is set or `timeout`
    /// elapses. Returns whether it is set.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        block_until(&self.condvar, &mut state, timeout, |state| state.signaled)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for Event {
    fn poll_wait(&self, key: &mut Option<WaiterKey>, cx: &mut Context<'_>) -> Poll<bool> {
        let mut state = self.state.lock();

        if let Some(registered) = *key {
            if let Some(outcome) = state.waiters.take(registered) {
                *key = None;
                return Poll::Ready(outcome);
            }
            state.waiters.update(registered, cx.waker());
            return Poll::Pending;
        }

        if state.signaled {
            return Poll::Ready(true);
        }

        *key = Some(state.waiters.register(cx.waker()));
        Poll::Pending
    }

    fn forget(&self, key: WaiterKey) {
        self.state.lock().waiters.remove(key);
    }
}

/// Auto-reset event: each signal is consumed by a single wait.
pub struct AutoResetEvent {
    state: Mutex<State>,
    condvar: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            condvar: Condvar::new(),
        }
    }

    /// Releases the oldest pending waiter, or stores the signal for the
    /// next wait. Signals do not accumulate.
    pub fn set(&self) {
        let woken = Self::signal(&mut self.state.lock(), &self.condvar);

        if let Some(waker) = woken {
            waker.wake();
        }
    }

    /// Hands the signal to the oldest waiter, whose waker is returned to be
    /// invoked once the state lock is released.
    fn signal(state: &mut State, condvar: &Condvar) -> Option<Waker> {
        let waker = state.waiters.release_one(true);

        if waker.is_none() {
            state.signaled = true;
            condvar.notify_one();
        }

        waker
    }

    /// Whether a signal is stored and no waiter has consumed it yet.
    pub fn is_ready(&self) -> bool {
        self.state.lock().signaled
    }

    /// Releases the currently pending waiters with `false`.
    pub fn cancel(&self) -> usize {
        let woken = self.state.lock().waiters.release_all(false);
        let released = woken.len();

        wake_all(woken);
        released
    }

    /// Completes with `true` after consuming one signal.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            source: self,
            key: None,
        }
    }

    /// Blocks until a signal can be consumed or `timeout` elapses.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        block_until(&self.condvar, &mut state, timeout, |state| {
            std::mem::take(&mut state.signaled)
        })
    }
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for AutoResetEvent {
    fn poll_wait(&self, key: &mut Option<WaiterKey>, cx: &mut Context<'_>) -> Poll<bool> {
        let mut state = self.state.lock();

        if let Some(registered) = *key {
            if let Some(outcome) = state.waiters.take(registered) {
                *key = None;
                return Poll::Ready(outcome);
            }
            state.waiters.update(registered, cx.waker());
            return Poll::Pending;
        }

        if std::mem::take(&mut state.signaled) {
            return Poll::Ready(true);
        }

        *key = Some(state.waiters.register(cx.waker()));
        Poll::Pending
    }

    fn forget(&self, key: WaiterKey) {
        let woken = {
            let mut state = self.state.lock();

            // A signal handed to a waiter that went away goes to the next one.
            match state.waiters.remove(key) {
                Some(true) => Self::signal(&mut state, &self.condvar),
                _ => None,
            }
        };

        if let Some(waker) = woken {
            waker.wake();
        }
    }
}
