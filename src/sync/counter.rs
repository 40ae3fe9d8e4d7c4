//! Counting primitives: [`Latch`] and [`WaitGroup`].
//!
//! Both release their waiters when the counter reaches zero. Counting down
//! past zero is reported as [`SyncError::Underflow`] and leaves the counter
//! untouched. Threads block with [`Latch::wait`] / [`WaitGroup::wait`], tasks
//! await [`Latch::released`] / [`WaitGroup::done_all`].

use super::waiters::{WaiterKey, Waiters, wake_all};
use crate::error::SyncError;

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Blocking waits re-check the counter at least this often.
const RECHECK: Duration = Duration::from_millis(100);

struct State {
    count: usize,
    waiters: Waiters,
}

struct Counter {
    state: Mutex<State>,
    zero: Condvar,
}

impl Counter {
    fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(State {
                count,
                waiters: Waiters::new(),
            }),
            zero: Condvar::new(),
        }
    }

    fn count(&self) -> usize {
        self.state.lock().count
    }

    fn add(&self, n: usize) {
        self.state.lock().count += n;
    }

    fn count_down(&self, n: usize) -> Result<(), SyncError> {
        let woken = {
            let mut state = self.state.lock();

            if n > state.count {
                return Err(SyncError::Underflow {
                    requested: n,
                    remaining: state.count,
                });
            }

            state.count -= n;
            if state.count > 0 || n == 0 {
                return Ok(());
            }

            state.waiters.release_all(true)
        };

        self.zero.notify_all();
        wake_all(woken);

        Ok(())
    }

    /// Blocks until zero. `None` waits forever. Returns whether zero was
    /// reached.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();

        while state.count > 0 {
            let slice = match deadline {
                None => RECHECK,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(RECHECK)
                }
            };

            self.zero.wait_for(&mut state, slice);
        }

        true
    }

    fn poll_zero(&self, key: &mut Option<WaiterKey>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();

        if let Some(registered) = *key {
            if state.waiters.take(registered).is_some() {
                *key = None;
                return Poll::Ready(());
            }
            state.waiters.update(registered, cx.waker());
            return Poll::Pending;
        }

        if state.count == 0 {
            return Poll::Ready(());
        }

        *key = Some(state.waiters.register(cx.waker()));
        Poll::Pending
    }

    fn forget(&self, key: WaiterKey) {
        self.state.lock().waiters.remove(key);
    }
}

/// Future returned by [`Latch::released`] and [`WaitGroup::done_all`].
#[must_use = "futures do nothing unless awaited"]
pub struct Zero<'a> {
    counter: &'a Counter,
    key: Option<WaiterKey>,
}

impl Future for Zero<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        this.counter.poll_zero(&mut this.key, cx)
    }
}

impl Drop for Zero<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.counter.forget(key);
        }
    }
}

/// Single-use countdown latch.
///
/// ```ignore
/// let latch = Arc::new(Latch::new(3));
/// for _ in 0..3 {
///     let latch = latch.clone();
///     std::thread::spawn(move || latch.count_down(1).unwrap());
/// }
/// latch.wait();
/// ```
pub struct Latch {
    counter: Counter,
}

impl Latch {
    /// A latch released after `count` count-downs. A count of zero is
    /// released from the start.
    pub fn new(count: usize) -> Self {
        Self {
            counter: Counter::new(count),
        }
    }

    /// Decrements by `n`, releasing every waiter when zero is reached.
    ///
    /// # Errors
    /// [`SyncError::Underflow`] if `n` exceeds the remaining count,
    /// including any non-zero count-down on a released latch.
    pub fn count_down(&self, n: usize) -> Result<(), SyncError> {
        self.counter.count_down(n)
    }

    pub fn count(&self) -> usize {
        self.counter.count()
    }

    pub fn is_released(&self) -> bool {
        self.count() == 0
    }

    /// Blocks the calling thread until the latch is released.
    pub fn wait(&self) {
        self.counter.wait(None);
    }

    /// Blocks for at most `timeout`; `false` if the latch is still held.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.counter.wait(Some(timeout))
    }

    /// Completes once the latch is released.
    pub fn released(&self) -> Zero<'_> {
        Zero {
            counter: &self.counter,
            key: None,
        }
    }
}

/// Reusable fork-join counter.
///
/// Unlike a [`Latch`], the count can be raised again with [`add`](Self::add)
/// after reaching zero, starting a new round.
pub struct WaitGroup {
    counter: Counter,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self {
            counter: Counter::new(0),
        }
    }

    /// Adds `n` outstanding units of work.
    pub fn add(&self, n: usize) {
        self.counter.add(n);
    }

    /// Marks one unit of work as finished.
    pub fn done(&self) -> Result<(), SyncError> {
        self.counter.count_down(1)
    }

    /// Marks `n` units of work as finished.
    pub fn done_n(&self, n: usize) -> Result<(), SyncError> {
        self.counter.count_down(n)
    }

    pub fn count(&self) -> usize {
        self.counter.count()
    }

    /// Blocks until the count is zero or `timeout` elapses (`None` waits
    /// forever). Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.counter.wait(timeout)
    }

    /// Completes once the count is zero.
    pub fn done_all(&self) -> Zero<'_> {
        Zero {
            counter: &self.counter,
            key: None,
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(3, 4)]
    #[case(1, 2)]
    #[case(0, 1)]
    fn underflow_leaves_count_unchanged(#[case] count: usize, #[case] requested: usize) {
        let latch = Latch::new(count);

        assert_eq!(
            latch.count_down(requested),
            Err(SyncError::Underflow {
                requested,
                remaining: count
            })
        );
        assert_eq!(latch.count(), count);
    }

    #[test]
    fn zero_count_is_released() {
        let latch = Latch::new(0);

        assert!(latch.is_released());
        assert!(latch.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn wait_group_times_out_then_completes() {
        let group = WaitGroup::new();
        group.add(2);

        assert!(!group.wait(Some(Duration::from_millis(5))));
        group.done().unwrap();
        group.done().unwrap();
        assert!(group.wait(Some(Duration::ZERO)));
    }
}
