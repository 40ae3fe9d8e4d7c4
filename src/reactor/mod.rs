//! Event-driven I/O reactor module.
//!
//! The reactor owns a kernel object that can block on readiness across many
//! descriptors at once and turns fired events into wakers of the tasks that
//! registered interest. One backend is compiled in, chosen per target:
//!
//! - [`epoll`](poller) on Linux and Android (edge-triggered, one-shot),
//! - [`kqueue`](poller) on macOS, iOS and the BSDs (one-shot filters),
//! - a completion-callback backend when the `completion` feature is enabled.
//!
//! Every backend exposes the same surface: [`Reactor::try_add`],
//! [`Reactor::remove`], [`Reactor::wait`] and [`Reactor::notify`].
//!
//! # Example
//!
//! ```ignore
//! use strand::reactor::{Interest, Reactor};
//! use std::time::Duration;
//!
//! let reactor = Reactor::new()?;
//! reactor.try_add(fd, Interest::READABLE, waker)?;
//!
//! let mut ready = Vec::new();
//! let fired = reactor.wait(Some(Duration::from_millis(10)), &mut ready)?;
//! for waker in ready.drain(..) {
//!     waker.wake();
//! }
//! ```

mod interest;
pub(crate) mod registration;

#[cfg(all(
    not(feature = "completion"),
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly",
    ))
))]
compile_error!("Target OS has no native reactor backend; enable the `completion` feature");

#[cfg(all(
    not(feature = "completion"),
    any(target_os = "linux", target_os = "android")
))]
mod poller {
    mod epoll;
    pub use epoll::Reactor;
}

#[cfg(all(
    not(feature = "completion"),
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly",
    )
))]
mod poller {
    mod kqueue;
    pub use kqueue::Reactor;
}

#[cfg(feature = "completion")]
pub(crate) mod poller {
    mod completion;
    pub use completion::Reactor;
    pub(crate) use completion::{Completion, FdGuard, Readiness};
}

pub use interest::Interest;
pub use poller::Reactor;

use std::sync::Arc;

/// Shared handle to a reactor, held by sockets and the runtime loop.
pub type ReactorHandle = Arc<Reactor>;

/// Construction parameters shared by every backend.
#[derive(Clone, Debug)]
pub struct ReactorConfig {
    /// Size of the scratch event buffer reused by each `wait`.
    pub event_capacity: usize,

    /// Worker threads used by the completion backend. Ignored elsewhere.
    pub completion_workers: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 64,
            completion_workers: 4,
        }
    }
}

/// Converts a wait timeout into whole milliseconds, rounding up so a short
/// non-zero timeout never degrades into a busy poll.
#[cfg(all(
    not(feature = "completion"),
    any(target_os = "linux", target_os = "android")
))]
pub(crate) fn timeout_millis(timeout: Option<std::time::Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            millis.min(i32::MAX as u128) as i32
        }
    }
}

#[cfg(all(
    test,
    not(feature = "completion"),
    any(target_os = "linux", target_os = "android")
))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(25))), 25);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }
}
