//! Synchronization primitives usable from both OS threads and tasks.
//!
//! - [`Latch`]: single-use countdown,
//! - [`WaitGroup`]: reusable fork-join counter with a timed wait,
//! - [`Section`]: reader-writer lock strategy, [`Lock`] or [`Bypass`],
//! - [`Event`] / [`AutoResetEvent`]: one-shot signals with cancellation.
//!
//! Every primitive offers a blocking wait for threads and a future for
//! tasks; mixing both on the same instance is allowed.

mod counter;
mod event;
mod section;
mod waiters;

pub use counter::{Latch, WaitGroup, Zero};
pub use event::{AutoResetEvent, Event, Wait};
pub use section::{Bypass, Lock, Section, SectionGuard};

pub(crate) use waiters::{WaiterKey, Waiters, wake_all};
