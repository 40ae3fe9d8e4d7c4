//! Cross-platform async runtime with thread-targeted scheduling.
//!
//! This crate runs futures as [`Task`]s on an event loop driven by a
//! readiness or completion [`reactor`], and lets a task move itself between
//! OS threads through per-thread mailboxes.
//!
//! # Architecture
//!
//! - **Runtime**: event loop that drives a main future via `block_on`, runs
//!   queued tasks, drains the thread's mailbox, fires timers and parks in the
//!   reactor
//! - **Task**: a spawned future with an exactly-once resume contract
//! - **Reactor**: `epoll`, `kqueue` or a completion-callback pool, selected at
//!   build time
//! - **net**: non-blocking UDP and TCP operations suspended on the reactor
//! - **sched**: thread ids, bounded mailboxes, the thread registry and
//!   `switch_to`
//! - **sync**: latch, wait-group, critical sections and events
//! - **channel**: rendezvous channel with close semantics
//! - **RuntimeBuilder**: fluent builder for runtime instantiation
//! - **time**: sleep futures served by the runtime's timer wheel

mod builder;
pub mod channel;
mod error;
pub mod net;
pub mod reactor;
mod runtime;
pub mod sched;
pub mod sync;
mod task;
pub mod time;

pub use builder::RuntimeBuilder;
pub use channel::Channel;
pub use error::{Error, Result, ScheduleError, SyncError, TaskError};
pub use runtime::{Runtime, yield_now};
pub use task::{JoinHandle, JoinSet, Task};
pub use time::{sleep, sleep_until};
