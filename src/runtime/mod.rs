//! Runtime subsystem modules.

pub(crate) mod context;
mod core;
mod queue;
mod waker;
mod yield_now;

pub use core::Runtime;
pub use yield_now::yield_now;

pub(crate) use queue::TaskQueue;
pub(crate) use waker::make_waker;
