//! Thread-local runtime context.
//!
//! [`Runtime::block_on`](crate::Runtime::block_on) installs a handle to the
//! runtime's parts for the duration of the call, which is what lets
//! [`Task::spawn`](crate::Task::spawn), [`sleep`](crate::time::sleep) and the
//! socket constructors work without an explicit runtime argument.

use crate::reactor::ReactorHandle;
use crate::runtime::TaskQueue;
use crate::sched::Scheduler;
use crate::time::Timers;

use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;

/// The pieces of a runtime reachable from inside `block_on`.
pub(crate) struct Handle {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) reactor: ReactorHandle,
    pub(crate) timers: Arc<Mutex<Timers>>,
    pub(crate) scheduler: Scheduler,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Handle>>> = const { RefCell::new(None) };
}

/// Restores the previous context even if the closure unwinds.
struct Reset(Option<Arc<Handle>>);

impl Drop for Reset {
    fn drop(&mut self) {
        let previous = self.0.take();
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}

/// Runs `function` with `handle` as the current runtime context.
pub(crate) fn enter<F, R>(handle: Arc<Handle>, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT.with(|current| current.borrow_mut().replace(handle));
    let _reset = Reset(previous);

    function()
}

fn with_current<T>(map: impl FnOnce(&Handle) -> T) -> Option<T> {
    CURRENT
        .try_with(|current| current.borrow().as_deref().map(map))
        .ok()
        .flatten()
}

pub(crate) fn current_queue() -> Option<Arc<TaskQueue>> {
    with_current(|handle| handle.queue.clone())
}

pub(crate) fn current_reactor() -> Option<ReactorHandle> {
    with_current(|handle| handle.reactor.clone())
}

pub(crate) fn current_timers() -> Option<Arc<Mutex<Timers>>> {
    with_current(|handle| handle.timers.clone())
}

pub(crate) fn current_scheduler() -> Option<Scheduler> {
    with_current(|handle| handle.scheduler.clone())
}
