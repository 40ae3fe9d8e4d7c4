//! Ready queue of the runtime.
//!
//! Tasks spawned on the runtime and every later wake-up of such a task end up
//! here, in FIFO order. Pushing from another thread pokes the reactor so a
//! runtime parked in `wait` picks the task up promptly.

use crate::reactor::Reactor;
use crate::task::{Schedule, Task};

use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Weak;

pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    reactor: Weak<Reactor>,
}

impl TaskQueue {
    pub(crate) fn new(reactor: Weak<Reactor>) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            reactor,
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);

        if let Some(reactor) = self.reactor.upgrade()
            && let Err(error) = reactor.notify()
        {
            warn!("failed to wake the reactor: {}", error);
        }
    }

    /// Takes every task queued so far. Tasks woken while the batch runs wait
    /// for the next one.
    pub(crate) fn take_batch(&self) -> VecDeque<Task> {
        std::mem::take(&mut *self.tasks.lock())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_and_batches() {
        let queue = Arc::new(TaskQueue::new(Weak::new()));

        let (first, _a) = Task::new(async { 1 }, queue.clone());
        let (second, _b) = Task::new(async { 2 }, queue.clone());
        queue.push(first);
        queue.push(second);
        assert!(!queue.is_empty());

        let batch = queue.take_batch();
        assert_eq!(batch.len(), 2);
        assert!(queue.is_empty());

        for task in batch {
            assert!(task.resume());
        }
    }
}
