use super::queue::{Message, MessageQueue};
use super::thread_id::ThreadId;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// The receiving end of the calling thread's message queue.
///
/// Obtained from [`Scheduler::attach`](super::Scheduler::attach). The handle
/// is tied to the thread that attached and cannot be sent elsewhere.
pub struct Mailbox {
    id: ThreadId,
    queue: Arc<MessageQueue>,
    _thread_bound: PhantomData<*const ()>,
}

impl Mailbox {
    pub(crate) fn new(id: ThreadId, queue: Arc<MessageQueue>) -> Self {
        Self {
            id,
            queue,
            _thread_bound: PhantomData,
        }
    }

    /// Identity other threads use to reach this mailbox.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dequeues the oldest message without blocking.
    pub fn peek(&self) -> Option<Message> {
        self.queue.pop()
    }

    /// Blocks until a message arrives or `timeout` elapses (`None` waits
    /// forever, zero only checks). Returns whether a message is waiting.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.queue.wait(timeout)
    }

    /// Runs a delivered task on this thread. Word messages are handed back.
    pub fn dispatch(&self, message: Message) -> Option<(u32, u32)> {
        match message {
            Message::Resume(task) => {
                task.resume();
                None
            }
            Message::Words(first, second) => Some((first, second)),
        }
    }

    /// Waits once, then dispatches everything queued. Word messages go to
    /// `on_words`. Returns the number of tasks resumed.
    pub fn turn<F>(&self, timeout: Option<Duration>, mut on_words: F) -> usize
    where
        F: FnMut(u32, u32),
    {
        if !self.queue.wait(timeout) {
            return 0;
        }

        self.drain(&mut on_words)
    }

    pub(crate) fn drain<F>(&self, on_words: &mut F) -> usize
    where
        F: FnMut(u32, u32),
    {
        let mut resumed = 0;

        while let Some(message) = self.queue.pop() {
            match self.dispatch(message) {
                Some((first, second)) => on_words(first, second),
                None => resumed += 1,
            }
        }

        resumed
    }

    pub(crate) fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }
}
