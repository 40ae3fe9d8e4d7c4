//! Bounded per-thread message queue.
//!
//! Posting never blocks: a full queue hands the message back to the caller.
//! Capacity can be reserved ahead of time with a [`Permit`], which is how a
//! task switch guarantees its delivery cannot fail once it has suspended.

use crate::task::{Schedule, Task};

use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of slots in a thread's mailbox.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A unit of work delivered to a thread's mailbox.
pub enum Message {
    /// A task to be resumed on the receiving thread.
    Resume(Task),
    /// Two user-defined words.
    Words(u32, u32),
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Resume(task) => f.debug_tuple("Resume").field(task).finish(),
            Message::Words(a, b) => f.debug_tuple("Words").field(a).field(b).finish(),
        }
    }
}

/// Outcome of posting to a live mailbox.
#[derive(Debug)]
pub enum Delivery {
    Sent,
    /// The mailbox had no room; the message is handed back for a retry.
    Full(Message),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

type NotifyHook = Box<dyn Fn() + Send + Sync>;

struct State {
    messages: VecDeque<Message>,
    reserved: usize,
    closed: bool,
    interrupted: bool,
}

pub(crate) struct MessageQueue {
    state: Mutex<State>,
    available: Condvar,
    capacity: usize,
    hook: Mutex<Option<NotifyHook>>,
}

impl MessageQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            state: Mutex::new(State {
                messages: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                reserved: 0,
                closed: false,
                interrupted: false,
            }),
            available: Condvar::new(),
            capacity,
            hook: Mutex::new(None),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Enqueues without blocking. `Err` hands the message back when the
    /// owning thread has already exited.
    pub(crate) fn post(&self, message: Message) -> Result<Delivery, Message> {
        {
            let mut state = self.state.lock();

            if state.closed {
                return Err(message);
            }

            if state.messages.len() + state.reserved >= self.capacity {
                return Ok(Delivery::Full(message));
            }

            state.messages.push_back(message);
        }

        self.signal();
        Ok(Delivery::Sent)
    }

    /// Enqueues a task owned by this mailbox, ignoring the capacity bound.
    /// `Err` hands the task back when the owning thread has exited.
    pub(crate) fn push_task(&self, task: Task) -> Result<(), Task> {
        {
            let mut state = self.state.lock();

            if state.closed {
                return Err(task);
            }

            state.messages.push_back(Message::Resume(task));
        }

        self.signal();
        Ok(())
    }

    /// Reserves one slot. `Ok(None)` means the queue is full right now.
    pub(crate) fn reserve(self: &Arc<Self>) -> Result<Option<Permit>, ()> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(());
        }

        if state.messages.len() + state.reserved >= self.capacity {
            return Ok(None);
        }

        state.reserved += 1;

        Ok(Some(Permit {
            queue: Some(self.clone()),
        }))
    }

    /// Dequeues the oldest message, if any.
    pub(crate) fn pop(&self) -> Option<Message> {
        self.state.lock().messages.pop_front()
    }

    /// Blocks until a message is queued, [`interrupt`](Self::interrupt) is
    /// called, or the timeout elapses. Returns whether a message is waiting.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();

        if state.messages.is_empty() && !state.interrupted && !state.closed {
            match timeout {
                Some(duration) if duration.is_zero() => {}
                Some(duration) => {
                    self.available.wait_for(&mut state, duration);
                }
                None => {
                    while state.messages.is_empty() && !state.interrupted && !state.closed {
                        self.available.wait(&mut state);
                    }
                }
            }
        }

        state.interrupted = false;
        !state.messages.is_empty()
    }

    /// Wakes a thread blocked in [`wait`](Self::wait) without posting.
    pub(crate) fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.signal();
    }

    /// Installs a callback invoked after every enqueue, used by a runtime
    /// that parks in its reactor instead of on the queue.
    pub(crate) fn set_hook(&self, hook: Option<NotifyHook>) {
        *self.hook.lock() = hook;
    }

    /// Refuses further posts and returns whatever was still queued.
    pub(crate) fn close(&self) -> Vec<Message> {
        let drained: Vec<Message> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.messages.drain(..).collect()
        };

        self.available.notify_all();
        drained
    }

    fn signal(&self) {
        self.available.notify_one();

        if let Some(hook) = self.hook.lock().as_ref() {
            hook();
        }
    }

    fn release(&self, message: Option<Message>) {
        let rejected = {
            let mut state = self.state.lock();
            state.reserved -= 1;

            match message {
                Some(message) if !state.closed => {
                    state.messages.push_back(message);
                    None
                }
                other => other,
            }
        };

        match rejected {
            Some(message) => debug!("mailbox closed, dropping {:?}", message),
            None => self.signal(),
        }
    }
}

/// Wake-ups of tasks homed on a thread land in that thread's mailbox.
///
/// The task already belongs to the mailbox, so its return is never refused
/// for lack of room and never waits. A mailbox whose thread has exited drops
/// the task.
impl Schedule for MessageQueue {
    fn schedule(&self, task: Task) {
        if let Err(task) = self.push_task(task) {
            debug!("mailbox closed, dropping {:?}", task);
        }
    }
}

/// One reserved mailbox slot. Dropping an unused permit gives the slot back.
pub(crate) struct Permit {
    queue: Option<Arc<MessageQueue>>,
}

impl Permit {
    pub(crate) fn send(mut self, message: Message) {
        if let Some(queue) = self.queue.take() {
            queue.release(Some(message));
        }
    }

    pub(crate) fn send_task(self, task: Task) {
        self.send(Message::Resume(task));
    }

    /// The mailbox this permit delivers to, as a task home.
    pub(crate) fn target(&self) -> Option<Arc<dyn Schedule>> {
        self.queue
            .as_ref()
            .map(|queue| queue.clone() as Arc<dyn Schedule>)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release(None);
        }
    }
}
