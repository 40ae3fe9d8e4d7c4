//! Thread-targeted scheduling.
//!
//! Every participating thread owns a bounded [`Mailbox`] registered under its
//! [`ThreadId`]. A task running inside the runtime can move its own
//! execution to another thread by awaiting [`Scheduler::switch_to`]: the
//! task suspends, is posted to the target's mailbox, and continues there
//! once that thread dispatches it.
//!
//! ```ignore
//! let scheduler = runtime.scheduler().clone();
//! let worker = scheduler.spawn_worker("io")?;
//!
//! runtime.block_on(async move {
//!     Task::spawn(async move {
//!         scheduler.switch_to(worker.id()).await?;
//!         assert_eq!(ThreadId::current(), worker.id());
//!         Ok::<_, ScheduleError>(())
//!     })
//!     .await
//! })?;
//! ```
//!
//! Posting never blocks and never retries: a full mailbox is reported back
//! to the caller, a mailbox whose thread has exited is an error.

mod mailbox;
mod queue;
mod registry;
mod thread_id;
mod worker;

pub use mailbox::Mailbox;
pub use queue::{DEFAULT_CAPACITY, Delivery, Message};
pub use thread_id::ThreadId;
pub use worker::Worker;

pub(crate) use queue::{MessageQueue, Permit};
pub(crate) use registry::ThreadRegistry;

use crate::error::ScheduleError;
use crate::runtime::context;
use crate::task::{self, JoinHandle, Task};

use log::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

struct Inner {
    registry: Arc<ThreadRegistry>,
    capacity: usize,
    background: Mutex<Option<Worker>>,
}

/// Handle to a set of threads reachable by identity.
///
/// Cloning is cheap; all clones share one registry and one background worker.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A scheduler whose threads get mailboxes with room for `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(ThreadRegistry::new()),
                capacity: capacity.max(1),
                background: Mutex::new(None),
            }),
        }
    }

    /// The scheduler of the runtime driving the calling thread.
    pub fn current() -> Option<Scheduler> {
        context::current_scheduler()
    }

    /// Registers the calling thread so others can post to it.
    pub fn attach(&self) -> Mailbox {
        let (id, queue) = self.inner.registry.attach_current(self.inner.capacity);
        Mailbox::new(id, queue)
    }

    pub fn is_registered(&self, thread: ThreadId) -> bool {
        self.inner.registry.contains(thread)
    }

    /// Enqueues `message` for `thread` and wakes it if it is waiting.
    pub fn post(&self, thread: ThreadId, message: Message) -> Result<Delivery, ScheduleError> {
        self.lookup(thread)?
            .post(message)
            .map_err(|_| ScheduleError::ThreadNotRegistered(thread))
    }

    /// Suspends the current task and resumes it on `thread`.
    ///
    /// Resolves to `Ok(true)` once running on `thread`, `Ok(false)` without
    /// suspending if the target mailbox is full.
    pub fn switch_to(&self, thread: ThreadId) -> SwitchTo {
        SwitchTo {
            scheduler: self.clone(),
            target: Target::Thread(thread),
            requested: false,
        }
    }

    /// Like [`switch_to`](Self::switch_to), targeting the background worker.
    pub fn switch_to_background(&self) -> SwitchTo {
        SwitchTo {
            scheduler: self.clone(),
            target: Target::Background,
            requested: false,
        }
    }

    /// Spawns `future` as a task that lives on `thread`: its first poll and
    /// every later wake-up happen there.
    ///
    /// The task belongs to the target mailbox from the start, so a full
    /// mailbox does not refuse it.
    pub fn spawn_on<F, T>(&self, thread: ThreadId, future: F) -> Result<JoinHandle<T>, ScheduleError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queue = self.lookup(thread)?;
        let (task, handle) = Task::new(future, queue.clone());

        queue
            .push_task(task)
            .map_err(|_| ScheduleError::ThreadNotRegistered(thread))?;

        Ok(handle)
    }

    /// Starts a dedicated thread that runs tasks delivered to it.
    pub fn spawn_worker(&self, name: impl Into<String>) -> Result<Worker, ScheduleError> {
        Worker::spawn(name.into(), self.inner.registry.clone(), self.inner.capacity)
    }

    /// Identity of the background worker, started on first use.
    pub fn background(&self) -> Result<ThreadId, ScheduleError> {
        let mut background = self.inner.background.lock();

        if let Some(worker) = background.as_ref() {
            return Ok(worker.id());
        }

        let worker = self.spawn_worker("strand-background")?;
        let id = worker.id();
        *background = Some(worker);

        Ok(id)
    }

    /// Stops and joins the background worker, if it was started.
    pub fn shutdown(&self) -> Result<(), ScheduleError> {
        let worker = self.inner.background.lock().take();

        match worker {
            Some(mut worker) => worker.join(),
            None => Ok(()),
        }
    }

    fn lookup(&self, thread: ThreadId) -> Result<Arc<MessageQueue>, ScheduleError> {
        self.inner
            .registry
            .lookup(thread)
            .ok_or(ScheduleError::ThreadNotRegistered(thread))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

enum Target {
    Thread(ThreadId),
    Background,
}

/// Future returned by [`Scheduler::switch_to`] and
/// [`Scheduler::switch_to_background`].
///
/// A mailbox slot is reserved before the task suspends, so once it has
/// suspended the delivery cannot fail.
#[must_use = "futures do nothing unless awaited"]
pub struct SwitchTo {
    scheduler: Scheduler,
    target: Target,
    requested: bool,
}

impl Future for SwitchTo {
    type Output = Result<bool, ScheduleError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.requested {
            return Poll::Ready(Ok(true));
        }

        let thread = match self.target {
            Target::Thread(thread) => thread,
            Target::Background => self.scheduler.background()?,
        };

        if thread == ThreadId::current() {
            return Poll::Ready(Ok(true));
        }

        let queue = self.scheduler.lookup(thread)?;
        let permit = match queue.reserve() {
            Ok(Some(permit)) => permit,
            Ok(None) => return Poll::Ready(Ok(false)),
            Err(()) => return Poll::Ready(Err(ScheduleError::ThreadNotRegistered(thread))),
        };

        if !task::redirect_current(permit, cx.waker()) {
            return Poll::Ready(Err(ScheduleError::NoCurrentTask));
        }

        trace!("switching to thread {}", thread);
        self.requested = true;
        Poll::Pending
    }
}
