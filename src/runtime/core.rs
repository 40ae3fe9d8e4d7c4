//! The runtime: a ready queue, a reactor, a timer set and a scheduler driven
//! from the thread that calls [`Runtime::block_on`].

use crate::builder::RuntimeBuilder;
use crate::error::Result;
use crate::reactor::{Reactor, ReactorConfig, ReactorHandle};
use crate::runtime::TaskQueue;
use crate::runtime::context::{self, Handle};
use crate::sched::{Mailbox, Scheduler};
use crate::task::{JoinHandle, Task};
use crate::time::Timers;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

/// Main async runtime.
///
/// `block_on` drives one future to completion on the calling thread while
/// running spawned tasks, tasks switched onto this thread, reactor
/// readiness and timers.
pub struct Runtime {
    handle: Arc<Handle>,
    max_park: Duration,
}

/// Waker of the future passed to `block_on`.
struct MainWaker {
    notified: AtomicBool,
    reactor: Weak<Reactor>,
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.notified.swap(true, Ordering::AcqRel)
            && let Some(reactor) = self.reactor.upgrade()
            && let Err(error) = reactor.notify()
        {
            warn!("failed to wake the reactor: {}", error);
        }
    }
}

/// Detaches the reactor wake-up from this thread's mailbox when `block_on`
/// returns.
struct MailboxHook<'a>(&'a Mailbox);

impl<'a> MailboxHook<'a> {
    fn install(mailbox: &'a Mailbox, reactor: &ReactorHandle) -> Self {
        let reactor = Arc::downgrade(reactor);

        mailbox.queue().set_hook(Some(Box::new(move || {
            if let Some(reactor) = reactor.upgrade()
                && let Err(error) = reactor.notify()
            {
                warn!("failed to wake the reactor: {}", error);
            }
        })));

        Self(mailbox)
    }
}

impl Drop for MailboxHook<'_> {
    fn drop(&mut self) {
        self.0.queue().set_hook(None);
    }
}

impl Runtime {
    /// A runtime with the default configuration.
    pub fn new() -> Result<Self> {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn from_parts(
        config: &ReactorConfig,
        mailbox_capacity: usize,
        max_park: Duration,
    ) -> Result<Self> {
        let reactor = Arc::new(Reactor::with_config(config)?);
        let queue = Arc::new(TaskQueue::new(Arc::downgrade(&reactor)));

        debug!("runtime started on the {} backend", Reactor::BACKEND);

        Ok(Self {
            handle: Arc::new(Handle {
                queue,
                reactor,
                timers: Arc::new(Mutex::new(Timers::new())),
                scheduler: Scheduler::with_capacity(mailbox_capacity),
            }),
            max_park,
        })
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.handle.reactor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.handle.scheduler
    }

    /// Spawns a task on this runtime. It first runs inside the next
    /// `block_on` turn.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = Task::new(future, self.handle.queue.clone());
        self.handle.queue.push(task);

        handle
    }

    /// Runs `future` to completion on the calling thread.
    ///
    /// The calling thread is attached to the runtime's scheduler for the
    /// duration of the call, so tasks can switch onto it. Once `future`
    /// completes, tasks already queued are run once more before returning.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mailbox = self.handle.scheduler.attach();
        let _hook = MailboxHook::install(&mailbox, &self.handle.reactor);

        context::enter(self.handle.clone(), || {
            let main = Arc::new(MainWaker {
                notified: AtomicBool::new(true),
                reactor: Arc::downgrade(&self.handle.reactor),
            });
            let waker = Waker::from(main.clone());
            let mut cx = Context::from_waker(&waker);
            let mut future = pin!(future);
            let mut ready = Vec::new();

            loop {
                if main.notified.swap(false, Ordering::AcqRel)
                    && let Poll::Ready(output) = future.as_mut().poll(&mut cx)
                {
                    self.run_queued();
                    return output;
                }

                self.run_queued();
                mailbox.drain(&mut |first, second| {
                    trace!("runtime: unhandled words ({}, {})", first, second);
                });
                self.fire_timers();

                let timeout = self.park_timeout(&main, &mailbox);

                if let Err(error) = self.handle.reactor.wait(Some(timeout), &mut ready) {
                    warn!("reactor wait failed: {}", error);
                }

                for waker in ready.drain(..) {
                    waker.wake();
                }

                self.fire_timers();
            }
        })
    }

    fn run_queued(&self) {
        for task in self.handle.queue.take_batch() {
            task.resume();
        }
    }

    fn fire_timers(&self) {
        let expired = self.handle.timers.lock().expire(Instant::now());

        for waker in expired {
            waker.wake();
        }
    }

    fn park_timeout(&self, main: &MainWaker, mailbox: &Mailbox) -> Duration {
        if main.notified.load(Ordering::Acquire)
            || !self.handle.queue.is_empty()
            || !mailbox.is_empty()
        {
            return Duration::ZERO;
        }

        match self.handle.timers.lock().next_remaining(Instant::now()) {
            Some(remaining) => remaining.min(self.max_park),
            None => self.max_park,
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(error) = self.handle.scheduler.shutdown() {
            warn!("runtime shutdown: {}", error);
        }
    }
}
