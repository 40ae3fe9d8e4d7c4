//! Tasks: suspended computations with an exactly-once resume contract.
//!
//! A [`Task`] is a move-only handle to a spawned future. Whoever holds the
//! handle may [`resume`](Task::resume) it, which polls the future on the
//! calling thread until its next suspension point or completion. While the
//! future is suspended the task is owned by exactly one pending registration:
//! a ready queue, a thread mailbox, or a waker parked in the reactor, a
//! synchronization primitive or a channel.
//!
//! # Spawning
//!
//! ```ignore
//! use strand::Task;
//!
//! async fn spawn_example() {
//!     let handle = Task::spawn(async { 40 + 2 });
//!     assert_eq!(handle.await, 42);
//! }
//! ```
//!
//! # State machine
//!
//! ```text
//!  IDLE --wake--> SCHEDULED --resume--> RUNNING --Pending--> IDLE
//!                                          |  \--wake--> NOTIFIED --Pending--> SCHEDULED
//!                                          \--Ready--> COMPLETE
//! ```
//!
//! A wake that lands while the task is running is remembered (`NOTIFIED`) and
//! the task is rescheduled as soon as the poll returns, so no wake-up is lost
//! and the task is never polled by two threads at once.
//!
//! Every task has a home: the queue its wake-ups are delivered to. A thread
//! switch installs a one-shot redirect carrying a reserved mailbox slot; the
//! next dispatch consumes it and makes the target thread the new home.

use crate::error::TaskError;
use crate::runtime::context;
use crate::runtime::make_waker;
use crate::sched::Permit;

use log::trace;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Where a woken task goes to wait for its next resume.
pub(crate) trait Schedule: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Type-erased future storage behind a task header.
trait Runnable: Send + Sync {
    fn poll(&self, cx: &mut Context<'_>) -> Poll<()>;

    /// Drops the future without running it to completion.
    fn cancel(&self);
}

pub(crate) struct Header {
    state: AtomicU8,
    home: Mutex<Arc<dyn Schedule>>,
    redirect: Mutex<Option<Permit>>,
    body: Arc<dyn Runnable>,
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Header>>> = const { RefCell::new(None) };
}

impl Header {
    /// Handles a wake-up coming from a `Waker`.
    pub(crate) fn wake(header: &Arc<Header>) {
        let mut state = header.state.load(Ordering::Acquire);

        loop {
            let next = match state {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };

            match header
                .state
                .compare_exchange_weak(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if next == SCHEDULED => {
                    Header::dispatch(header);
                    return;
                }
                Ok(_) => return,
                Err(actual) => state = actual,
            }
        }
    }

    /// Hands a `SCHEDULED` task to its redirect target, or to its home.
    fn dispatch(header: &Arc<Header>) {
        let task = Task {
            header: Arc::clone(header),
        };

        let redirect = header.redirect.lock().take();

        match redirect {
            Some(permit) => {
                if let Some(target) = permit.target() {
                    *header.home.lock() = target;
                }
                permit.send_task(task);
            }
            None => {
                let home = header.home.lock().clone();
                home.schedule(task);
            }
        }
    }
}

impl Drop for Header {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) != COMPLETE {
            self.body.cancel();
        }
    }
}

/// An opaque, move-only handle to a suspended computation.
///
/// See the [module documentation](self) for the ownership rules.
pub struct Task {
    pub(crate) header: Arc<Header>,
}

impl Task {
    pub(crate) fn new<F, T>(future: F, home: Arc<dyn Schedule>) -> (Task, JoinHandle<T>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let core = Arc::new(Core {
            future: Mutex::new(Some(Box::pin(future))),
            output: Mutex::new(Output::Pending),
            waiters: Mutex::new(Vec::new()),
        });

        let task = Task {
            header: Arc::new(Header {
                state: AtomicU8::new(SCHEDULED),
                home: Mutex::new(home),
                redirect: Mutex::new(None),
                body: core.clone(),
            }),
        };

        (task, JoinHandle { core })
    }

    /// Spawns a task on the runtime driving the current thread.
    ///
    /// The task is queued immediately and first polled by the runtime loop.
    ///
    /// # Panics
    /// Panics if called outside of [`Runtime::block_on`](crate::Runtime::block_on).
    pub fn spawn<F, T>(future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queue = context::current_queue()
            .expect("Task::spawn() called outside of a runtime context");

        let (task, handle) = Task::new(future, queue.clone());
        queue.push(task);

        handle
    }

    /// Continues the computation on the calling thread until it suspends or
    /// completes.
    ///
    /// Returns `false` without doing anything if the task is already running
    /// elsewhere or has completed.
    pub fn resume(&self) -> bool {
        if !self.try_start() {
            return false;
        }

        let waker = make_waker(self.header.clone());
        let mut cx = Context::from_waker(&waker);

        let previous = CURRENT_TASK.with(|cell| cell.replace(Some(self.header.clone())));
        let poll = self.header.body.poll(&mut cx);
        CURRENT_TASK.with(|cell| *cell.borrow_mut() = previous);

        match poll {
            Poll::Ready(()) => {
                self.header.state.store(COMPLETE, Ordering::Release);
                self.header.redirect.lock().take();
            }
            Poll::Pending => self.finish_pending(),
        }

        true
    }

    /// Whether the computation has run to completion.
    pub fn is_complete(&self) -> bool {
        self.header.state.load(Ordering::Acquire) == COMPLETE
    }

    /// Releases the computation without running it further.
    ///
    /// Fails if the task is in the middle of a resume on some thread.
    pub fn destroy(self) -> Result<(), TaskError> {
        let mut state = self.header.state.load(Ordering::Acquire);

        loop {
            match state {
                RUNNING | NOTIFIED => return Err(TaskError::Running),
                COMPLETE => return Ok(()),
                _ => {}
            }

            match self.header.state.compare_exchange_weak(
                state,
                COMPLETE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => state = actual,
            }
        }

        self.header.body.cancel();
        self.header.redirect.lock().take();

        Ok(())
    }

    fn try_start(&self) -> bool {
        let mut state = self.header.state.load(Ordering::Acquire);

        loop {
            if state != IDLE && state != SCHEDULED {
                return false;
            }

            match self.header.state.compare_exchange_weak(
                state,
                RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    fn finish_pending(&self) {
        if self
            .header
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }

        // Woken while running: reschedule straight away.
        self.header.state.store(SCHEDULED, Ordering::Release);
        Header::dispatch(&self.header);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("addr", &Arc::as_ptr(&self.header))
            .field("state", &self.header.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// Installs a one-shot redirect on the task currently being resumed and
/// requests a reschedule, so the task moves to wherever the permit delivers
/// it and stays there.
///
/// Returns `false` if no task is running on this thread.
pub(crate) fn redirect_current(permit: Permit, waker: &Waker) -> bool {
    CURRENT_TASK.with(|cell| match cell.borrow().as_ref() {
        Some(header) => {
            *header.redirect.lock() = Some(permit);
            trace!("task {:p} redirected", Arc::as_ptr(header));
            waker.wake_by_ref();
            true
        }
        None => false,
    })
}

enum Output<T> {
    Pending,
    Ready(T),
    Taken,
    Cancelled,
}

struct Core<T> {
    future: Mutex<Option<BoxFuture<T>>>,
    output: Mutex<Output<T>>,
    waiters: Mutex<Vec<Waker>>,
}

impl<T> Core<T> {
    fn notify_waiters(&self) {
        let waiters = std::mem::take(&mut *self.waiters.lock());

        for waker in waiters {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> Runnable for Core<T> {
    fn poll(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut slot = self.future.lock();

        let Some(future) = slot.as_mut() else {
            return Poll::Ready(());
        };

        match future.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(value) => {
                *slot = None;
                drop(slot);

                *self.output.lock() = Output::Ready(value);
                self.notify_waiters();

                Poll::Ready(())
            }
        }
    }

    fn cancel(&self) {
        let future = self.future.lock().take();
        drop(future);

        let mut output = self.output.lock();
        if matches!(*output, Output::Pending) {
            *output = Output::Cancelled;
            drop(output);
            self.notify_waiters();
        }
    }
}

/// A future that resolves to the output of a spawned task.
///
/// # Panics
/// Polling panics if the task was destroyed before it completed, or if the
/// output was already taken.
pub struct JoinHandle<T> {
    core: Arc<Core<T>>,
}

impl<T> JoinHandle<T> {
    /// Whether the task has produced its output.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.core.output.lock(), Output::Pending)
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut output = self.core.output.lock();

        match std::mem::replace(&mut *output, Output::Taken) {
            Output::Ready(value) => Poll::Ready(value),
            Output::Pending => {
                *output = Output::Pending;
                // Registered under the output lock, so completion cannot slip in between.
                self.core.waiters.lock().push(cx.waker().clone());
                Poll::Pending
            }
            Output::Cancelled => panic!("task was destroyed before completing"),
            Output::Taken => panic!("task output already taken"),
        }
    }
}

/// A helper to collect multiple [`JoinHandle`]s and await all of them at once.
pub struct JoinSet<T> {
    handles: Vec<JoinHandle<T>>,
}

impl<T> JoinSet<T> {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: JoinHandle<T>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Awaits every handle in insertion order and returns their outputs.
    pub async fn await_all(&mut self) -> Vec<T> {
        let mut outputs = Vec::with_capacity(self.handles.len());

        for handle in self.handles.drain(..) {
            outputs.push(handle.await);
        }

        outputs
    }
}

impl<T> Default for JoinSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        scheduled: Mutex<Vec<Task>>,
    }

    impl Schedule for Recorder {
        fn schedule(&self, task: Task) {
            self.scheduled.lock().push(task);
        }
    }

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }

            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn resume_runs_to_completion() {
        let home = Arc::new(Recorder::default());
        let (task, mut handle) = Task::new(async { 7 }, home.clone());

        assert!(!task.is_complete());
        assert!(task.resume());
        assert!(task.is_complete());
        assert!(!task.resume(), "completed task must not run again");
        assert!(handle.is_finished());

        let mut cx = Context::from_waker(Waker::noop());
        assert_eq!(Pin::new(&mut handle).poll(&mut cx), Poll::Ready(7));
    }

    #[test]
    fn wake_while_running_reschedules_once() {
        let home = Arc::new(Recorder::default());
        let (task, _handle) = Task::new(YieldOnce(false), home.clone());

        assert!(task.resume());
        assert!(!task.is_complete());

        let rescheduled = home.scheduled.lock().pop().expect("task rescheduled");
        assert!(home.scheduled.lock().is_empty());

        assert!(rescheduled.resume());
        assert!(rescheduled.is_complete());
    }

    #[test]
    fn destroy_drops_future() {
        struct Guard(Arc<AtomicUsize>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let guard = Guard(dropped.clone());
        let home = Arc::new(Recorder::default());
        let (task, handle) = Task::new(
            async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            },
            home,
        );

        assert!(task.destroy().is_ok());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }
}
