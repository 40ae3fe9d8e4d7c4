//! Operation objects: the bridge between a non-blocking system call and a
//! suspended task.
//!
//! An [`Operation`] is driven in three steps. [`ready`](Operation::ready)
//! tries the fast path and reports whether the result is already known;
//! otherwise [`suspend`](Operation::suspend) registers the task's waker so
//! exactly one event resumes it, and [`resume_value`](Operation::resume_value)
//! reads the outcome back. [`Op`] runs that protocol as a `Future`.
//!
//! With the readiness backends `suspend` arms the reactor and `resume_value`
//! performs the transfer. With the completion backend `suspend` hands an
//! owned copy of the call to the reactor: its poller waits for the
//! descriptor and its pool performs the call and wakes the task.
//! `resume_value` only collects the stored result.

use crate::error::{Error, Result};
use crate::reactor::{Interest, ReactorHandle};

use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

#[cfg(feature = "completion")]
use crate::reactor::poller::{Completion, FdGuard, Readiness};
#[cfg(feature = "completion")]
use parking_lot::Mutex;
#[cfg(feature = "completion")]
use std::sync::Arc;

pub trait Operation {
    type Output;

    /// Attempts the operation without suspending. `true` means the outcome
    /// is stored and `resume_value` returns it straight away.
    fn ready(&mut self) -> bool;

    /// Registers `waker` to be woken once. An error means nothing was
    /// registered.
    fn suspend(&mut self, waker: &Waker) -> Result<()>;

    /// Reads back the outcome after a wake-up. `Pending` means the wake-up
    /// was spurious and the operation has to be suspended again.
    fn resume_value(&mut self) -> Poll<Result<Self::Output>>;
}

/// Future that drives an [`Operation`] to completion.
#[must_use = "futures do nothing unless awaited"]
pub struct Op<O> {
    op: O,
    suspended: bool,
}

impl<O: Operation> Op<O> {
    pub fn new(op: O) -> Self {
        Self {
            op,
            suspended: false,
        }
    }

    pub fn get_ref(&self) -> &O {
        &self.op
    }
}

impl<O: Operation + Unpin> Future for Op<O> {
    type Output = Result<O::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.suspended && !this.op.ready() {
            this.op.suspend(cx.waker())?;
            this.suspended = true;
            return Poll::Pending;
        }

        match this.op.resume_value() {
            Poll::Ready(output) => Poll::Ready(output),
            Poll::Pending => {
                this.op.suspend(cx.waker())?;
                Poll::Pending
            }
        }
    }
}

pub(crate) fn would_block(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub(crate) mod sealed {
    use super::*;

    /// One kind of data transfer on a non-blocking descriptor.
    pub trait Transfer: Unpin {
        type Output;

        /// What the completion pool hands back.
        #[cfg(feature = "completion")]
        type Owned: Send + 'static;

        const NAME: &'static str;
        const INTEREST: Interest;

        /// One non-blocking attempt on borrowed buffers.
        fn attempt(&mut self, fd: RawFd) -> io::Result<Self::Output>;

        /// An owned copy of the call that a pool thread can retry.
        #[cfg(feature = "completion")]
        fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<Self::Owned> + Send>;

        /// Copies a pool result back into the borrowed buffers.
        #[cfg(feature = "completion")]
        fn complete(&mut self, owned: Self::Owned) -> Result<Self::Output>;
    }
}

use sealed::Transfer;

#[cfg(feature = "completion")]
struct Slot<T> {
    result: Option<Result<T>>,
    waker: Option<Waker>,
    /// The operation was dropped; a pending call must not consume data.
    abandoned: bool,
}

#[cfg(feature = "completion")]
type Detached<T> = Box<dyn FnMut(RawFd) -> io::Result<T> + Send>;

/// Watches `fd` and performs `call` on a pool thread once it is ready,
/// re-arming while the call would block. The outcome lands in `slot`.
#[cfg(feature = "completion")]
fn arm<T: Send + 'static>(
    completion: Completion,
    guard: FdGuard,
    fd: RawFd,
    interest: Interest,
    name: &'static str,
    mut call: Detached<T>,
    slot: Arc<Mutex<Slot<T>>>,
) -> Result<()> {
    if guard.is_cancelled() {
        return Err(Error::Closed(name));
    }

    let handle = completion.clone();
    completion.watch(fd, interest, move |readiness| {
        let result = match readiness {
            Readiness::Ready(_) => {
                if slot.lock().abandoned {
                    return;
                }

                match guard.run(|| call(fd)) {
                    None => Err(Error::Closed(name)),
                    Some(Err(error)) if would_block(&error) => {
                        let rearmed = arm(handle, guard, fd, interest, name, call, slot.clone());
                        match rearmed {
                            Ok(()) => return,
                            Err(error) => Err(error),
                        }
                    }
                    Some(Err(error)) => Err(Error::os(name, error)),
                    Some(Ok(owned)) => Ok(owned),
                }
            }
            Readiness::Cancelled | Readiness::Shutdown => Err(Error::Closed(name)),
        };

        let waker = {
            let mut slot = slot.lock();
            slot.result = Some(result);
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    })
}

/// A socket operation: one [`Transfer`](sealed::Transfer) bound to a
/// descriptor and the reactor that watches it.
pub struct Io<T: Transfer> {
    call: T,
    fd: RawFd,
    reactor: ReactorHandle,
    done: Option<Result<T::Output>>,
    #[cfg(feature = "completion")]
    inflight: Option<Arc<Mutex<Slot<T::Owned>>>>,
}

impl<T: Transfer> Io<T> {
    pub(crate) fn new(call: T, fd: RawFd, reactor: ReactorHandle) -> Self {
        Self {
            call,
            fd,
            reactor,
            done: None,
            #[cfg(feature = "completion")]
            inflight: None,
        }
    }

    /// Descriptor this operation targets.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Name reported in errors produced by this operation.
    pub fn name(&self) -> &'static str {
        T::NAME
    }

    pub(crate) fn into_op(self) -> Op<Self> {
        Op::new(self)
    }
}

impl<T: Transfer> Operation for Io<T> {
    type Output = T::Output;

    fn ready(&mut self) -> bool {
        match self.call.attempt(self.fd) {
            Ok(output) => self.done = Some(Ok(output)),
            Err(error) if would_block(&error) => return false,
            Err(error) => self.done = Some(Err(Error::os(T::NAME, error))),
        }

        true
    }

    #[cfg(not(feature = "completion"))]
    fn suspend(&mut self, waker: &Waker) -> Result<()> {
        self.reactor.try_add(self.fd, T::INTEREST, waker)
    }

    #[cfg(not(feature = "completion"))]
    fn resume_value(&mut self) -> Poll<Result<Self::Output>> {
        if let Some(done) = self.done.take() {
            return Poll::Ready(done);
        }

        match self.call.attempt(self.fd) {
            Ok(output) => Poll::Ready(Ok(output)),
            Err(error) if would_block(&error) => Poll::Pending,
            Err(error) => Poll::Ready(Err(Error::os(T::NAME, error))),
        }
    }

    #[cfg(feature = "completion")]
    fn suspend(&mut self, waker: &Waker) -> Result<()> {
        if let Some(slot) = &self.inflight {
            let mut slot = slot.lock();
            if slot.result.is_some() {
                waker.wake_by_ref();
            } else {
                slot.waker = Some(waker.clone());
            }
            return Ok(());
        }

        let slot = Arc::new(Mutex::new(Slot {
            result: None,
            waker: Some(waker.clone()),
            abandoned: false,
        }));

        let completion = self.reactor.completion();
        let guard = completion.guard(self.fd);
        let call = self.call.detach();

        arm(completion, guard, self.fd, T::INTEREST, T::NAME, call, slot.clone())?;

        self.inflight = Some(slot);
        Ok(())
    }

    #[cfg(feature = "completion")]
    fn resume_value(&mut self) -> Poll<Result<Self::Output>> {
        if let Some(done) = self.done.take() {
            return Poll::Ready(done);
        }

        let Some(slot) = &self.inflight else {
            return Poll::Pending;
        };

        let result = slot.lock().result.take();
        match result {
            None => Poll::Pending,
            Some(result) => {
                self.inflight = None;
                Poll::Ready(result.and_then(|owned| self.call.complete(owned)))
            }
        }
    }
}

#[cfg(feature = "completion")]
impl<T: Transfer> Drop for Io<T> {
    fn drop(&mut self) {
        if let Some(slot) = &self.inflight {
            slot.lock().abandoned = true;
        }
    }
}
