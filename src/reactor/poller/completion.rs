//! Completion-callback backend.
//!
//! A single poller thread multiplexes every in-flight operation with
//! `poll(2)`. When a descriptor becomes ready its callback is handed to a
//! pool of worker threads, which perform the system call, store the result
//! and wake the task. Delivery is push based, so [`Reactor::wait`] never
//! reports ready tasks: it only parks the caller until [`Reactor::notify`]
//! or the timeout.
//!
//! Each descriptor carries a [`FdGuard`]. `remove` cancels it and waits for
//! any call already running on the descriptor, so once the socket closes no
//! queued callback can touch a reused descriptor number.

use crate::error::{Error, Result};
use crate::reactor::registration::Registration;
use crate::reactor::{Interest, ReactorConfig};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Waker;
use std::thread;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;
type OnReady = Box<dyn FnOnce(Readiness) + Send + 'static>;

/// Why a watch callback runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// The descriptor reported these directions.
    Ready(Interest),
    /// The descriptor was removed from the reactor.
    Cancelled,
    /// The reactor is shutting down.
    Shutdown,
}

/// Cancellation flag for one descriptor.
///
/// Calls run under the read side; cancelling takes the write side, so it
/// waits for a call in progress and every later call is refused.
#[derive(Clone, Default)]
pub(crate) struct FdGuard(Arc<RwLock<bool>>);

impl FdGuard {
    /// Runs `call` unless the descriptor has been removed.
    pub(crate) fn run<R>(&self, call: impl FnOnce() -> R) -> Option<R> {
        let cancelled = self.0.read();
        if *cancelled {
            return None;
        }

        Some(call())
    }

    fn cancel(&self) {
        *self.0.write() = true;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.0.read()
    }
}

struct Watch {
    id: u64,
    fd: RawFd,
    interest: Interest,
    on_ready: OnReady,
}

/// Self-pipe that interrupts the poller when the watch list changes.
struct Wakeup {
    read: RawFd,
    write: RawFd,
    signaled: AtomicBool,
}

impl Wakeup {
    fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(Error::last_os("pipe"));
        }

        let wakeup = Self {
            read: fds[0],
            write: fds[1],
            signaled: AtomicBool::new(false),
        };

        for fd in fds {
            let configured = unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) >= 0
                    && libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) >= 0
            };

            if !configured {
                return Err(Error::last_os("fcntl"));
            }
        }

        Ok(wakeup)
    }

    fn signal(&self) {
        if self.signaled.swap(true, Ordering::AcqRel) {
            return;
        }

        let byte = 1u8;
        let written = unsafe { libc::write(self.write, &byte as *const u8 as *const _, 1) };

        if written < 0 {
            let error = io::Error::last_os_error();
            // A full pipe is still readable, so the poller will wake.
            if error.kind() != io::ErrorKind::WouldBlock {
                warn!("completion: failed to wake the poller: {}", error);
            }
        }
    }

    fn drain(&self) {
        self.signaled.store(false, Ordering::Release);

        let mut buf = [0u8; 64];
        while unsafe { libc::read(self.read, buf.as_mut_ptr() as *mut _, buf.len()) } > 0 {}
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
    watches: Mutex<Vec<Watch>>,
    next_watch: AtomicU64,
    guards: Mutex<HashMap<RawFd, FdGuard>>,
    wakeup: Wakeup,
}

impl Shared {
    fn work(&self) {
        loop {
            let job = {
                let mut jobs = self.jobs.lock();

                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }

                    if let Some(job) = jobs.pop_front() {
                        break job;
                    }

                    self.available.wait(&mut jobs);
                }
            };

            job();
        }
    }

    fn dispatch(&self, job: Job) {
        self.jobs.lock().push_back(job);
        self.available.notify_one();
    }

    fn poll(&self) {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut ids: Vec<u64> = Vec::new();

        while !self.shutdown.load(Ordering::Acquire) {
            fds.clear();
            ids.clear();

            fds.push(libc::pollfd {
                fd: self.wakeup.read,
                events: libc::POLLIN,
                revents: 0,
            });

            for watch in self.watches.lock().iter() {
                fds.push(libc::pollfd {
                    fd: watch.fd,
                    events: poll_events(watch.interest),
                    revents: 0,
                });
                ids.push(watch.id);
            }

            let count = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };

            if count < 0 {
                let error = io::Error::last_os_error();
                if error.kind() != io::ErrorKind::Interrupted {
                    warn!("completion: poll failed: {}", error);
                }
                continue;
            }

            if fds[0].revents != 0 {
                self.wakeup.drain();
            }

            let fired: HashMap<u64, Interest> = fds[1..]
                .iter()
                .zip(&ids)
                .filter_map(|(entry, id)| fired_interest(entry.revents).map(|fired| (*id, fired)))
                .collect();

            if fired.is_empty() {
                continue;
            }

            let ready: Vec<(Watch, Interest)> = {
                let mut watches = self.watches.lock();
                let (ready, waiting) = watches
                    .drain(..)
                    .partition::<Vec<_>, _>(|watch| fired.contains_key(&watch.id));
                *watches = waiting;

                ready
                    .into_iter()
                    .map(|watch| {
                        let fired = fired[&watch.id];
                        (watch, fired)
                    })
                    .collect()
            };

            for (watch, fired) in ready {
                trace!("completion: fd {} ready for {:?}", watch.fd, fired);
                // Errors and hangups fire every watched direction so the call
                // itself reports the failure.
                let fired = if fired.is_empty() { watch.interest } else { fired & watch.interest };
                let on_ready = watch.on_ready;
                self.dispatch(Box::new(move || on_ready(Readiness::Ready(fired))));
            }
        }
    }

    fn take_watches(&self, fd: Option<RawFd>) -> Vec<Watch> {
        let mut watches = self.watches.lock();
        let (taken, kept) = watches
            .drain(..)
            .partition::<Vec<_>, _>(|watch| fd.is_none_or(|fd| watch.fd == fd));
        *watches = kept;
        taken
    }
}

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

/// Directions reported by `revents`; an empty set stands for an error
/// condition, `None` for nothing at all.
fn fired_interest(revents: libc::c_short) -> Option<Interest> {
    if revents == 0 {
        return None;
    }

    if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Some(Interest::empty());
    }

    let mut fired = Interest::empty();
    if revents & libc::POLLIN != 0 {
        fired |= Interest::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        fired |= Interest::WRITABLE;
    }

    (!fired.is_empty()).then_some(fired)
}

/// Handle used by operations to queue work on the backend.
#[derive(Clone)]
pub(crate) struct Completion(Arc<Shared>);

impl Completion {
    /// Runs `on_ready` once `fd` is ready for one of `interest`, or with
    /// `Cancelled`/`Shutdown` if that never happens.
    pub(crate) fn watch<F>(&self, fd: RawFd, interest: Interest, on_ready: F) -> Result<()>
    where
        F: FnOnce(Readiness) + Send + 'static,
    {
        if self.0.shutdown.load(Ordering::Acquire) {
            return Err(Error::Closed("watch"));
        }

        let id = self.0.next_watch.fetch_add(1, Ordering::Relaxed);
        self.0.watches.lock().push(Watch {
            id,
            fd,
            interest,
            on_ready: Box::new(on_ready),
        });
        self.0.wakeup.signal();

        Ok(())
    }

    /// The cancellation flag of `fd`, created on first use.
    pub(crate) fn guard(&self, fd: RawFd) -> FdGuard {
        self.0.guards.lock().entry(fd).or_default().clone()
    }
}

pub struct Reactor {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    registrations: Arc<Mutex<HashMap<RawFd, Registration>>>,
    parked: Mutex<bool>,
    unpark: Condvar,
}

impl Reactor {
    pub const BACKEND: &'static str = "completion";

    pub fn new() -> Result<Self> {
        Self::with_config(&ReactorConfig::default())
    }

    pub fn with_config(config: &ReactorConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            watches: Mutex::new(Vec::new()),
            next_watch: AtomicU64::new(0),
            guards: Mutex::new(HashMap::new()),
            wakeup: Wakeup::new()?,
        });

        let reactor = Self {
            shared: shared.clone(),
            threads: Mutex::new(Vec::with_capacity(config.completion_workers + 1)),
            registrations: Arc::new(Mutex::new(HashMap::new())),
            parked: Mutex::new(false),
            unpark: Condvar::new(),
        };

        // Pushed one by one so a failed spawn still joins what started.
        let poller = shared.clone();
        reactor.start("strand-poller".to_owned(), move || poller.poll())?;

        for index in 0..config.completion_workers.max(1) {
            let worker = shared.clone();
            reactor.start(format!("strand-completion-{index}"), move || worker.work())?;
        }

        Ok(reactor)
    }

    fn start(&self, name: String, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(|error| Error::os("thread_spawn", error))?;

        self.threads.lock().push(handle);
        Ok(())
    }

    pub(crate) fn completion(&self) -> Completion {
        Completion(self.shared.clone())
    }

    /// Registers interest in `fd`. A direction that is already watched only
    /// gets its waker replaced.
    pub fn try_add(&self, fd: RawFd, interest: Interest, waker: &Waker) -> Result<()> {
        let fresh = {
            let mut registrations = self.registrations.lock();
            let registration = registrations.entry(fd).or_default();
            let fresh = interest - registration.interest();
            registration.arm(interest, waker);
            fresh
        };

        if fresh.is_empty() {
            return Ok(());
        }

        let registrations = self.registrations.clone();
        let watched = self.completion().watch(fd, fresh, move |_| {
            let mut ready = Vec::new();
            {
                let mut registrations = registrations.lock();
                if let Some(registration) = registrations.get_mut(&fd) {
                    // Directions that did not fire are woken too; their
                    // operations retry and watch again.
                    registration.fire(fresh, &mut ready);
                    if registration.is_empty() {
                        registrations.remove(&fd);
                    }
                }
            }

            for waker in ready {
                waker.wake();
            }
        });

        if let Err(error) = watched {
            let mut registrations = self.registrations.lock();
            if let Some(registration) = registrations.get_mut(&fd) {
                registration.disarm(fresh);
                if registration.is_empty() {
                    registrations.remove(&fd);
                }
            }
            return Err(error);
        }

        Ok(())
    }

    /// Forgets `fd`: refuses further calls on it, waits for a call in
    /// progress, and resolves its watches as cancelled.
    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let guard = self.shared.guards.lock().remove(&fd);
        if let Some(guard) = guard {
            guard.cancel();
        }

        let cancelled = self.shared.take_watches(Some(fd));
        if !cancelled.is_empty() {
            trace!("completion: cancelled {} watches on fd {}", cancelled.len(), fd);
            self.shared.wakeup.signal();
        }

        for watch in cancelled {
            (watch.on_ready)(Readiness::Cancelled);
        }

        let mut orphans = Vec::new();
        if let Some(mut registration) = self.registrations.lock().remove(&fd) {
            registration.drain(&mut orphans);
        }

        for waker in orphans {
            waker.wake();
        }

        Ok(())
    }

    /// Parks until `notify` or the timeout; completions are delivered by the
    /// pool directly, so this always reports zero.
    pub fn wait(&self, timeout: Option<Duration>, _ready: &mut Vec<Waker>) -> Result<usize> {
        let mut notified = self.parked.lock();

        if !*notified {
            match timeout {
                Some(duration) if duration.is_zero() => {}
                Some(duration) => {
                    self.unpark.wait_for(&mut notified, duration);
                }
                None => self.unpark.wait(&mut notified),
            }
        }

        *notified = false;

        Ok(0)
    }

    pub fn notify(&self) -> Result<()> {
        *self.parked.lock() = true;
        self.unpark.notify_all();

        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        {
            // Held so an idle worker cannot miss the shutdown between check and wait.
            let _jobs = self.shared.jobs.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.available.notify_all();
        self.shared.wakeup.signal();

        for thread in self.threads.lock().drain(..) {
            if thread.join().is_err() {
                warn!("completion: backend thread panicked");
            }
        }

        for watch in self.shared.take_watches(None) {
            (watch.on_ready)(Readiness::Shutdown);
        }

        let pending = self.shared.jobs.lock().len();
        if pending > 0 {
            debug!("completion: dropping {} unstarted jobs", pending);
        }
    }
}
