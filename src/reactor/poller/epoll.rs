//! Edge-triggered, one-shot `epoll` backend.
//!
//! Every registration is armed with `EPOLLET | EPOLLONESHOT`: once a
//! descriptor fires it stays disabled until the next `try_add` re-arms it,
//! so a persistently ready descriptor cannot starve the loop.

use crate::error::{Error, Result};
use crate::reactor::registration::Registration;
use crate::reactor::{Interest, ReactorConfig, timeout_millis};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, close, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait,
};
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;
use std::time::Duration;

const WAKE_TOKEN: u64 = u64::MAX;

/// An `eventfd` used to interrupt a blocked `wait`.
struct Wakeup {
    fd: RawFd,
    signaled: AtomicBool,
}

impl Wakeup {
    fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::last_os("eventfd"));
        }

        Ok(Self {
            fd,
            signaled: AtomicBool::new(false),
        })
    }

    fn signal(&self) -> Result<()> {
        if self.signaled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let one: u64 = 1;
        let written = unsafe {
            libc::write(
                self.fd,
                &one as *const u64 as *const _,
                std::mem::size_of::<u64>(),
            )
        };

        if written < 0 {
            let error = io::Error::last_os_error();
            // A saturated counter is still readable, so the waiter will wake.
            if error.kind() != io::ErrorKind::WouldBlock {
                return Err(Error::os("eventfd_write", error));
            }
        }

        Ok(())
    }

    fn drain(&self) {
        self.signaled.store(false, Ordering::Release);

        let mut counter: u64 = 0;
        unsafe {
            libc::read(
                self.fd,
                &mut counter as *mut u64 as *mut _,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

pub struct Reactor {
    epoll: RawFd,
    wakeup: Wakeup,
    registrations: Mutex<HashMap<RawFd, Registration>>,
    events: Mutex<Vec<epoll_event>>,
}

impl Reactor {
    pub const BACKEND: &'static str = "epoll";

    pub fn new() -> Result<Self> {
        Self::with_config(&ReactorConfig::default())
    }

    pub fn with_config(config: &ReactorConfig) -> Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(Error::last_os("epoll_create1"));
        }

        let wakeup = match Wakeup::new() {
            Ok(wakeup) => wakeup,
            Err(error) => {
                unsafe { close(epoll) };
                return Err(error);
            }
        };

        let mut event = epoll_event {
            events: (EPOLLIN | EPOLLET) as u32,
            u64: WAKE_TOKEN,
        };

        if unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, wakeup.fd, &mut event) } < 0 {
            let error = Error::last_os("epoll_ctl");
            unsafe {
                close(wakeup.fd);
                close(epoll);
            }
            return Err(error);
        }

        let capacity = config.event_capacity.max(1);

        Ok(Self {
            epoll,
            wakeup,
            registrations: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::with_capacity(capacity)),
        })
    }

    /// Registers interest in `fd`, or modifies the existing registration.
    ///
    /// On failure nothing stays registered and the caller keeps ownership of
    /// the task behind `waker`.
    pub fn try_add(&self, fd: RawFd, interest: Interest, waker: &Waker) -> Result<()> {
        let mut registrations = self.registrations.lock();
        let registration = registrations.entry(fd).or_default();
        let had = registration.interest();

        registration.arm(interest, waker);

        let mut event = epoll_event {
            events: epoll_flags(registration.interest()),
            u64: fd as u64,
        };

        let mut result = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if result < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
            result = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        }

        if result < 0 {
            let error = Error::last_os("epoll_ctl");
            registration.disarm(interest - had);
            if registration.is_empty() {
                registrations.remove(&fd);
            }
            return Err(error);
        }

        trace!("epoll: armed fd {} for {:?}", fd, interest);
        Ok(())
    }

    /// Removes `fd` from the reactor. Tasks still waiting on it are woken so
    /// they can observe the descriptor's state themselves.
    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let mut orphans = Vec::new();

        if let Some(mut registration) = self.registrations.lock().remove(&fd) {
            registration.drain(&mut orphans);
        }

        let result = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };

        for waker in orphans {
            waker.wake();
        }

        if result < 0 {
            let error = io::Error::last_os_error();
            match error.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EBADF) => {}
                _ => return Err(Error::os("epoll_ctl", error)),
            }
        }

        Ok(())
    }

    /// Blocks for up to `timeout` (forever with `None`) and appends the wakers
    /// of every fired registration to `ready`. Returns how many were added;
    /// zero on timeout.
    pub fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<Waker>) -> Result<usize> {
        let mut events = self.events.lock();
        let capacity = events.capacity();

        let count = unsafe {
            epoll_wait(
                self.epoll,
                events.as_mut_ptr(),
                capacity as i32,
                timeout_millis(timeout),
            )
        };

        if count < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::os("epoll_wait", error));
        }

        unsafe { events.set_len(count as usize) };

        let before = ready.len();
        let mut registrations = self.registrations.lock();

        for event in events.iter() {
            let token = event.u64;
            let flags = event.events as i32;

            if token == WAKE_TOKEN {
                self.wakeup.drain();
                continue;
            }

            let fd = token as RawFd;
            let Some(registration) = registrations.get_mut(&fd) else {
                continue;
            };

            registration.fire(fired_interest(flags), ready);

            // One-shot disabled the whole descriptor; re-arm what is left.
            let remaining = registration.interest();
            if remaining.is_empty() {
                registrations.remove(&fd);
                continue;
            }

            let mut rearm = epoll_event {
                events: epoll_flags(remaining),
                u64: fd as u64,
            };

            if unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut rearm) } < 0 {
                warn!(
                    "epoll: failed to re-arm fd {}: {}",
                    fd,
                    io::Error::last_os_error()
                );
                registration.drain(ready);
                registrations.remove(&fd);
            }
        }

        events.clear();

        Ok(ready.len() - before)
    }

    /// Interrupts a concurrent or the next `wait`.
    pub fn notify(&self) -> Result<()> {
        self.wakeup.signal()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            if close(self.wakeup.fd) < 0 {
                warn!("epoll: closing eventfd: {}", io::Error::last_os_error());
            }

            if close(self.epoll) < 0 {
                warn!("epoll: closing epoll fd: {}", io::Error::last_os_error());
            }
        }
    }
}

fn epoll_flags(interest: Interest) -> u32 {
    let mut flags = EPOLLET | EPOLLONESHOT;

    if interest.is_readable() {
        flags |= EPOLLIN | EPOLLRDHUP;
    }

    if interest.is_writable() {
        flags |= EPOLLOUT;
    }

    flags as u32
}

fn fired_interest(flags: i32) -> Interest {
    let mut fired = Interest::empty();

    if flags & (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
        fired |= Interest::READABLE;
    }

    if flags & (EPOLLOUT | EPOLLHUP | EPOLLERR) != 0 {
        fired |= Interest::WRITABLE;
    }

    fired
}
