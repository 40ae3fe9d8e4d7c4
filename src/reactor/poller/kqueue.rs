//! `kqueue` backend.
//!
//! Each direction is its own filter armed with `EV_ADD | EV_ONESHOT |
//! EV_CLEAR`; `EV_ADD` on an existing filter modifies it, so re-registering a
//! descriptor never reports a duplicate. Changes are submitted as a change
//! list, events are collected into a scratch list that is reused across polls.

use crate::error::{Error, Result};
use crate::reactor::registration::Registration;
use crate::reactor::{Interest, ReactorConfig};

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_ERROR, EV_ONESHOT, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, close, kevent, kqueue, timespec,
};
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;
use std::time::Duration;

const WAKE_IDENT: usize = usize::MAX;

pub struct Reactor {
    kqueue: RawFd,
    signaled: AtomicBool,
    registrations: Mutex<HashMap<RawFd, Registration>>,
    events: Mutex<Vec<libc::kevent>>,
}

fn change(ident: usize, filter: i16, flags: u16) -> libc::kevent {
    let mut event: libc::kevent = unsafe { mem::zeroed() };
    event.ident = ident as _;
    event.filter = filter as _;
    event.flags = flags as _;
    event
}

impl Reactor {
    pub const BACKEND: &'static str = "kqueue";

    pub fn new() -> Result<Self> {
        Self::with_config(&ReactorConfig::default())
    }

    pub fn with_config(config: &ReactorConfig) -> Result<Self> {
        let queue = unsafe { kqueue() };
        if queue < 0 {
            return Err(Error::last_os("kqueue"));
        }

        let wake = change(WAKE_IDENT, EVFILT_USER as i16, (EV_ADD | EV_ENABLE | EV_CLEAR) as u16);
        let ret = unsafe { kevent(queue, &wake, 1, ptr::null_mut(), 0, ptr::null()) };
        if ret < 0 {
            let error = Error::last_os("kevent");
            unsafe { close(queue) };
            return Err(error);
        }

        Ok(Self {
            kqueue: queue,
            signaled: AtomicBool::new(false),
            registrations: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::with_capacity(config.event_capacity.max(1))),
        })
    }

    fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let ret = unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as _,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Registers interest in `fd`, or modifies the existing registration.
    pub fn try_add(&self, fd: RawFd, interest: Interest, waker: &Waker) -> Result<()> {
        let flags = (EV_ADD | EV_ENABLE | EV_ONESHOT | EV_CLEAR) as u16;
        let mut changes = Vec::with_capacity(2);

        if interest.is_readable() {
            changes.push(change(fd as usize, EVFILT_READ as i16, flags));
        }

        if interest.is_writable() {
            changes.push(change(fd as usize, EVFILT_WRITE as i16, flags));
        }

        let mut registrations = self.registrations.lock();
        let registration = registrations.entry(fd).or_default();
        let had = registration.interest();
        registration.arm(interest, waker);

        if let Err(error) = self.submit(&changes) {
            registration.disarm(interest - had);
            if registration.is_empty() {
                registrations.remove(&fd);
            }
            return Err(Error::os("kevent", error));
        }

        trace!("kqueue: armed fd {} for {:?}", fd, interest);
        Ok(())
    }

    /// Removes both filters of `fd` and wakes any task still waiting on it.
    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let mut orphans = Vec::new();

        if let Some(mut registration) = self.registrations.lock().remove(&fd) {
            registration.drain(&mut orphans);
        }

        let mut first_error = None;
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let delete = change(fd as usize, filter as i16, EV_DELETE as u16);

            if let Err(error) = self.submit(&[delete]) {
                match error.raw_os_error() {
                    Some(libc::ENOENT) | Some(libc::EBADF) => {}
                    _ => {
                        first_error.get_or_insert(error);
                    }
                }
            }
        }

        for waker in orphans {
            waker.wake();
        }

        match first_error {
            Some(error) => Err(Error::os("kevent", error)),
            None => Ok(()),
        }
    }

    /// Blocks for up to `timeout` (forever with `None`) and appends the wakers
    /// of every fired filter to `ready`. Returns how many were added.
    pub fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<Waker>) -> Result<usize> {
        let mut events = self.events.lock();
        let capacity = events.capacity();

        let spec = timeout.map(|duration| timespec {
            tv_sec: duration.as_secs().min(i64::MAX as u64) as _,
            tv_nsec: duration.subsec_nanos() as _,
        });
        let spec_ptr = spec
            .as_ref()
            .map_or(ptr::null(), |spec| spec as *const timespec);

        let count = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                events.as_mut_ptr(),
                capacity as _,
                spec_ptr,
            )
        };

        if count < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::os("kevent", error));
        }

        unsafe { events.set_len(count as usize) };

        let before = ready.len();
        let mut registrations = self.registrations.lock();

        for event in events.iter() {
            if event.filter as i16 == EVFILT_USER as i16 {
                self.signaled.store(false, Ordering::Release);
                continue;
            }

            let fd = event.ident as RawFd;
            let Some(registration) = registrations.get_mut(&fd) else {
                continue;
            };

            if event.flags as u16 & EV_ERROR as u16 != 0 {
                warn!("kqueue: error event on fd {}: {}", fd, event.data);
                registration.drain(ready);
            } else if event.filter as i16 == EVFILT_READ as i16 {
                registration.fire(Interest::READABLE, ready);
            } else if event.filter as i16 == EVFILT_WRITE as i16 {
                registration.fire(Interest::WRITABLE, ready);
            }

            if registration.is_empty() {
                registrations.remove(&fd);
            }
        }

        events.clear();

        Ok(ready.len() - before)
    }

    /// Interrupts a concurrent or the next `wait`.
    pub fn notify(&self) -> Result<()> {
        if self.signaled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut trigger = change(WAKE_IDENT, EVFILT_USER as i16, 0);
        trigger.fflags = NOTE_TRIGGER as _;

        self.submit(&[trigger])
            .map_err(|error| Error::os("kevent", error))
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if unsafe { close(self.kqueue) } < 0 {
            warn!("kqueue: closing queue: {}", io::Error::last_os_error());
        }
    }
}
