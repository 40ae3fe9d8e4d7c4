use std::cell::Cell;
use std::fmt;

/// Native identity of an OS thread.
///
/// On Linux and Android this is the kernel thread id (`gettid`), on Apple
/// platforms the value from `pthread_threadid_np`, elsewhere the
/// `pthread_t` of the thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

impl ThreadId {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|current| match current.get() {
            Some(id) => id,
            None => {
                let id = ThreadId(native_id());
                current.set(Some(id));
                id
            }
        })
    }

    pub const fn from_raw(raw: u64) -> Self {
        ThreadId(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(raw: u64) -> Self {
        ThreadId(raw)
    }
}

impl From<ThreadId> for u64 {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl From<libc::pid_t> for ThreadId {
    fn from(tid: libc::pid_t) -> Self {
        ThreadId(tid as u64)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl From<ThreadId> for libc::pid_t {
    fn from(id: ThreadId) -> Self {
        id.0 as libc::pid_t
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn native_id() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn native_id() -> u64 {
    let mut id: u64 = 0;
    unsafe { libc::pthread_threadid_np(libc::pthread_self(), &mut id) };
    id
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn native_id() -> u64 {
    unsafe { libc::pthread_self() as usize as u64 }
}
