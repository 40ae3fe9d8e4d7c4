//! Error types shared across the runtime.
//!
//! Only genuine failures live here. Conditions a caller is expected to branch
//! on routinely (a timeout elapsing, a full mailbox, a closed channel) are
//! reported through ordinary return values instead.

use std::io;

/// Errors surfaced by reactor registration and socket operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A system call failed with something other than "would block".
    #[error("{op} failed: {}", os_message(.code))]
    Os { op: &'static str, code: i32 },

    /// The resource was closed while the operation was pending.
    #[error("{0} on a closed resource")]
    Closed(&'static str),

    /// The peer accepted zero bytes of a non-empty write.
    #[error("{0} wrote zero bytes")]
    WriteZero(&'static str),

    /// A runtime-bound API was called outside of `Runtime::block_on`.
    #[error("no runtime in the current context")]
    NoRuntime,
}

impl Error {
    /// Builds an [`Error::Os`] from an `io::Error`, keeping the raw code.
    pub(crate) fn os(op: &'static str, error: io::Error) -> Self {
        Error::Os {
            op,
            code: error.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Builds an [`Error::Os`] from the calling thread's `errno`.
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::os(op, io::Error::last_os_error())
    }

    /// Raw OS error code, if this error came from a system call.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Os { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Name of the operation that produced this error.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            Error::Os { op, .. } | Error::Closed(op) | Error::WriteZero(op) => Some(op),
            Error::NoRuntime => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Os { code, .. } => io::Error::from_raw_os_error(code),
            Error::Closed(op) => io::Error::new(io::ErrorKind::NotConnected, op),
            Error::WriteZero(_) => io::Error::new(io::ErrorKind::WriteZero, error),
            Error::NoRuntime => io::Error::other(error),
        }
    }
}

fn os_message(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

/// Misuse of a counting synchronization primitive.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SyncError {
    #[error("count down by {requested} with only {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },
}

/// Errors reported by the thread-targeted scheduler.
#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    /// The target thread never attached a mailbox or has already exited.
    #[error("thread {0} has no registered mailbox")]
    ThreadNotRegistered(crate::sched::ThreadId),

    /// A switch was awaited from a future that is not running inside a task.
    #[error("switch requested outside of a task")]
    NoCurrentTask,

    /// `join` or `detach` on a worker handle that was already consumed.
    #[error("worker handle already joined or detached")]
    HandleConsumed,

    /// The worker thread panicked before it could be joined.
    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors reported by [`Task`](crate::Task) lifecycle calls.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TaskError {
    #[error("task is currently running")]
    Running,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_error_keeps_code_and_op() {
        let error = Error::os("recv_from", io::Error::from_raw_os_error(libc::ECONNREFUSED));

        assert_eq!(error.code(), Some(libc::ECONNREFUSED));
        assert_eq!(error.op(), Some("recv_from"));
        assert!(error.to_string().starts_with("recv_from failed: "));

        let io: io::Error = error.into();
        assert_eq!(io.raw_os_error(), Some(libc::ECONNREFUSED));
    }

    #[test]
    fn write_zero_keeps_its_kind() {
        let error = Error::WriteZero("send");

        assert_eq!(error.code(), None);
        assert_eq!(error.op(), Some("send"));

        let io: io::Error = error.into();
        assert_eq!(io.kind(), io::ErrorKind::WriteZero);
        assert_eq!(io.raw_os_error(), None);
    }

    #[test]
    fn underflow_message() {
        let error = SyncError::Underflow {
            requested: 3,
            remaining: 1,
        };

        assert_eq!(error.to_string(), "count down by 3 with only 1 remaining");
    }
}
