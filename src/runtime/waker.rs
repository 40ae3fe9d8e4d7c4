//! Waker implementation for task wake-up notifications.
//!
//! A waker is a reference-counted pointer to the task header. Waking it asks
//! the task to be scheduled again on whatever path the task currently routes
//! to (its home queue, or a one-shot redirect installed by a thread switch).

use crate::task::Header;

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

fn clone_raw(ptr: *const ()) -> RawWaker {
    let header = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const Header) });
    let cloned: Arc<Header> = Arc::clone(&header);

    RawWaker::new(Arc::into_raw(cloned) as *const (), &VTABLE)
}

fn wake_raw(ptr: *const ()) {
    let header = unsafe { Arc::from_raw(ptr as *const Header) };
    Header::wake(&header);
}

fn wake_by_ref_raw(ptr: *const ()) {
    let header = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const Header) });
    Header::wake(&header);
}

fn drop_raw(ptr: *const ()) {
    drop(unsafe { Arc::from_raw(ptr as *const Header) });
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// Creates a `Waker` that reschedules the given task when woken.
pub(crate) fn make_waker(header: Arc<Header>) -> Waker {
    let raw = RawWaker::new(Arc::into_raw(header) as *const (), &VTABLE);

    unsafe { Waker::from_raw(raw) }
}
