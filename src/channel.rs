//! Rendezvous channel between tasks.
//!
//! A [`write`](Channel::write) hands its value straight to the oldest
//! pending reader, or suspends until a reader takes it. A
//! [`read`](Channel::read) takes from the oldest pending writer, or suspends
//! until one arrives. Under single-threaded use the Nth write pairs with the
//! Nth read.
//!
//! Closing the channel, explicitly or by dropping the last [`Channel`]
//! handle, releases every suspended reader with `None` and every suspended
//! writer with `false`.
//!
//! The waiter lists are guarded by a [`Section`]: [`Lock`] by default,
//! [`Bypass`](crate::sync::Bypass) for single-threaded use.
//!
//! ```ignore
//! let channel = Channel::<u32>::new();
//! let (sent, received) = futures::join!(channel.write(7), channel.read());
//! assert!(sent);
//! assert_eq!(received, Some(7));
//! ```

use crate::sync::{Lock, Section};

use log::trace;
use slab::Slab;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Waiting,
    Matched,
    Closed,
}

struct Pending<T> {
    id: u64,
    waker: Waker,
    value: Option<T>,
    status: Status,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Key {
    slot: usize,
    id: u64,
}

struct Inner<T> {
    entries: Slab<Pending<T>>,
    readers: VecDeque<Key>,
    writers: VecDeque<Key>,
    /// Values accepted from a writer whose reader went away before taking them.
    orphans: VecDeque<T>,
    closed: bool,
    next_id: u64,
}

impl<T> Inner<T> {
    fn register(&mut self, waker: &Waker, value: Option<T>) -> Key {
        let id = self.next_id;
        self.next_id += 1;

        let slot = self.entries.insert(Pending {
            id,
            waker: waker.clone(),
            value,
            status: Status::Waiting,
        });

        Key { slot, id }
    }

    fn entry(&mut self, key: Key) -> Option<&mut Pending<T>> {
        self.entries.get_mut(key.slot).filter(|entry| entry.id == key.id)
    }

    /// Pops the oldest entry of `queue` that is still waiting.
    fn next_waiting(entries: &mut Slab<Pending<T>>, queue: &mut VecDeque<Key>) -> Option<Key> {
        while let Some(key) = queue.pop_front() {
            if entries
                .get(key.slot)
                .is_some_and(|entry| entry.id == key.id && entry.status == Status::Waiting)
            {
                return Some(key);
            }
        }

        None
    }

    fn remove(&mut self, key: Key) -> Option<Pending<T>> {
        self.entry(key)?;
        Some(self.entries.remove(key.slot))
    }
}

struct Shared<T, L> {
    section: L,
    inner: UnsafeCell<Inner<T>>,
    handles: AtomicUsize,
}

unsafe impl<T: Send, L: Section + Send> Send for Shared<T, L> {}
unsafe impl<T: Send, L: Section + Sync> Sync for Shared<T, L> {}

impl<T, L: Section> Shared<T, L> {
    /// Runs `f` with exclusive access to the waiter lists, then invokes the
    /// wakers it collected.
    fn with<R>(&self, f: impl FnOnce(&mut Inner<T>, &mut Vec<Waker>) -> R) -> R {
        let mut woken = Vec::new();

        let result = {
            let _guard = self.section.enter();
            let inner = unsafe { &mut *self.inner.get() };
            f(inner, &mut woken)
        };

        for waker in woken {
            waker.wake();
        }

        result
    }

    fn close(&self) -> bool {
        let mut dropped = Vec::new();

        let closed = self.with(|inner, woken| {
            if inner.closed {
                return false;
            }
            inner.closed = true;

            for key in inner.readers.drain(..).chain(inner.writers.drain(..)) {
                if let Some(entry) = inner
                    .entries
                    .get_mut(key.slot)
                    .filter(|entry| entry.id == key.id && entry.status == Status::Waiting)
                {
                    entry.status = Status::Closed;
                    dropped.extend(entry.value.take());
                    woken.push(entry.waker.clone());
                }
            }

            trace!("channel closed, released {} waiters", woken.len());
            true
        });

        drop(dropped);
        closed
    }
}

/// Handle to a rendezvous channel. Clones share the same channel.
pub struct Channel<T, L: Section = Lock> {
    shared: Arc<Shared<T, L>>,
}

impl<T, L: Section> Channel<T, L> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                section: L::default(),
                inner: UnsafeCell::new(Inner {
                    entries: Slab::new(),
                    readers: VecDeque::new(),
                    writers: VecDeque::new(),
                    orphans: VecDeque::new(),
                    closed: false,
                    next_id: 0,
                }),
                handles: AtomicUsize::new(1),
            }),
        }
    }

    /// Offers `value` to a reader. Resolves to `true` once a reader took it,
    /// `false` if the channel is or becomes closed first.
    pub fn write(&self, value: T) -> Write<T, L> {
        Write {
            shared: self.shared.clone(),
            value: Some(value),
            key: None,
        }
    }

    /// Takes the next value. Resolves to `None` once the channel is closed.
    pub fn read(&self) -> Read<T, L> {
        Read {
            shared: self.shared.clone(),
            key: None,
        }
    }

    /// Closes the channel. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.with(|inner, _| inner.closed)
    }

    /// Readers currently suspended.
    pub fn pending_readers(&self) -> usize {
        self.shared.with(|inner, _| count_waiting(inner, false))
    }

    /// Writers currently suspended.
    pub fn pending_writers(&self) -> usize {
        self.shared.with(|inner, _| count_waiting(inner, true))
    }
}

fn count_waiting<T>(inner: &Inner<T>, writers: bool) -> usize {
    let queue = if writers { &inner.writers } else { &inner.readers };

    queue
        .iter()
        .filter(|key| {
            inner
                .entries
                .get(key.slot)
                .is_some_and(|entry| entry.id == key.id && entry.status == Status::Waiting)
        })
        .count()
}

impl<T, L: Section> Default for Channel<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, L: Section> Clone for Channel<T, L> {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::Relaxed);

        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, L: Section> Drop for Channel<T, L> {
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

/// Future returned by [`Channel::write`].
#[must_use = "futures do nothing unless awaited"]
pub struct Write<T, L: Section = Lock> {
    shared: Arc<Shared<T, L>>,
    value: Option<T>,
    key: Option<Key>,
}

impl<T, L: Section> Unpin for Write<T, L> {}

impl<T, L: Section> Future for Write<T, L> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        let shared = this.shared.clone();

        shared.with(|inner, woken| {
            if let Some(key) = this.key {
                let Some(entry) = inner.entry(key) else {
                    this.key = None;
                    return Poll::Ready(false);
                };

                if entry.status == Status::Waiting {
                    entry.waker.clone_from(cx.waker());
                    return Poll::Pending;
                }

                let matched = entry.status == Status::Matched;
                this.key = None;
                inner.remove(key);
                return Poll::Ready(matched);
            }

            let Some(value) = this.value.take() else {
                return Poll::Ready(false);
            };

            if inner.closed {
                return Poll::Ready(false);
            }

            if let Some(reader) = Inner::next_waiting(&mut inner.entries, &mut inner.readers)
                && let Some(entry) = inner.entry(reader)
            {
                entry.value = Some(value);
                entry.status = Status::Matched;
                woken.push(entry.waker.clone());
                return Poll::Ready(true);
            }

            let key = inner.register(cx.waker(), Some(value));
            inner.writers.push_back(key);
            this.key = Some(key);

            Poll::Pending
        })
    }
}

impl<T, L: Section> Drop for Write<T, L> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let abandoned = self.shared.with(|inner, _| {
                let entry = inner.remove(key)?;
                if entry.status == Status::Waiting {
                    inner.writers.retain(|queued| *queued != key);
                }
                Some(entry)
            });
            drop(abandoned);
        }
    }
}

/// Future returned by [`Channel::read`].
#[must_use = "futures do nothing unless awaited"]
pub struct Read<T, L: Section = Lock> {
    shared: Arc<Shared<T, L>>,
    key: Option<Key>,
}

impl<T, L: Section> Unpin for Read<T, L> {}

impl<T, L: Section> Future for Read<T, L> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let shared = this.shared.clone();

        shared.with(|inner, woken| {
            if let Some(key) = this.key {
                let Some(entry) = inner.entry(key) else {
                    this.key = None;
                    return Poll::Ready(None);
                };

                if entry.status == Status::Waiting {
                    entry.waker.clone_from(cx.waker());
                    return Poll::Pending;
                }

                this.key = None;
                return Poll::Ready(inner.remove(key).and_then(|entry| entry.value));
            }

            if let Some(value) = inner.orphans.pop_front() {
                return Poll::Ready(Some(value));
            }

            if inner.closed {
                return Poll::Ready(None);
            }

            if let Some(writer) = Inner::next_waiting(&mut inner.entries, &mut inner.writers)
                && let Some(entry) = inner.entry(writer)
            {
                let value = entry.value.take();
                entry.status = Status::Matched;
                woken.push(entry.waker.clone());
                return Poll::Ready(value);
            }

            let key = inner.register(cx.waker(), None);
            inner.readers.push_back(key);
            this.key = Some(key);

            Poll::Pending
        })
    }
}

impl<T, L: Section> Drop for Read<T, L> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };

        self.shared.with(|inner, _| {
            let Some(entry) = inner.remove(key) else {
                return;
            };

            if entry.status == Status::Waiting {
                inner.readers.retain(|queued| *queued != key);
            }

            // Matched but never observed: the value must not be lost.
            if let Some(value) = entry.value {
                inner.orphans.push_back(value);
            }
        });
    }
}
