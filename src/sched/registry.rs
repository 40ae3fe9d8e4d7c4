//! Thread id to mailbox registry.
//!
//! A thread registers itself the first time it attaches. Its entry is removed
//! when the thread exits: the mailbox lives in a thread-local whose destructor
//! unregisters it from every registry it joined and closes the queue, so
//! messages posted afterwards are refused instead of lost silently.

use super::queue::MessageQueue;
use super::thread_id::ThreadId;

use dashmap::DashMap;
use log::debug;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

#[derive(Default)]
pub(crate) struct ThreadRegistry {
    threads: DashMap<ThreadId, Arc<MessageQueue>>,
}

struct LocalMailbox {
    id: ThreadId,
    queue: Arc<MessageQueue>,
    registries: Vec<Weak<ThreadRegistry>>,
}

impl Drop for LocalMailbox {
    fn drop(&mut self) {
        for registry in self.registries.drain(..) {
            if let Some(registry) = registry.upgrade() {
                registry
                    .threads
                    .remove_if(&self.id, |_, queue| Arc::ptr_eq(queue, &self.queue));
            }
        }

        let leftovers = self.queue.close();
        if !leftovers.is_empty() {
            debug!(
                "thread {} exited with {} undelivered messages",
                self.id,
                leftovers.len()
            );
        }
    }
}

thread_local! {
    static LOCAL: RefCell<Option<LocalMailbox>> = const { RefCell::new(None) };
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers the calling thread and returns its mailbox. A thread has a
    /// single mailbox; `capacity` only applies the first time it attaches.
    pub(crate) fn attach_current(self: &Arc<Self>, capacity: usize) -> (ThreadId, Arc<MessageQueue>) {
        LOCAL.with(|local| {
            let mut local = local.borrow_mut();

            let mailbox = local.get_or_insert_with(|| LocalMailbox {
                id: ThreadId::current(),
                queue: Arc::new(MessageQueue::new(capacity)),
                registries: Vec::new(),
            });

            let this = Arc::downgrade(self);
            if !mailbox.registries.iter().any(|known| known.ptr_eq(&this)) {
                mailbox.registries.push(this);
                self.threads.insert(mailbox.id, mailbox.queue.clone());
                debug!("thread {} attached", mailbox.id);
            }

            (mailbox.id, mailbox.queue.clone())
        })
    }

    pub(crate) fn lookup(&self, id: ThreadId) -> Option<Arc<MessageQueue>> {
        self.threads.get(&id).map(|entry| entry.value().clone())
    }

    pub(crate) fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::queue::Message;

    #[test]
    fn entry_removed_at_thread_exit() {
        let registry = Arc::new(ThreadRegistry::new());

        let remote = registry.clone();
        let (id, queue) = std::thread::spawn(move || remote.attach_current(8))
            .join()
            .unwrap();

        assert!(!registry.contains(id));
        assert!(queue.post(Message::Words(0, 0)).is_err());
    }

    #[test]
    fn attach_is_idempotent() {
        let registry = Arc::new(ThreadRegistry::new());

        let (first, a) = registry.attach_current(8);
        let (second, b) = registry.attach_current(64);

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.capacity(), 8);
        assert_eq!(registry.len(), 1);
    }
}
