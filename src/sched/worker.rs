use super::registry::ThreadRegistry;
use super::thread_id::ThreadId;
use super::{Mailbox, queue::MessageQueue};
use crate::error::ScheduleError;

use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(100);

/// A dedicated OS thread that resumes every task delivered to its mailbox.
///
/// The handle must be consumed once, by [`join`](Worker::join) or
/// [`detach`](Worker::detach); a second call reports
/// [`ScheduleError::HandleConsumed`]. Dropping an unconsumed handle joins.
pub struct Worker {
    id: ThreadId,
    stop: Arc<AtomicBool>,
    queue: Arc<MessageQueue>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        name: String,
        registry: Arc<ThreadRegistry>,
        capacity: usize,
    ) -> Result<Worker, ScheduleError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let flag = stop.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let (id, queue) = registry.attach_current(capacity);
            let mailbox = Mailbox::new(id, queue.clone());

            if ready_tx.send((id, queue)).is_err() {
                return;
            }
            drop(registry);

            while !flag.load(Ordering::Acquire) {
                mailbox.turn(Some(IDLE_WAIT), |first, second| {
                    trace!("worker {}: ignoring words ({}, {})", id, first, second);
                });
            }

            // Whatever raced the stop request still runs here.
            mailbox.drain(&mut |_, _| {});
            debug!("worker {} stopped", id);
        })?;

        let (id, queue) = match ready_rx.recv() {
            Ok(registered) => registered,
            Err(_) => {
                let _ = handle.join();
                return Err(ScheduleError::WorkerPanicked);
            }
        };

        debug!("worker {} ({}) started", id, name);

        Ok(Worker {
            id,
            stop,
            queue,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Stops the worker once its mailbox is drained and waits for it to exit.
    pub fn join(&mut self) -> Result<(), ScheduleError> {
        let handle = self.handle.take().ok_or(ScheduleError::HandleConsumed)?;

        self.stop.store(true, Ordering::Release);
        self.queue.interrupt();

        handle.join().map_err(|_| ScheduleError::WorkerPanicked)
    }

    /// Lets the worker keep running on its own; it lives until the process
    /// exits.
    pub fn detach(&mut self) -> Result<(), ScheduleError> {
        self.handle
            .take()
            .map(drop)
            .ok_or(ScheduleError::HandleConsumed)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some()
            && let Err(error) = self.join()
        {
            warn!("worker {}: {}", self.id, error);
        }
    }
}
