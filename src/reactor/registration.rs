//! Per-descriptor registration record.
//!
//! A descriptor has at most one pending waker per direction. Arming a
//! direction that is already armed replaces the waker (a modify, not a
//! duplicate), so the newest task is the one resumed.

use super::Interest;

use std::task::Waker;

#[derive(Default, Debug)]
pub(crate) struct Registration {
    reader: Option<Waker>,
    writer: Option<Waker>,
}

impl Registration {
    pub(crate) fn arm(&mut self, interest: Interest, waker: &Waker) {
        if interest.is_readable() {
            replace_waker(&mut self.reader, waker);
        }

        if interest.is_writable() {
            replace_waker(&mut self.writer, waker);
        }
    }

    pub(crate) fn disarm(&mut self, interest: Interest) {
        if interest.is_readable() {
            self.reader = None;
        }

        if interest.is_writable() {
            self.writer = None;
        }
    }

    /// Directions that still have a task waiting.
    pub(crate) fn interest(&self) -> Interest {
        let mut interest = Interest::empty();

        if self.reader.is_some() {
            interest |= Interest::READABLE;
        }

        if self.writer.is_some() {
            interest |= Interest::WRITABLE;
        }

        interest
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }

    /// Moves the wakers of the fired directions into `ready`.
    pub(crate) fn fire(&mut self, fired: Interest, ready: &mut Vec<Waker>) {
        if fired.is_readable() {
            ready.extend(self.reader.take());
        }

        if fired.is_writable() {
            ready.extend(self.writer.take());
        }
    }

    /// Moves every pending waker into `ready`.
    pub(crate) fn drain(&mut self, ready: &mut Vec<Waker>) {
        self.fire(Interest::all(), ready);
    }
}

fn replace_waker(slot: &mut Option<Waker>, waker: &Waker) {
    match slot {
        Some(current) => current.clone_from(waker),
        None => *slot = Some(waker.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearm_replaces_instead_of_duplicating() {
        let mut registration = Registration::default();
        let waker = Waker::noop();

        registration.arm(Interest::READABLE, waker);
        registration.arm(Interest::READABLE, waker);
        assert_eq!(registration.interest(), Interest::READABLE);

        let mut ready = Vec::new();
        registration.fire(Interest::all(), &mut ready);
        assert_eq!(ready.len(), 1);
        assert!(registration.is_empty());
    }

    #[test]
    fn directions_fire_independently() {
        let mut registration = Registration::default();
        let waker = Waker::noop();

        registration.arm(Interest::READABLE | Interest::WRITABLE, waker);

        let mut ready = Vec::new();
        registration.fire(Interest::WRITABLE, &mut ready);
        assert_eq!(ready.len(), 1);
        assert_eq!(registration.interest(), Interest::READABLE);

        registration.disarm(Interest::READABLE);
        assert!(registration.is_empty());
    }
}
