//! Reader-writer sections.
//!
//! A [`Section`] is the mutual-exclusion strategy a data structure is
//! parameterized over: [`Lock`] is a real reader-writer lock, [`Bypass`]
//! does nothing and is only sound when a single thread touches the data,
//! which is why it is neither `Sync` nor `Send`.

use parking_lot::RawRwLock;
use parking_lot::lock_api::RawRwLock as _;
use std::cell::Cell;
use std::marker::PhantomData;

/// # Safety
///
/// Data guarded by a section is accessed through shared references from
/// every thread that can reach the section. An implementation must
/// guarantee that while [`lock`](Section::lock) (or a successful
/// [`try_lock`](Section::try_lock)) is held, no other thread can hold the
/// section, exclusively or shared. A type that does no locking must
/// therefore not be `Sync`.
pub unsafe trait Section: Default {
    /// Takes the section exclusively, blocking until it is free.
    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// # Safety
    /// The section must be held exclusively by the caller.
    unsafe fn unlock(&self);

    /// Takes the section shared with other readers.
    fn lock_shared(&self);

    fn try_lock_shared(&self) -> bool;

    /// # Safety
    /// The caller must hold a shared lock on the section.
    unsafe fn unlock_shared(&self);

    /// Locks exclusively until the guard is dropped.
    fn enter(&self) -> SectionGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        SectionGuard {
            section: self,
            shared: false,
        }
    }

    /// Locks shared until the guard is dropped.
    fn enter_shared(&self) -> SectionGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock_shared();
        SectionGuard {
            section: self,
            shared: true,
        }
    }

    fn try_enter(&self) -> Option<SectionGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.try_lock().then(|| SectionGuard {
            section: self,
            shared: false,
        })
    }
}

/// Releases the section when dropped.
#[must_use = "the section is released as soon as the guard is dropped"]
pub struct SectionGuard<'a, L: Section> {
    section: &'a L,
    shared: bool,
}

impl<L: Section> Drop for SectionGuard<'_, L> {
    fn drop(&mut self) {
        unsafe {
            if self.shared {
                self.section.unlock_shared();
            } else {
                self.section.unlock();
            }
        }
    }
}

/// A reader-writer lock.
pub struct Lock {
    raw: RawRwLock,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: backed by a real reader-writer lock.
unsafe impl Section for Lock {
    fn lock(&self) {
        self.raw.lock_exclusive();
    }

    fn try_lock(&self) -> bool {
        self.raw.try_lock_exclusive()
    }

    unsafe fn unlock(&self) {
        unsafe { self.raw.unlock_exclusive() }
    }

    fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    fn try_lock_shared(&self) -> bool {
        self.raw.try_lock_shared()
    }

    unsafe fn unlock_shared(&self) {
        unsafe { self.raw.unlock_shared() }
    }
}

/// A section that never blocks and never excludes anyone.
#[derive(Default)]
pub struct Bypass {
    _single_thread: PhantomData<*const Cell<()>>,
}

impl Bypass {
    pub const fn new() -> Self {
        Self {
            _single_thread: PhantomData,
        }
    }
}

// SAFETY: `Bypass` is neither `Send` nor `Sync`, so only its owning thread
// ever holds it.
unsafe impl Section for Bypass {
    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}

    fn lock_shared(&self) {}

    fn try_lock_shared(&self) -> bool {
        true
    }

    unsafe fn unlock_shared(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_excludes_everyone() {
        let lock = Lock::new();

        let guard = lock.enter();
        assert!(!lock.try_lock());
        assert!(!lock.try_lock_shared());
        drop(guard);

        assert!(!lock.is_locked());
        assert!(lock.try_enter().is_some());
    }

    #[test]
    fn holder_excludes_other_threads() {
        let lock = Lock::new();
        let guard = lock.enter();

        std::thread::scope(|scope| {
            let other = scope.spawn(|| (lock.try_lock(), lock.try_lock_shared()));
            assert_eq!(other.join().unwrap(), (false, false));
        });

        drop(guard);
        std::thread::scope(|scope| {
            let other = scope.spawn(|| lock.try_enter().is_some());
            assert!(other.join().unwrap());
        });
    }

    #[test]
    fn readers_share() {
        let lock = Lock::new();

        let first = lock.enter_shared();
        let second = lock.enter_shared();
        assert!(!lock.try_lock());

        drop(first);
        drop(second);
        assert!(lock.try_enter().is_some());
    }

    #[test]
    fn bypass_always_succeeds() {
        let bypass = Bypass::new();
        let _outer = bypass.enter();

        assert!(bypass.try_enter().is_some());
    }
}
