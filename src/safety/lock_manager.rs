/// Key-scoped advisory locking
///
/// The mount table keeps one instance keyed by device, held across a device's
/// mount and unmount calls, and one keyed by mountpoint path, held around every
/// OS-visible side effect on that path whichever device the caller works on.
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Exclusive lock keyed by an arbitrary string.
///
/// Keys are materialised lazily on first acquisition and dropped again on
/// release, so the set only ever holds keys that are currently locked.
#[derive(Debug, Default)]
pub struct KeyLock {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    acquisitions: AtomicU64,
    contentions: AtomicU64,
}

/// RAII guard for one held key
#[derive(Debug)]
pub struct KeyLockGuard<'a> {
    owner: &'a KeyLock,
    key: String,
    released: bool,
}

/// Counters for lock activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLockMetrics {
    pub acquisitions: u64,
    pub contentions: u64,
    pub held: usize,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn held_set(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set is only mutated by single insert/remove calls, so a
        // poisoned guard still holds a consistent set.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `key` is free, then take it
    pub fn acquire(&self, key: &str) -> KeyLockGuard<'_> {
        let mut held = self.held_set();
        if held.contains(key) {
            self.contentions.fetch_add(1, Ordering::Relaxed);
            debug!("Waiting for key lock {}", key);
            while held.contains(key) {
                held = self
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        held.insert(key.to_string());
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        KeyLockGuard {
            owner: self,
            key: key.to_string(),
            released: false,
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held_set().contains(key)
    }

    pub fn metrics(&self) -> KeyLockMetrics {
        KeyLockMetrics {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contentions: self.contentions.load(Ordering::Relaxed),
            held: self.held_set().len(),
        }
    }

    fn release_key(&self, key: &str) {
        let mut held = self.held_set();
        held.remove(key);
        drop(held);
        self.released.notify_all();
    }
}

impl KeyLockGuard<'_> {
    /// Release the key. Calling this more than once is harmless.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.owner.release_key(&self.key);
        }
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
