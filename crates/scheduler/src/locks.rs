//! Per-key load locks
//!
//! One mutex per distinct key, created on first use and shared by every
//! task loading that key. The registry only keeps weak references, so a
//! lock disappears once the last task holding it finishes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Mutual exclusion for one key. Hold the guard from `lock()` while loading.
pub type LoadLock = Arc<Mutex<()>>;

/// Registry of per-key load locks
///
/// ```
/// use image_loader_scheduler::KeyedLocks;
///
/// let locks = KeyedLocks::new();
/// let a = locks.lock_for("http://example.com/a.png");
/// let b = locks.lock_for("http://example.com/a.png");
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
///
/// let _guard = a.lock();
/// assert!(b.is_locked());
/// ```
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it if no live one exists
    pub fn lock_for(&self, key: &str) -> LoadLock {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of keys with a live lock
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every lock. Holders keep theirs; new requests get fresh ones.
    pub fn clear(&self) {
        self.locks.lock().clear();
    }
}
