//! Poison-recovering lock extension traits.
//!
//! A panic in one session or persist thread while it holds the buffer
//! lock must not take every other reader and the collector down with it.
//! These helpers recover the guard from a `PoisonError` and log once per
//! occurrence instead of propagating the panic.
//!
//! Usage:
//! ```ignore
//! use crate::lock_ext::{MutexExt, RwLockExt};
//!
//! let stats = stats_mutex.lock_poisoned();
//! let queues = queues_rwlock.read_poisoned();
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Extension trait that adds poison-recovering methods to `Mutex`.
pub trait MutexExt<T> {
    /// Acquire the mutex, recovering from a poisoned state.
    fn lock_poisoned(&self) -> MutexGuard<'_, T>;
}

/// Extension trait that adds poison-recovering methods to `RwLock`.
pub trait RwLockExt<T> {
    /// Acquire a read lock, recovering from a poisoned state.
    fn read_poisoned(&self) -> RwLockReadGuard<'_, T>;

    /// Acquire a write lock, recovering from a poisoned state.
    fn write_poisoned(&self) -> RwLockWriteGuard<'_, T>;
}

/// Extension trait for timed condition variable waits on a poisoned mutex.
pub trait CondvarExt {
    /// Wait up to `timeout`, recovering the guard if the mutex was poisoned.
    fn wait_timeout_poisoned<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> MutexGuard<'a, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_poisoned(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| {
            log::warn!("Recovered poisoned Mutex (a thread panicked while holding this lock)");
            e.into_inner()
        })
    }
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_poisoned(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|e| {
            log::warn!(
                "Recovered poisoned RwLock (read) (a thread panicked while holding this lock)"
            );
            e.into_inner()
        })
    }

    fn write_poisoned(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|e| {
            log::warn!(
                "Recovered poisoned RwLock (write) (a thread panicked while holding this lock)"
            );
            e.into_inner()
        })
    }
}

impl CondvarExt for Condvar {
    fn wait_timeout_poisoned<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> MutexGuard<'a, T> {
        match self.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(e) => {
                log::warn!("Recovered poisoned Mutex while waiting on a condition variable");
                e.into_inner().0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_poisoned_recovers() {
        let m = Arc::new(Mutex::new(1u32));
        let m2 = Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(m.is_poisoned());
        *m.lock_poisoned() += 1;
        assert_eq!(*m.lock_poisoned(), 2);
    }

    #[test]
    fn test_rwlock_poisoned_recovers() {
        let l = Arc::new(RwLock::new(vec![1]));
        let l2 = Arc::clone(&l);
        let _ = std::thread::spawn(move || {
            let _g = l2.write().unwrap();
            panic!("poison");
        })
        .join();
        l.write_poisoned().push(2);
        assert_eq!(l.read_poisoned().len(), 2);
    }

    #[test]
    fn test_wait_timeout_returns_guard() {
        let m = Mutex::new(false);
        let cv = Condvar::new();
        let g = m.lock_poisoned();
        let g = cv.wait_timeout_poisoned(g, Duration::from_millis(1));
        assert!(!*g);
    }
}
