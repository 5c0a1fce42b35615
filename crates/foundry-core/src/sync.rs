//! Lock helpers that treat poisoning as recoverable.
//!
//! Job records are only ever mutated through short, non-panicking critical
//! sections, so a poisoned lock carries no information worth propagating.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Extension trait for `Mutex` that ignores lock poisoning.
pub trait IgnoreLock<T> {
    /// Lock the mutex, recovering the guard if a previous holder panicked.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnoreLock<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Extension trait for `RwLock` that ignores lock poisoning.
pub trait IgnoreRwLock<T> {
    /// Acquire a shared read guard, recovering from poisoning.
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T>;

    /// Acquire an exclusive write guard, recovering from poisoning.
    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> IgnoreRwLock<T> for RwLock<T> {
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mutex_survives_poisoning() {
        let shared = Arc::new(Mutex::new(vec![1_u32]));
        let poisoner = Arc::clone(&shared);
        let outcome = thread::spawn(move || {
            let _guard = poisoner.lock_ignore_poison();
            panic!("poison the lock");
        })
        .join();
        assert!(matches!(outcome, Err(_)));
        assert!(shared.is_poisoned());

        shared.lock_ignore_poison().push(2);
        assert_eq!(*shared.lock_ignore_poison(), vec![1, 2]);
    }

    #[test]
    fn test_rwlock_read_write() {
        let lock = RwLock::new(vec![1, 2]);
        lock.write_ignore_poison().push(3);
        assert_eq!(lock.read_ignore_poison().len(), 3);
    }
}
