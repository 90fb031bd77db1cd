//! Spin-based mutual exclusion lock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A spin-based mutual exclusion lock.
///
/// Acquisition spins with a test-and-test-and-set loop so contended waiters
/// read a shared cache line instead of hammering it with writes. The lock is
/// const-constructable and therefore usable in `static` items.
///
/// On the single-CPU kernel, holding a `SpinLock` also keeps the scheduler
/// from switching away from the owner; critical sections must not block.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: The atomic `locked` flag serializes all access to `data`, so the
// lock may be shared between threads whenever the payload itself is Send.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it becomes available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `None` if the lock is currently held. Useful on panic paths
    /// where spinning on a lock the panicking thread may own would hang.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the data, bypassing the lock.
    ///
    /// Statically safe: `&mut self` proves no guard is alive.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock and returns the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII guard returned by [`SpinLock::lock`]; releases the lock on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_releases_on_drop() {
        let lock = SpinLock::new(7);
        {
            let guard = lock.lock();
            assert_eq!(*guard, 7);
        }
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn mutation_is_visible_after_release() {
        let lock = SpinLock::new(0u32);
        *lock.lock() = 41;
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn get_mut_bypasses_lock() {
        let mut lock = SpinLock::new(5);
        *lock.get_mut() = 6;
        assert_eq!(lock.into_inner(), 6);
    }
}
