//! Interrupt-masking spin lock.
//!
//! Disables interrupts before acquiring the inner lock and restores the
//! prior interrupt state on release. Required for any state touched from
//! interrupt handlers (notably the interrupt-callable clocks): an ordinary
//! spin lock taken in both thread and interrupt context can deadlock the
//! moment the interrupt arrives while the thread holds the lock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A spin lock whose critical sections run with interrupts masked.
pub struct IrqSpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: Same reasoning as `SpinLock` — the atomic flag serializes access.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, masking interrupts for the lifetime of the guard.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let saved_flags = save_flags_and_disable();

        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return IrqSpinLockGuard {
                    lock: self,
                    saved_flags,
                };
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }
}

/// RAII guard for [`IrqSpinLock`]; restores the saved interrupt state on drop.
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
    saved_flags: usize,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        restore_flags(self.saved_flags);
    }
}

/// Saves the current interrupt-enable state and masks interrupts.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn save_flags_and_disable() -> usize {
    let flags: usize;
    // SAFETY: pushfq/pop reads RFLAGS; cli only masks interrupts.
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {}",
            "cli",
            out(reg) flags,
            options(nomem, preserves_flags)
        );
    }
    flags
}

/// Restores a previously saved interrupt-enable state.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn restore_flags(flags: usize) {
    const IF: usize = 1 << 9;
    if flags & IF != 0 {
        // SAFETY: Re-enabling interrupts that were enabled before is sound.
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack));
        }
    }
}

/// Hosted builds have no interrupt flag; the lock degrades to a plain spin lock.
#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
fn save_flags_and_disable() -> usize {
    0
}

#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
fn restore_flags(_flags: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_mutate() {
        let lock = IrqSpinLock::new(1u64);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 2);
    }

    #[test]
    fn sequential_reacquisition() {
        let lock = IrqSpinLock::new(());
        drop(lock.lock());
        drop(lock.lock());
    }
}
