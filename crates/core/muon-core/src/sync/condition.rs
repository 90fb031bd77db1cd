//! Wake conditions for blocking kernel paths.
//!
//! A thread that must block publishes its interest in a [`WakeCondition`]
//! and leaves the runnable set; whoever makes the awaited state true calls
//! [`WakeCondition::signal`], which runs every registered waker. Wakers are
//! supplied by the scheduler layer and typically mark one thread runnable.
//!
//! Wakeups are permitted to be spurious: a woken thread must re-check the
//! predicate it blocked on (the would-block operation is simply re-issued).

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::SpinLock;

/// A function run when a condition is signalled.
pub type WakeFn = Box<dyn Fn() + Send + Sync>;

struct Inner {
    /// Set by `signal`, consumed by the next `subscribe`.
    signalled: bool,
    waiters: Vec<WakeFn>,
}

/// Rendezvous object between blocking threads and their wakers.
pub struct WakeCondition {
    inner: SpinLock<Inner>,
}

impl WakeCondition {
    /// Creates a condition with no pending signal and no waiters.
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                signalled: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Signals the condition: marks it signalled and runs all wakers.
    ///
    /// Wakers run outside the internal lock, so a waker may itself
    /// subscribe or signal without deadlocking.
    pub fn signal(&self) {
        let woken = {
            let mut inner = self.inner.lock();
            inner.signalled = true;
            core::mem::take(&mut inner.waiters)
        };
        for waker in &woken {
            waker();
        }
    }

    /// Registers a waker, unless a signal already arrived.
    ///
    /// Returns `true` (consuming the pending signal, not registering) if
    /// the condition was signalled since it was last observed; the caller
    /// should re-check its predicate instead of blocking. Returns `false`
    /// after registering the waker for the next [`signal`](Self::signal).
    pub fn subscribe(&self, waker: WakeFn) -> bool {
        let mut inner = self.inner.lock();
        if inner.signalled {
            inner.signalled = false;
            return true;
        }
        inner.waiters.push(waker);
        false
    }

    /// Returns whether a signal is pending.
    pub fn is_signalled(&self) -> bool {
        self.inner.lock().signalled
    }

    /// Discards a pending signal, if any.
    pub fn clear(&self) {
        self.inner.lock().signalled = false;
    }
}

impl Default for WakeCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn signal_runs_registered_wakers() {
        let cond = WakeCondition::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        assert!(!cond.subscribe(Box::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        })));
        cond.signal();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn subscribe_consumes_prior_signal() {
        let cond = WakeCondition::new();
        cond.signal();
        // Signal arrived before the subscription: do not block.
        assert!(cond.subscribe(Box::new(|| {})));
        // The pending signal was consumed.
        assert!(!cond.is_signalled());
    }

    #[test]
    fn wakers_fire_once() {
        let cond = WakeCondition::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        cond.subscribe(Box::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        }));
        cond.signal();
        cond.signal();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
