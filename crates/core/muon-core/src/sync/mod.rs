//! Synchronization primitives.
//!
//! The kernel uses one lock per independent data structure. [`SpinLock`] is
//! the workhorse; [`IrqSpinLock`] additionally masks interrupts while held,
//! for state shared with interrupt handlers (the interrupt-callable clocks).
//! [`WakeCondition`] is the rendezvous object between a blocking thread and
//! its waker.

mod condition;
mod irq_spinlock;
mod spinlock;

pub use condition::WakeCondition;
pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
