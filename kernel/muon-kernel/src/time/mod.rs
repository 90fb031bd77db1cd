//! The clock registry and timer worker.
//!
//! [`TimeKeeper`] owns the kernel-wide clocks (monotonic, realtime, boot,
//! init); per-process and per-thread CPU clocks live on their owners and
//! are charged through [`TimeKeeper::charge`]. The hardware tick lands in
//! [`TimeKeeper::tick`], which advances the wall clocks and queues any
//! worker-context timer firings; the timer worker thread drains them with
//! [`TimeKeeper::drain_worker`].

extern crate alloc;

pub mod clock;
pub mod timer;

use alloc::sync::Arc;

use muon_core::sync::SpinLock;
use muon_syscall::time::Timespec;
use planck_noalloc::vec::ArrayVec;

use crate::config::TIMER_WORKER_CAPACITY;
pub use clock::{Clock, ClockError};
pub use timer::{TimerCallback, TimerFlags, TimerId};

/// One queued worker-context firing.
struct DeferredFire {
    clock: Arc<Clock>,
    id: TimerId,
}

/// The kernel's clock registry.
pub struct TimeKeeper {
    /// Monotonic time since an arbitrary origin; never set.
    pub monotonic: Arc<Clock>,
    /// Wall-clock time; settable.
    pub realtime: Arc<Clock>,
    /// Monotonic time since boot.
    pub boottime: Arc<Clock>,
    /// Monotonic time since init started.
    pub init: Arc<Clock>,
    worker: SpinLock<ArrayVec<DeferredFire, TIMER_WORKER_CAPACITY>>,
}

impl TimeKeeper {
    /// Creates the registry with all clocks at zero.
    pub fn new() -> Self {
        Self {
            monotonic: Arc::new(Clock::new_interrupt_callable()),
            realtime: Arc::new(Clock::new_interrupt_callable()),
            boottime: Arc::new(Clock::new_interrupt_callable()),
            init: Arc::new(Clock::new_interrupt_callable()),
            worker: SpinLock::new(ArrayVec::new()),
        }
    }

    /// Hardware-tick entry: advances the wall clocks by `duration`.
    pub fn tick(&self, duration: Timespec) {
        for clock in [&self.monotonic, &self.realtime, &self.boottime, &self.init] {
            self.advance_clock(clock, duration);
        }
    }

    /// Advances one clock, queueing its worker-context firings.
    pub fn advance_clock(&self, clock: &Arc<Clock>, duration: Timespec) {
        for id in clock.advance(duration) {
            self.queue_deferred(clock.clone(), id);
        }
    }

    fn queue_deferred(&self, clock: Arc<Clock>, id: TimerId) {
        let overflow = {
            let mut worker = self.worker.lock();
            if worker.is_full() {
                Some(DeferredFire { clock, id })
            } else {
                worker.push(DeferredFire { clock, id });
                None
            }
        };
        // A full queue degrades to firing in the caller's context rather
        // than dropping the event.
        if let Some(fire) = overflow {
            fire.clock.run_deferred(fire.id);
        }
    }

    /// Drains the worker queue. Returns how many firings ran.
    ///
    /// On hardware this is the timer worker thread's loop body; in tests
    /// it is called directly.
    pub fn drain_worker(&self) -> usize {
        let mut ran = 0;
        loop {
            let fire = self.worker.lock().pop();
            match fire {
                Some(fire) => {
                    fire.clock.run_deferred(fire.id);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Charges `duration` to a set of CPU-time clocks. Used by the
    /// scheduler tick for the running thread's and process's clocks.
    pub fn charge(&self, clocks: &[&Arc<Clock>], duration: Timespec) {
        for clock in clocks {
            self.advance_clock(clock, duration);
        }
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(millis: i64) -> Timespec {
        Timespec::from_nanos(millis * 1_000_000)
    }

    #[test]
    fn tick_advances_every_wall_clock() {
        let time = TimeKeeper::new();
        time.tick(ms(10));
        assert_eq!(time.monotonic.get().0, ms(10));
        assert_eq!(time.realtime.get().0, ms(10));
        assert_eq!(time.boottime.get().0, ms(10));
        assert_eq!(time.init.get().0, ms(10));
    }

    #[test]
    fn worker_firings_run_on_drain() {
        let time = TimeKeeper::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = time.monotonic.create_timer();
        time.monotonic
            .timer_set(
                id,
                muon_syscall::time::Itimerspec {
                    it_interval: Timespec::zero(),
                    it_value: ms(5),
                },
                TimerFlags::FUNC_ADVANCE_THREAD,
                Arc::new(move |_| {
                    h.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();

        time.tick(ms(10));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(time.drain_worker(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn charge_advances_cpu_clocks_only() {
        let time = TimeKeeper::new();
        let cpu = Arc::new(Clock::new());
        time.charge(&[&cpu], ms(3));
        assert_eq!(cpu.get().0, ms(3));
        assert_eq!(time.monotonic.get().0, Timespec::zero());
    }
}
