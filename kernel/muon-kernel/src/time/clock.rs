//! Virtual clocks with attached timers.
//!
//! A clock keeps its current time and two strictly ordered timer lists:
//! absolute timers ordered by expiry, and delay timers delta-encoded by
//! remaining duration. [`Clock::advance`] moves time forward, fires due
//! timers in expiry order, reschedules periodic ones, and accounts
//! overruns as `missed - 1` per pile-up.
//!
//! A clock constructed interrupt-callable guards its state with an
//! interrupt-masking lock (prior state restored on release); other clocks
//! use the plain spin lock. Callbacks flagged `FUNC_INTERRUPT_HANDLER` run
//! inside `advance`; `FUNC_ADVANCE_THREAD` callbacks are handed back for
//! the timer worker.

extern crate alloc;

use alloc::vec::Vec;

use muon_core::sync::{IrqSpinLock, SpinLock};
use muon_syscall::time::{Itimerspec, Timespec};

use super::timer::{TimerArena, TimerCallback, TimerFlags, TimerId};

/// Errors from timer manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The timer id does not name a live timer of this clock.
    BadTimer,
    /// The timer setting is malformed.
    BadValue,
}

struct ClockState {
    current_time: Timespec,
    advancement: Timespec,
    resolution: Timespec,
    arena: TimerArena,
    absolute_head: Option<usize>,
    delay_head: Option<usize>,
}

impl ClockState {
    const fn new() -> Self {
        Self {
            current_time: Timespec::zero(),
            advancement: Timespec::zero(),
            resolution: Timespec { tv_sec: 0, tv_nsec: 1_000_000 },
            arena: TimerArena::new(),
            absolute_head: None,
            delay_head: None,
        }
    }
}

/// Lock flavour, fixed at construction.
enum StateLock {
    Plain(SpinLock<ClockState>),
    Irq(IrqSpinLock<ClockState>),
}

impl StateLock {
    fn with<R>(&self, f: impl FnOnce(&mut ClockState) -> R) -> R {
        match self {
            Self::Plain(lock) => f(&mut lock.lock()),
            Self::Irq(lock) => f(&mut lock.lock()),
        }
    }
}

/// A virtual time source with attached timers.
pub struct Clock {
    lock: StateLock,
}

impl Clock {
    /// Creates a clock at time zero with millisecond resolution.
    pub const fn new() -> Self {
        Self {
            lock: StateLock::Plain(SpinLock::new(ClockState::new())),
        }
    }

    /// Creates a clock whose lock masks interrupts, for clocks advanced
    /// from the hardware tick handler.
    pub const fn new_interrupt_callable() -> Self {
        Self {
            lock: StateLock::Irq(IrqSpinLock::new(ClockState::new())),
        }
    }

    /// Sets the current time (and optionally the resolution).
    pub fn set(&self, now: Timespec, resolution: Option<Timespec>) {
        self.lock.with(|state| {
            state.current_time = now;
            if let Some(resolution) = resolution {
                state.resolution = resolution;
            }
        });
    }

    /// Returns `(current_time, resolution)`.
    pub fn get(&self) -> (Timespec, Timespec) {
        self.lock.with(|state| (state.current_time, state.resolution))
    }

    /// Total time this clock has been advanced.
    pub fn advancement(&self) -> Timespec {
        self.lock.with(|state| state.advancement)
    }

    // ── Timer lifecycle ─────────────────────────────────────────────

    /// Creates a detached timer slot on this clock.
    pub fn create_timer(&self) -> TimerId {
        self.lock.with(|state| state.arena.allocate())
    }

    /// Releases a timer slot, detaching it first.
    pub fn release_timer(&self, id: TimerId) {
        self.lock.with(|state| {
            if state.arena.get(id).is_some() {
                state.detach(id.index);
                state.arena.release(id);
            }
        });
    }

    /// Arms or disarms a timer, returning the previous setting.
    ///
    /// `flags` carries `ABSOLUTE` (interpret `it_value` as wall expiry)
    /// and the firing-context choice. A zero `it_value` disarms.
    ///
    /// # Errors
    ///
    /// [`ClockError::BadTimer`] for a dead id, [`ClockError::BadValue`]
    /// for non-canonical or negative settings.
    pub fn timer_set(
        &self,
        id: TimerId,
        value: Itimerspec,
        flags: TimerFlags,
        callback: TimerCallback,
    ) -> Result<Itimerspec, ClockError> {
        if !value.it_value.is_canonical()
            || !value.it_interval.is_canonical()
            || value.it_value.is_negative()
            || value.it_interval.is_negative()
        {
            return Err(ClockError::BadValue);
        }
        self.lock.with(|state| {
            state.arena.get(id).ok_or(ClockError::BadTimer)?;
            let old = state.remaining(id);

            state.detach(id.index);
            {
                let slot = state.arena.slot_mut(id.index);
                slot.callback = Some(callback);
                slot.value = value;
                slot.flags &= TimerFlags::FIRING; // keep an in-progress firing visible
                slot.flags |= flags
                    & (TimerFlags::ABSOLUTE
                        | TimerFlags::FUNC_INTERRUPT_HANDLER
                        | TimerFlags::FUNC_ADVANCE_THREAD);
            }

            if !value.it_value.is_zero() {
                if flags.contains(TimerFlags::ABSOLUTE) {
                    state.attach_absolute(id.index);
                } else {
                    state.attach_delay(id.index, value.it_value);
                }
            }
            Ok(old)
        })
    }

    /// Returns the remaining time and interval of a timer.
    pub fn timer_get(&self, id: TimerId) -> Result<Itimerspec, ClockError> {
        self.lock.with(|state| {
            state.arena.get(id).ok_or(ClockError::BadTimer)?;
            Ok(state.remaining(id))
        })
    }

    /// Detaches a timer without releasing its slot.
    pub fn timer_cancel(&self, id: TimerId) -> Result<(), ClockError> {
        self.lock.with(|state| {
            state.arena.get(id).ok_or(ClockError::BadTimer)?;
            state.detach(id.index);
            Ok(())
        })
    }

    /// Accumulated overrun count of a timer.
    pub fn timer_overruns(&self, id: TimerId) -> Result<usize, ClockError> {
        self.lock.with(|state| {
            state
                .arena
                .get(id)
                .map(|slot| slot.num_overrun_events)
                .ok_or(ClockError::BadTimer)
        })
    }

    // ── Advancement ─────────────────────────────────────────────────

    /// Advances the clock, firing due timers in expiry order.
    ///
    /// Interrupt-context callbacks run before this returns; the returned
    /// ids are worker-context firings the caller must queue and later run
    /// through [`Clock::run_deferred`].
    pub fn advance(&self, duration: Timespec) -> Vec<TimerId> {
        let mut inline = Vec::new();
        let mut deferred = Vec::new();
        self.lock.with(|state| {
            state.current_time = state.current_time.add(duration);
            state.advancement = state.advancement.add(duration);

            // Delay list: consume the head's delta until the duration is
            // spent. The running excess is each fired timer's lateness.
            let mut excess = duration;
            while let Some(head) = state.delay_head {
                let left = state.arena.slot(head).delay_left;
                if left > excess {
                    state.arena.slot_mut(head).delay_left = left.sub(excess);
                    break;
                }
                excess = excess.sub(left);
                // The delta is consumed by the firing, not donated.
                state.arena.slot_mut(head).delay_left = Timespec::zero();
                state.detach(head);
                let id = state.arena.id_of(head);
                state.prepare_fire(id, excess, &mut inline, &mut deferred);
            }

            // Absolute list: fire while the head has expired.
            while let Some(head) = state.absolute_head {
                let expiry = state.arena.slot(head).value.it_value;
                if expiry > state.current_time {
                    break;
                }
                state.detach(head);
                let id = state.arena.id_of(head);
                let late = state.current_time.sub(expiry);
                state.prepare_fire(id, late, &mut inline, &mut deferred);
            }
        });

        for (id, callback) in inline {
            callback(id);
            self.complete_fire(id);
        }
        deferred
    }

    /// Runs one deferred (worker-context) firing.
    pub fn run_deferred(&self, id: TimerId) {
        let callback = self
            .lock
            .with(|state| state.arena.get(id).and_then(|slot| slot.callback.clone()));
        if let Some(callback) = callback {
            callback(id);
        }
        self.complete_fire(id);
    }

    fn complete_fire(&self, id: TimerId) {
        self.lock.with(|state| {
            if let Some(slot) = state.arena.get_mut(id) {
                slot.num_firings_scheduled = slot.num_firings_scheduled.saturating_sub(1);
                if slot.num_firings_scheduled == 0 {
                    slot.flags.remove(TimerFlags::FIRING);
                }
            }
        });
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn timespec_mul(ts: Timespec, factor: i128) -> Timespec {
    let nanos = ts.total_nanos().saturating_mul(factor);
    let clamped = nanos.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
    Timespec::from_nanos(clamped)
}

impl ClockState {
    /// Remaining-time view of a timer (`timer_gettime` semantics).
    fn remaining(&self, id: TimerId) -> Itimerspec {
        let Some(slot) = self.arena.get(id) else {
            return Itimerspec::zero();
        };
        if !slot.flags.contains(TimerFlags::ACTIVE) {
            return Itimerspec {
                it_interval: slot.value.it_interval,
                it_value: Timespec::zero(),
            };
        }
        let value = if slot.flags.contains(TimerFlags::ABSOLUTE) {
            let left = slot.value.it_value.sub(self.current_time);
            if left.is_negative() { Timespec::zero() } else { left }
        } else {
            // Sum the delta chain up to and including this timer.
            let mut total = Timespec::zero();
            let mut cursor = self.delay_head;
            while let Some(index) = cursor {
                total = total.add(self.arena.slot(index).delay_left);
                if index == id.index {
                    break;
                }
                cursor = self.arena.slot(index).next;
            }
            total
        };
        Itimerspec {
            it_interval: slot.value.it_interval,
            it_value: value,
        }
    }

    /// Unlinks a timer from whichever list holds it.
    fn detach(&mut self, index: usize) {
        if !self.arena.slot(index).flags.contains(TimerFlags::ACTIVE) {
            return;
        }
        let (prev, next) = {
            let slot = self.arena.slot(index);
            (slot.prev, slot.next)
        };
        let in_delay_list = !self.arena.slot(index).flags.contains(TimerFlags::ABSOLUTE);

        // A cancelled delay timer donates its delta to its successor so
        // everything behind it keeps its schedule.
        if in_delay_list {
            let donated = self.arena.slot(index).delay_left;
            if let Some(next) = next {
                let slot = self.arena.slot_mut(next);
                slot.delay_left = slot.delay_left.add(donated);
            }
        }

        match prev {
            Some(prev) => self.arena.slot_mut(prev).next = next,
            None => {
                if in_delay_list {
                    self.delay_head = next;
                } else {
                    self.absolute_head = next;
                }
            }
        }
        if let Some(next) = next {
            self.arena.slot_mut(next).prev = prev;
        }

        let slot = self.arena.slot_mut(index);
        slot.prev = None;
        slot.next = None;
        slot.flags.remove(TimerFlags::ACTIVE);
    }

    /// Ordered insert by absolute expiry; ties keep insertion order.
    fn attach_absolute(&mut self, index: usize) {
        let expiry = self.arena.slot(index).value.it_value;
        let mut prev = None;
        let mut cursor = self.absolute_head;
        while let Some(current) = cursor {
            if self.arena.slot(current).value.it_value > expiry {
                break;
            }
            prev = Some(current);
            cursor = self.arena.slot(current).next;
        }
        self.link_between(index, prev, cursor, false);
    }

    /// Delta-encoded insert at `delay` from now.
    fn attach_delay(&mut self, index: usize, delay: Timespec) {
        let mut remaining = delay;
        let mut prev = None;
        let mut cursor = self.delay_head;
        while let Some(current) = cursor {
            let left = self.arena.slot(current).delay_left;
            if left > remaining {
                // Insert before `current`, which now trails us.
                self.arena.slot_mut(current).delay_left = left.sub(remaining);
                break;
            }
            remaining = remaining.sub(left);
            prev = Some(current);
            cursor = self.arena.slot(current).next;
        }
        self.arena.slot_mut(index).delay_left = remaining;
        self.link_between(index, prev, cursor, true);
    }

    fn link_between(
        &mut self,
        index: usize,
        prev: Option<usize>,
        next: Option<usize>,
        delay_list: bool,
    ) {
        {
            let slot = self.arena.slot_mut(index);
            slot.prev = prev;
            slot.next = next;
            slot.flags.insert(TimerFlags::ACTIVE);
        }
        match prev {
            Some(prev) => self.arena.slot_mut(prev).next = Some(index),
            None => {
                if delay_list {
                    self.delay_head = Some(index);
                } else {
                    self.absolute_head = Some(index);
                }
            }
        }
        if let Some(next) = next {
            self.arena.slot_mut(next).prev = Some(index);
        }
    }

    /// Reschedules and classifies one due timer.
    fn prepare_fire(
        &mut self,
        id: TimerId,
        late: Timespec,
        inline: &mut Vec<(TimerId, TimerCallback)>,
        deferred: &mut Vec<TimerId>,
    ) {
        let Some(slot) = self.arena.get_mut(id) else {
            return;
        };

        let interval = slot.value.it_interval;
        let mut fires: usize = 1;
        if !interval.is_zero() && !late.is_zero() {
            let extra = late.total_nanos() / interval.total_nanos();
            fires += extra as usize;
        }

        let busy = slot.num_firings_scheduled > 0 || slot.flags.contains(TimerFlags::FIRING);
        if busy {
            // The whole batch lands on top of a firing still in flight.
            slot.num_overrun_events += fires;
        } else {
            slot.num_overrun_events += fires - 1;
            slot.num_firings_scheduled += 1;
            slot.flags.insert(TimerFlags::FIRING);
            let callback = slot.callback.clone();
            let run_inline = slot.flags.contains(TimerFlags::FUNC_INTERRUPT_HANDLER);
            if let Some(callback) = callback {
                if run_inline {
                    inline.push((id, callback));
                } else {
                    deferred.push(id);
                }
            }
        }

        // Periodic timers rearm for the first period strictly in the
        // future; one-shot timers disarm.
        if interval.is_zero() {
            let slot = self.arena.slot_mut(id.index);
            slot.value.it_value = Timespec::zero();
        } else if self.arena.slot(id.index).flags.contains(TimerFlags::ABSOLUTE) {
            let slot = self.arena.slot_mut(id.index);
            slot.value.it_value = slot
                .value
                .it_value
                .add(timespec_mul(interval, fires as i128));
            self.attach_absolute(id.index);
        } else {
            let consumed = late.total_nanos() % interval.total_nanos();
            let next_in = interval.total_nanos() - consumed;
            let next_in = Timespec::from_nanos(next_in.clamp(1, i128::from(i64::MAX)) as i64);
            self.attach_delay(id.index, next_in);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use std::sync::Mutex;

    fn ms(millis: i64) -> Timespec {
        Timespec::from_nanos(millis * 1_000_000)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<&'static str>>>,
        impl Fn(&'static str) -> TimerCallback,
    ) {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |name: &'static str| -> TimerCallback {
            let log = log2.clone();
            Arc::new(move |_id| log.lock().unwrap().push(name))
        };
        (log, make)
    }

    fn set_inline(
        clock: &Clock,
        id: TimerId,
        value: Itimerspec,
        absolute: bool,
        callback: TimerCallback,
    ) {
        let mut flags = TimerFlags::FUNC_INTERRUPT_HANDLER;
        if absolute {
            flags |= TimerFlags::ABSOLUTE;
        }
        clock.timer_set(id, value, flags, callback).unwrap();
    }

    fn one_shot(when_ms: i64) -> Itimerspec {
        Itimerspec {
            it_interval: Timespec::zero(),
            it_value: ms(when_ms),
        }
    }

    #[test]
    fn timers_fire_in_expiry_order() {
        let clock = Clock::new();
        let (log, cb) = recorder();

        let slow = clock.create_timer();
        let fast = clock.create_timer();
        let wall = clock.create_timer();
        set_inline(&clock, slow, one_shot(30), false, cb("slow"));
        set_inline(&clock, fast, one_shot(10), false, cb("fast"));
        set_inline(&clock, wall, one_shot(20), true, cb("wall"));

        clock.advance(ms(10));
        assert_eq!(*log.lock().unwrap(), ["fast"]);
        clock.advance(ms(10));
        assert_eq!(*log.lock().unwrap(), ["fast", "wall"]);
        clock.advance(ms(10));
        assert_eq!(*log.lock().unwrap(), ["fast", "wall", "slow"]);
    }

    #[test]
    fn one_shot_disarms_after_firing() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let id = clock.create_timer();
        set_inline(&clock, id, one_shot(5), false, cb("x"));
        clock.advance(ms(100));
        clock.advance(ms(100));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(clock.timer_get(id).unwrap().it_value.is_zero());
    }

    #[test]
    fn periodic_timer_reschedules() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let id = clock.create_timer();
        set_inline(
            &clock,
            id,
            Itimerspec { it_interval: ms(10), it_value: ms(10) },
            false,
            cb("tick"),
        );
        for _ in 0..5 {
            clock.advance(ms(10));
        }
        assert_eq!(log.lock().unwrap().len(), 5);
        assert_eq!(clock.timer_overruns(id).unwrap(), 0);
    }

    #[test]
    fn overrun_counts_missed_periods_minus_one() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let id = clock.create_timer();
        set_inline(
            &clock,
            id,
            Itimerspec { it_interval: ms(10), it_value: ms(10) },
            false,
            cb("tick"),
        );
        // One jump over 5 periods: fires once, overruns 4.
        clock.advance(ms(50));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(clock.timer_overruns(id).unwrap(), 4);
        // The next period still arrives on schedule.
        clock.advance(ms(10));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn timer_set_returns_previous_remaining() {
        let clock = Clock::new();
        let (_log, cb) = recorder();
        let id = clock.create_timer();
        set_inline(&clock, id, one_shot(100), false, cb("a"));
        clock.advance(ms(40));
        let old = clock
            .timer_set(
                id,
                one_shot(10),
                TimerFlags::FUNC_INTERRUPT_HANDLER,
                cb("b"),
            )
            .unwrap();
        assert_eq!(old.it_value, ms(60));
    }

    #[test]
    fn cancel_prevents_firing() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let id = clock.create_timer();
        set_inline(&clock, id, one_shot(5), false, cb("never"));
        clock.timer_cancel(id).unwrap();
        clock.advance(ms(100));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn deferred_firings_are_returned_not_run() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let id = clock.create_timer();
        clock
            .timer_set(id, one_shot(5), TimerFlags::FUNC_ADVANCE_THREAD, cb("worker"))
            .unwrap();
        let deferred = clock.advance(ms(10));
        assert_eq!(deferred.len(), 1);
        assert!(log.lock().unwrap().is_empty());
        clock.run_deferred(deferred[0]);
        assert_eq!(*log.lock().unwrap(), ["worker"]);
    }

    #[test]
    fn delay_list_survives_mixed_inserts_and_cancels() {
        let clock = Clock::new();
        let (log, cb) = recorder();
        let a = clock.create_timer();
        let b = clock.create_timer();
        let c = clock.create_timer();
        for (id, when, name) in [(a, 30, "a"), (b, 10, "b"), (c, 20, "c")] {
            set_inline(&clock, id, one_shot(when), false, cb(name));
        }
        // Cancel the middle one; its delta donates to the successor so
        // "a" still fires at 30.
        clock.timer_cancel(c).unwrap();
        clock.advance(ms(29));
        assert_eq!(*log.lock().unwrap(), ["b"]);
        clock.advance(ms(1));
        assert_eq!(*log.lock().unwrap(), ["b", "a"]);
    }

    #[test]
    fn stale_timer_ids_miss_after_release() {
        let clock = Clock::new();
        let id = clock.create_timer();
        clock.release_timer(id);
        assert_eq!(clock.timer_get(id), Err(ClockError::BadTimer));
        let reused = clock.create_timer();
        assert_eq!(reused.index, id.index);
        assert_ne!(reused.generation, id.generation);
    }
}
