//! Timer slots and handles.
//!
//! Timers live in a slab inside their clock; list links are slot indices,
//! never pointers. A [`TimerId`] carries a generation counter so a stale
//! handle can not reach a recycled slot.

extern crate alloc;

use alloc::sync::Arc;

use bitflags::bitflags;
use muon_syscall::time::{Itimerspec, Timespec};

bitflags! {
    /// Timer state and behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerFlags: u32 {
        /// `it_value` is an absolute time on the clock.
        const ABSOLUTE = 1 << 0;
        /// The timer is attached to a list.
        const ACTIVE = 1 << 1;
        /// A firing is in progress or queued.
        const FIRING = 1 << 2;
        /// Run the callback directly in the interrupt path.
        const FUNC_INTERRUPT_HANDLER = 1 << 3;
        /// Queue the callback to the timer worker.
        const FUNC_ADVANCE_THREAD = 1 << 4;
    }
}

/// A timer callback. Runs either in interrupt context or on the timer
/// worker, per the timer's flags.
pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

/// Generation-checked reference to a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

pub(crate) struct TimerSlot {
    pub(crate) generation: u32,
    pub(crate) value: Itimerspec,
    pub(crate) flags: TimerFlags,
    pub(crate) callback: Option<TimerCallback>,
    /// Completed-minus-one firings that never ran (periodic pile-ups).
    pub(crate) num_overrun_events: usize,
    /// Worker firings queued but not yet completed.
    pub(crate) num_firings_scheduled: usize,
    /// Delta behind the predecessor in the delay list.
    pub(crate) delay_left: Timespec,
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
}

/// The per-clock timer slab.
pub(crate) struct TimerArena {
    slots: alloc::vec::Vec<Option<TimerSlot>>,
    free: alloc::vec::Vec<usize>,
}

impl TimerArena {
    pub(crate) const fn new() -> Self {
        Self {
            slots: alloc::vec::Vec::new(),
            free: alloc::vec::Vec::new(),
        }
    }

    pub(crate) fn allocate(&mut self) -> TimerId {
        let slot = TimerSlot {
            generation: 0,
            value: Itimerspec::zero(),
            flags: TimerFlags::empty(),
            callback: None,
            num_overrun_events: 0,
            num_firings_scheduled: 0,
            delay_left: Timespec::zero(),
            next: None,
            prev: None,
        };
        match self.free.pop() {
            Some(index) => {
                // The slot's generation was bumped at release time, so
                // stale ids already miss; reuse it as-is.
                let generation = self.slots[index].as_ref().map_or(0, |old| old.generation);
                let mut slot = slot;
                slot.generation = generation;
                self.slots[index] = Some(slot);
                TimerId { index, generation }
            }
            None => {
                self.slots.push(Some(slot));
                TimerId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn release(&mut self, id: TimerId) {
        if self.get(id).is_some() {
            if let Some(slot) = self.slots[id.index].as_mut() {
                slot.callback = None;
                slot.flags = TimerFlags::empty();
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(id.index);
        }
    }

    pub(crate) fn get(&self, id: TimerId) -> Option<&TimerSlot> {
        self.slots
            .get(id.index)?
            .as_ref()
            .filter(|slot| slot.generation == id.generation)
    }

    pub(crate) fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerSlot> {
        self.slots
            .get_mut(id.index)?
            .as_mut()
            .filter(|slot| slot.generation == id.generation)
    }

    pub(crate) fn slot(&self, index: usize) -> &TimerSlot {
        self.slots[index].as_ref().expect("dangling timer index")
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut TimerSlot {
        self.slots[index].as_mut().expect("dangling timer index")
    }

    pub(crate) fn id_of(&self, index: usize) -> TimerId {
        TimerId {
            index,
            generation: self.slot(index).generation,
        }
    }
}
