//! Round-robin scheduler.
//!
//! A single circular doubly-linked list of RUNNABLE threads, links stored
//! as slot indices in the thread arena. Each tick charges the running
//! thread and burns quantum; expiry raises the yield-pending flag, which
//! the interrupt-return path turns into a switch. Blocking unlinks a
//! thread; waking links it at the tail. With nothing runnable the idle
//! thread runs.

extern crate alloc;

use alloc::vec::Vec;

use muon_core::id::Tid;
use muon_core::sync::SpinLock;

use crate::config::QUANTUM_TICKS;
use crate::proc::thread::{Thread, ThreadArena, ThreadState};

struct SchedState {
    /// Any node of the circular runnable list.
    head: Option<u32>,
    current: Option<Tid>,
    idle: Option<Tid>,
    yield_pending: bool,
}

/// The switch decision handed to the arch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Thread that was current before.
    pub prev: Option<Tid>,
    /// Thread to run now (the idle thread when nothing is runnable).
    pub next: Option<Tid>,
}

/// The scheduler.
pub struct Scheduler {
    state: SpinLock<SchedState>,
}

fn link_tail(slots: &mut Vec<Option<Thread>>, head: &mut Option<u32>, index: u32) {
    match *head {
        None => {
            let t = slots[index as usize].as_mut().expect("linking dead slot");
            t.run_next = Some(index);
            t.run_prev = Some(index);
            *head = Some(index);
        }
        Some(h) => {
            let tail = slots[h as usize]
                .as_ref()
                .and_then(|t| t.run_prev)
                .expect("runnable list corrupt");
            slots[tail as usize].as_mut().expect("list corrupt").run_next = Some(index);
            slots[h as usize].as_mut().expect("list corrupt").run_prev = Some(index);
            let t = slots[index as usize].as_mut().expect("linking dead slot");
            t.run_prev = Some(tail);
            t.run_next = Some(h);
        }
    }
}

fn unlink(slots: &mut Vec<Option<Thread>>, head: &mut Option<u32>, index: u32) {
    let (prev, next) = {
        let t = slots[index as usize].as_ref().expect("unlinking dead slot");
        (t.run_prev, t.run_next)
    };
    let (Some(prev), Some(next)) = (prev, next) else {
        return; // not linked
    };
    if next == index {
        *head = None;
    } else {
        slots[prev as usize].as_mut().expect("list corrupt").run_next = Some(next);
        slots[next as usize].as_mut().expect("list corrupt").run_prev = Some(prev);
        if *head == Some(index) {
            *head = Some(next);
        }
    }
    let t = slots[index as usize].as_mut().expect("unlinking dead slot");
    t.run_next = None;
    t.run_prev = None;
}

impl Scheduler {
    /// Creates an idle scheduler.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(SchedState {
                head: None,
                current: None,
                idle: None,
                yield_pending: false,
            }),
        }
    }

    /// Registers the idle thread; it never enters the runnable list.
    pub fn set_idle(&self, tid: Tid) {
        self.state.lock().idle = Some(tid);
    }

    /// The currently running thread.
    pub fn current(&self) -> Option<Tid> {
        self.state.lock().current
    }

    /// Installs the first current thread at boot (or in a test fixture).
    pub fn adopt_current(&self, tid: Tid) {
        self.state.lock().current = Some(tid);
    }

    /// Moves a thread to `state`, linking or unlinking as needed.
    ///
    /// Waking a `Blocking` thread clears its wait bookkeeping.
    pub fn set_thread_state(&self, arena: &ThreadArena, tid: Tid, new_state: ThreadState) {
        let mut sched = self.state.lock();
        let mut slots = arena.lock();
        let index = tid.get();
        let Some(thread) = slots.get_mut(index as usize).and_then(Option::as_mut) else {
            return;
        };
        let old_state = thread.state;
        thread.state = new_state;
        if new_state == ThreadState::Runnable && old_state != ThreadState::Runnable {
            thread.blocked_on = None;
            link_tail(&mut slots, &mut sched.head, index);
        } else if new_state != ThreadState::Runnable && old_state == ThreadState::Runnable {
            unlink(&mut slots, &mut sched.head, index);
        }
    }

    /// Burns quantum on the current thread; sets yield-pending on expiry.
    pub fn tick(&self, arena: &ThreadArena) {
        let mut sched = self.state.lock();
        let Some(current) = sched.current else {
            return;
        };
        let expired = arena
            .with(current, |t| {
                t.quantum = t.quantum.saturating_sub(1);
                t.quantum == 0
            })
            .unwrap_or(false);
        if expired {
            sched.yield_pending = true;
        }
    }

    /// Whether the interrupt-return path must switch.
    pub fn yield_pending(&self) -> bool {
        self.state.lock().yield_pending
    }

    /// Requests a switch at the next scheduling point.
    pub fn request_yield(&self) {
        self.state.lock().yield_pending = true;
    }

    /// Picks the next thread round-robin and makes it current.
    ///
    /// The previous thread keeps its place in the ring if still runnable.
    /// Falls back to the idle thread when the ring is empty.
    pub fn switch(&self, arena: &ThreadArena) -> Switch {
        let mut sched = self.state.lock();
        let slots = arena.lock();

        let prev = sched.current;
        let next_index = match prev
            .and_then(|tid| slots.get(tid.get() as usize).and_then(Option::as_ref))
            .and_then(|t| t.run_next)
        {
            Some(next) => Some(next),
            None => sched.head,
        };
        drop(slots);

        let next = next_index.map(Tid::new).or(sched.idle);
        sched.current = next;
        sched.yield_pending = false;

        if let Some(next) = next {
            arena.with(next, |t| t.quantum = QUANTUM_TICKS);
        }
        Switch { prev, next }
    }

    /// Runnable thread count (idle excluded).
    pub fn runnable_count(&self, arena: &ThreadArena) -> usize {
        let sched = self.state.lock();
        let slots = arena.lock();
        let Some(head) = sched.head else {
            return 0;
        };
        let mut count = 1;
        let mut cursor = slots[head as usize].as_ref().and_then(|t| t.run_next);
        while let Some(index) = cursor {
            if index == head {
                break;
            }
            count += 1;
            cursor = slots[index as usize].as_ref().and_then(|t| t.run_next);
        }
        count
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muon_core::id::Pid;

    fn fixture() -> (Scheduler, ThreadArena, Tid, Tid, Tid) {
        let sched = Scheduler::new();
        let arena = ThreadArena::new();
        let a = arena.create(Pid::new(1));
        let b = arena.create(Pid::new(1));
        let idle = arena.create(Pid::new(0));
        sched.set_idle(idle);
        sched.set_thread_state(&arena, a, ThreadState::Runnable);
        sched.set_thread_state(&arena, b, ThreadState::Runnable);
        (sched, arena, a, b, idle)
    }

    #[test]
    fn round_robin_alternates() {
        let (sched, arena, a, b, _idle) = fixture();
        sched.adopt_current(a);
        assert_eq!(sched.switch(&arena).next, Some(b));
        assert_eq!(sched.switch(&arena).next, Some(a));
        assert_eq!(sched.switch(&arena).next, Some(b));
    }

    #[test]
    fn blocking_leaves_the_ring() {
        let (sched, arena, a, b, _idle) = fixture();
        sched.adopt_current(a);
        sched.set_thread_state(&arena, b, ThreadState::Blocking);
        assert_eq!(sched.switch(&arena).next, Some(a));
        assert_eq!(sched.runnable_count(&arena), 1);
    }

    #[test]
    fn empty_ring_falls_back_to_idle() {
        let (sched, arena, a, b, idle) = fixture();
        sched.adopt_current(a);
        sched.set_thread_state(&arena, a, ThreadState::Blocking);
        sched.set_thread_state(&arena, b, ThreadState::Blocking);
        assert_eq!(sched.switch(&arena).next, Some(idle));
    }

    #[test]
    fn waking_relinks_at_tail() {
        let (sched, arena, a, b, _idle) = fixture();
        sched.adopt_current(a);
        sched.set_thread_state(&arena, b, ThreadState::Blocking);
        sched.set_thread_state(&arena, b, ThreadState::Runnable);
        assert_eq!(sched.switch(&arena).next, Some(b));
    }

    #[test]
    fn quantum_expiry_raises_yield_pending() {
        let (sched, arena, a, _b, _idle) = fixture();
        sched.adopt_current(a);
        assert!(!sched.yield_pending());
        for _ in 0..QUANTUM_TICKS {
            sched.tick(&arena);
        }
        assert!(sched.yield_pending());
    }

    #[test]
    fn dead_threads_are_unlinked_before_release() {
        let (sched, arena, a, b, _idle) = fixture();
        sched.adopt_current(a);
        sched.set_thread_state(&arena, b, ThreadState::Dead);
        arena.release(b);
        assert_eq!(sched.switch(&arena).next, Some(a));
    }
}
