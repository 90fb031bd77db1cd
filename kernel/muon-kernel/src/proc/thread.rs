//! Kernel threads and the thread arena.
//!
//! Threads live in a slab; run-queue links are slot indices into it, so
//! the scheduler's circular list never holds pointers. Exactly one thread
//! is current on the CPU; a DEAD thread is unlinked from every list before
//! its slot is released.

extern crate alloc;

use alloc::sync::Arc;

use muon_core::id::{Pid, Tid};
use muon_core::sync::{SpinLock, SpinLockGuard, WakeCondition};
use muon_syscall::signal::SigSet;

use crate::config::QUANTUM_TICKS;
use crate::time::Clock;

/// The saved register file of a thread, in architecture-neutral form.
///
/// The arch layer maps this onto the real interrupt frame; the kernel
/// logic only reads and writes these fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFrame {
    /// Instruction pointer.
    pub ip: usize,
    /// Stack pointer.
    pub sp: usize,
    /// Flags register (interrupt-enable and arithmetic flags).
    pub flags: usize,
    /// Return-value register (syscall results, fork's child zero).
    pub retval: usize,
    /// Syscall argument registers.
    pub args: [usize; 6],
    /// Callee-saved general-purpose registers.
    pub gp: [usize; 8],
}

/// Number of bytes [`RegisterFrame::to_bytes`] produces.
pub const REGISTER_FRAME_SIZE: usize = (4 + 6 + 8) * core::mem::size_of::<usize>();

impl RegisterFrame {
    /// Serializes the frame for storage on the user stack.
    pub fn to_bytes(&self) -> [u8; REGISTER_FRAME_SIZE] {
        let mut out = [0u8; REGISTER_FRAME_SIZE];
        let mut at = 0;
        for word in [self.ip, self.sp, self.flags, self.retval]
            .into_iter()
            .chain(self.args)
            .chain(self.gp)
        {
            out[at..at + 8].copy_from_slice(&(word as u64).to_le_bytes());
            at += 8;
        }
        out
    }

    /// Rebuilds a frame serialized by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8; REGISTER_FRAME_SIZE]) -> Self {
        let mut words = [0usize; 18];
        for (i, word) in words.iter_mut().enumerate() {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *word = u64::from_le_bytes(raw) as usize;
        }
        let mut frame = Self {
            ip: words[0],
            sp: words[1],
            flags: words[2],
            retval: words[3],
            ..Self::default()
        };
        frame.args.copy_from_slice(&words[4..10]);
        frame.gp.copy_from_slice(&words[10..18]);
        frame
    }
}

/// Run state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not yet entered into scheduling.
    None,
    /// Linked into the run queue.
    Runnable,
    /// Waiting on a wake condition.
    Blocking,
    /// Stopped by job control.
    Stopped,
    /// Terminated; awaiting collection.
    Dead,
}

/// A kernel thread.
pub struct Thread {
    /// Arena slot of this thread.
    pub tid: Tid,
    /// Owning process.
    pub pid: Pid,
    /// Saved registers.
    pub frame: RegisterFrame,
    /// Run state; transitions go through the scheduler.
    pub state: ThreadState,
    /// Blocked signals.
    pub sigmask: SigSet,
    /// Kernel stack extent `(base, size)`.
    pub kernel_stack: (usize, usize),
    /// User stack extent `(base, size)`.
    pub user_stack: (usize, usize),
    /// Thread-local storage extent `(base, size)`.
    pub tls: (usize, usize),
    /// CPU time consumed by this thread.
    pub cpu_clock: Arc<Clock>,
    /// Kernel-mode CPU time consumed by this thread.
    pub sys_clock: Arc<Clock>,
    /// Remaining scheduler quantum in ticks.
    pub quantum: u32,
    /// Per-thread errno cell.
    pub errno: i32,
    /// The condition this thread sleeps on while `Blocking`.
    pub blocked_on: Option<Arc<WakeCondition>>,
    /// Set when a signal interrupted the wait; the syscall returns EINTR.
    pub wake_interrupted: bool,
    /// Syscall parked on a wake condition, re-issued on wakeup.
    pub pending_syscall: Option<(usize, [usize; 6])>,
    /// Syscall staged for `SA_RESTART`: survives the handler and its
    /// `sigreturn`, then re-issues.
    pub restart_syscall: Option<(usize, [usize; 6])>,
    /// Absolute wakeup `(clock id, deadline)` of an in-progress sleep.
    pub sleep_deadline: Option<(i32, muon_syscall::time::Timespec)>,
    /// Poll subscriptions kept alive across a blocked `ppoll`.
    pub poll_nodes: alloc::vec::Vec<Arc<muon_fs::PollNode>>,
    /// Whether the thread currently executes kernel code (charges SYS).
    pub in_kernel: bool,
    /// Run-queue forward link (arena index).
    pub(crate) run_next: Option<u32>,
    /// Run-queue backward link (arena index).
    pub(crate) run_prev: Option<u32>,
}

impl Thread {
    /// Creates a thread for `pid` with a fresh quantum and zeroed frame.
    pub fn new(tid: Tid, pid: Pid) -> Self {
        Self {
            tid,
            pid,
            frame: RegisterFrame::default(),
            state: ThreadState::None,
            sigmask: SigSet::empty(),
            kernel_stack: (0, 0),
            user_stack: (0, 0),
            tls: (0, 0),
            cpu_clock: Arc::new(Clock::new()),
            sys_clock: Arc::new(Clock::new()),
            quantum: QUANTUM_TICKS,
            errno: 0,
            blocked_on: None,
            wake_interrupted: false,
            pending_syscall: None,
            restart_syscall: None,
            sleep_deadline: None,
            poll_nodes: alloc::vec::Vec::new(),
            in_kernel: false,
            run_next: None,
            run_prev: None,
        }
    }
}

/// The thread slab. One lock covers the slot array and all links.
pub struct ThreadArena {
    slots: SpinLock<alloc::vec::Vec<Option<Thread>>>,
}

impl ThreadArena {
    /// Creates an empty arena.
    pub const fn new() -> Self {
        Self {
            slots: SpinLock::new(alloc::vec::Vec::new()),
        }
    }

    /// Creates a thread for `pid`, returning its id.
    pub fn create(&self, pid: Pid) -> Tid {
        let mut slots = self.slots.lock();
        let index = slots.iter().position(Option::is_none).unwrap_or_else(|| {
            slots.push(None);
            slots.len() - 1
        });
        let tid = Tid::new(index as u32);
        slots[index] = Some(Thread::new(tid, pid));
        tid
    }

    /// Releases a DEAD thread's slot.
    ///
    /// # Panics
    ///
    /// Panics if the thread is still linked or not dead; collecting a
    /// live thread is a kernel bug.
    pub fn release(&self, tid: Tid) {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(tid.get() as usize)
            .and_then(Option::take)
            .expect("releasing unknown thread");
        assert!(
            slot.state == ThreadState::Dead && slot.run_next.is_none() && slot.run_prev.is_none(),
            "releasing a thread that is still live or linked"
        );
    }

    /// Runs `f` with the thread, if it exists.
    pub fn with<R>(&self, tid: Tid, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
        let mut slots = self.slots.lock();
        slots
            .get_mut(tid.get() as usize)
            .and_then(Option::as_mut)
            .map(f)
    }

    /// Every live tid owned by `pid`.
    pub fn threads_of(&self, pid: Pid) -> alloc::vec::Vec<Tid> {
        let slots = self.slots.lock();
        slots
            .iter()
            .flatten()
            .filter(|t| t.pid == pid)
            .map(|t| t.tid)
            .collect()
    }

    /// Locks the whole slab; scheduler-internal.
    pub(crate) fn lock(&self) -> SpinLockGuard<'_, alloc::vec::Vec<Option<Thread>>> {
        self.slots.lock()
    }
}

impl Default for ThreadArena {
    fn default() -> Self {
        Self::new()
    }
}
