//! Processes and the process table.
//!
//! A process owns its address-space bookkeeping (segment array plus MMU
//! space), shares a descriptor table and mount table by reference, and
//! carries the signal state and per-process clocks. Family structure
//! (parent, children, process group, session) lives in id sets under the
//! process's own lock; the table resolves ids to processes.
//!
//! A terminated process stays in the table as a zombie (exit record set,
//! address space gone) until its parent reaps it with `waitpid`.

extern crate alloc;

pub mod exec;
pub mod signal;
pub mod thread;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::{Gid, Pid, Uid};
use muon_core::sync::{SpinLock, WakeCondition};
use muon_fs::{Descriptor, DescriptorTable, Inode, MountTable};
use muon_mm::segment::Segment;
use muon_syscall::resource::{RLIMIT_NUM_DECLARED, Rlimit};
use muon_syscall::signal::SigSet;

use crate::mem::SpaceId;
use crate::time::{Clock, TimerId};
use self::signal::SigAction;

/// Largest pid handed out before the allocator wraps.
const PID_MAX: i32 = 32768;

/// A per-process interval timer created with `timer_create`.
pub struct UserTimer {
    /// Clock the timer is attached to.
    pub clock: Arc<Clock>,
    /// Slot id on that clock.
    pub id: TimerId,
}

/// Exit bookkeeping of a zombie.
#[derive(Debug, Clone, Copy)]
pub struct ExitRecord {
    /// The encoded wait-status word.
    pub status: i32,
}

/// Identity and family state, under one lock.
pub struct Family {
    /// Parent process id.
    pub ppid: Pid,
    /// Process-group id.
    pub pgid: Pid,
    /// Session id.
    pub sid: Pid,
    /// Real user id.
    pub uid: Uid,
    /// Effective user id.
    pub euid: Uid,
    /// Real group id.
    pub gid: Gid,
    /// Effective group id.
    pub egid: Gid,
    /// Live and zombie children, by pid.
    pub children: Vec<Pid>,
    /// Path of the program image, for diagnostics.
    pub program_path: String,
    /// Set once the process has terminated.
    pub exit: Option<ExitRecord>,
    /// Whether the process is currently stopped by job control.
    pub stopped: bool,
    /// A stop happened that `WUNTRACED` has not yet reported.
    pub event_stopped: bool,
    /// A continue happened that `WCONTINUED` has not yet reported.
    pub event_continued: bool,
    /// The signal that caused the last stop.
    pub stop_signal: i32,
    /// Resource limits.
    pub rlimits: [Rlimit; RLIMIT_NUM_DECLARED as usize],
}

/// A process.
pub struct Process {
    /// Process id; never changes.
    pub pid: Pid,
    /// Identity and family, under one lock.
    pub family: SpinLock<Family>,
    /// Sorted, non-overlapping segment array.
    pub segments: Arc<SpinLock<Vec<Segment>>>,
    /// The MMU address space holding the segments' pages.
    pub space: SpinLock<SpaceId>,
    /// Descriptor table, shared by reference.
    pub dtable: SpinLock<Arc<DescriptorTable>>,
    /// Mount table, shared by reference.
    pub mounts: SpinLock<Arc<MountTable>>,
    /// Working directory descriptor.
    pub cwd: SpinLock<Option<Arc<Descriptor>>>,
    /// Root directory for absolute resolution.
    pub root: SpinLock<Option<Arc<dyn Inode>>>,
    /// Signal dispositions, indexed by signal number.
    pub dispositions: SpinLock<[SigAction; 128]>,
    /// Pending signal bits.
    pub pending: SpinLock<SigSet>,
    /// User+kernel CPU time of all threads.
    pub cpu_clock: Arc<Clock>,
    /// Kernel-mode CPU time of all threads.
    pub sys_clock: Arc<Clock>,
    /// CPU time accumulated from reaped children.
    pub child_cpu_clock: Arc<Clock>,
    /// Kernel-mode CPU time accumulated from reaped children.
    pub child_sys_clock: Arc<Clock>,
    /// The `alarmns` timer, created on first use.
    pub alarm: SpinLock<Option<TimerId>>,
    /// POSIX per-process timers.
    pub user_timers: SpinLock<Vec<Option<UserTimer>>>,
    /// Signalled whenever a child changes state; `waitpid` blocks here.
    pub child_cond: Arc<WakeCondition>,
}

impl Process {
    /// Creates a process shell. The caller wires segments, descriptors,
    /// and family fields per fork or boot semantics.
    pub fn new(pid: Pid, ppid: Pid, space: SpaceId) -> Self {
        Self {
            pid,
            family: SpinLock::new(Family {
                ppid,
                pgid: pid,
                sid: pid,
                uid: Uid::ROOT,
                euid: Uid::ROOT,
                gid: Gid::ROOT,
                egid: Gid::ROOT,
                children: Vec::new(),
                program_path: String::new(),
                exit: None,
                stopped: false,
                event_stopped: false,
                event_continued: false,
                stop_signal: 0,
                rlimits: [Rlimit::default(); RLIMIT_NUM_DECLARED as usize],
            }),
            segments: Arc::new(SpinLock::new(Vec::new())),
            space: SpinLock::new(space),
            dtable: SpinLock::new(Arc::new(DescriptorTable::new())),
            mounts: SpinLock::new(Arc::new(MountTable::new())),
            cwd: SpinLock::new(None),
            root: SpinLock::new(None),
            dispositions: SpinLock::new([SigAction::default(); 128]),
            pending: SpinLock::new(SigSet::empty()),
            cpu_clock: Arc::new(Clock::new()),
            sys_clock: Arc::new(Clock::new()),
            child_cpu_clock: Arc::new(Clock::new()),
            child_sys_clock: Arc::new(Clock::new()),
            alarm: SpinLock::new(None),
            user_timers: SpinLock::new(Vec::new()),
            child_cond: Arc::new(WakeCondition::new()),
        }
    }

    /// Whether the process has terminated but not been reaped.
    pub fn is_zombie(&self) -> bool {
        self.family.lock().exit.is_some()
    }
}

struct PtState {
    procs: BTreeMap<i32, Arc<Process>>,
    next_pid: i32,
}

/// The process table: pid allocation and id resolution.
///
/// Pids come from a monotonically advancing counter that wraps at
/// [`PID_MAX`] and probes past ids still in use.
pub struct ProcessTable {
    state: SpinLock<PtState>,
}

impl ProcessTable {
    /// Creates an empty table; the first allocated pid is 1.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(PtState {
                procs: BTreeMap::new(),
                next_pid: 1,
            }),
        }
    }

    /// Allocates a pid and registers the process `make` builds for it.
    ///
    /// Returns `None` when every pid is taken.
    pub fn allocate(&self, make: impl FnOnce(Pid) -> Arc<Process>) -> Option<Arc<Process>> {
        let mut state = self.state.lock();
        for _ in 0..PID_MAX {
            let candidate = state.next_pid;
            state.next_pid = state.next_pid % PID_MAX + 1;
            if !state.procs.contains_key(&candidate) {
                let process = make(Pid::new(candidate));
                state.procs.insert(candidate, process.clone());
                return Some(process);
            }
        }
        None
    }

    /// Resolves a pid.
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.state.lock().procs.get(&pid.get()).cloned()
    }

    /// Unregisters a reaped process.
    pub fn remove(&self, pid: Pid) {
        self.state.lock().procs.remove(&pid.get());
    }

    /// Every member of process group `pgid`.
    pub fn group_members(&self, pgid: Pid) -> Vec<Arc<Process>> {
        let state = self.state.lock();
        state
            .procs
            .values()
            .filter(|p| p.family.lock().pgid == pgid)
            .cloned()
            .collect()
    }

    /// Every member of session `sid`.
    pub fn session_members(&self, sid: Pid) -> Vec<Arc<Process>> {
        let state = self.state.lock();
        state
            .procs
            .values()
            .filter(|p| p.family.lock().sid == sid)
            .cloned()
            .collect()
    }

    /// Number of registered processes.
    pub fn len(&self) -> usize {
        self.state.lock().procs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::SpaceId;

    fn proc_at(pid: Pid) -> Arc<Process> {
        Arc::new(Process::new(pid, Pid::new(0), SpaceId(0)))
    }

    #[test]
    fn first_two_pids_are_one_and_two() {
        let table = ProcessTable::new();
        let a = table.allocate(proc_at).unwrap();
        let b = table.allocate(proc_at).unwrap();
        assert_eq!(a.pid, Pid::new(1));
        assert_eq!(b.pid, Pid::new(2));
    }

    #[test]
    fn allocation_probes_past_live_pids() {
        let table = ProcessTable::new();
        let a = table.allocate(proc_at).unwrap();
        let b = table.allocate(proc_at).unwrap();
        table.remove(a.pid);
        // Counter keeps advancing: next is 3, not the freed 1.
        let c = table.allocate(proc_at).unwrap();
        assert_eq!(c.pid, Pid::new(3));
        drop(b);
    }

    #[test]
    fn group_membership_follows_pgid() {
        let table = ProcessTable::new();
        let a = table.allocate(proc_at).unwrap();
        let b = table.allocate(proc_at).unwrap();
        b.family.lock().pgid = a.pid;
        assert_eq!(table.group_members(a.pid).len(), 2);
        assert_eq!(table.session_members(b.pid).len(), 1);
    }
}
