//! The kernel instance: boot wiring and cross-subsystem orchestration.
//!
//! Everything that needs more than one subsystem lives here: forking,
//! thread and process exit, `wait`, signal delivery and the
//! return-to-user path, the blocking/retry model for syscalls, and the
//! hardware tick. The per-subsystem mechanics stay in their own modules;
//! this file is the choreography.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use muon_core::id::{Pid, Tid};
use muon_core::sync::SpinLock;
use muon_core::{kdebug, kinfo};
use muon_fs::{Descriptor, Inode, IoCtx};
use muon_syscall::errno::{ECHILD, EINTR, EINVAL, ESRCH};
use muon_syscall::fcntl::O_READ;
use muon_syscall::signal::{SA_RESTART, SIGCHLD, SIGCONT, SigSet, is_valid_signal};
use muon_syscall::time::Timespec;
use muon_syscall::wait::{
    WCONTINUED, WNATURE_CONTINUED, WNATURE_EXITED, WNATURE_SIGNALED, WNATURE_STOPPED, WNOHANG,
    WUNTRACED, wconstruct,
};

use crate::config::TICK_NS;
use crate::mem::{Mmu, ProcessSpace};
use crate::proc::signal::{Delivery, decide, handler_entry_mask, next_deliverable};
use crate::proc::thread::{REGISTER_FRAME_SIZE, RegisterFrame, ThreadArena, ThreadState};
use crate::proc::{ExitRecord, Process, ProcessTable};
use crate::random::EntropyPool;
use crate::sched::Scheduler;
use crate::syscall;
use crate::time::TimeKeeper;

/// Bytes of a synthesized signal frame: the saved registers, the
/// interrupted signal mask, and a minimal siginfo (number and code).
pub const SIGNAL_FRAME_SIZE: usize = REGISTER_FRAME_SIZE + 16 + 16;

/// Result of dispatching a syscall on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// The syscall completed with this return value.
    Done(isize),
    /// The thread parked on a wake condition; re-drive it with
    /// [`Kernel::resume`] once it is runnable again.
    Blocked,
}

/// What the return-to-user signal check did.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReport {
    /// A handler frame was synthesized.
    pub handled: bool,
    /// The delivered action carried `SA_RESTART`.
    pub restart: bool,
    /// The process was terminated.
    pub terminated: bool,
    /// The process was stopped.
    pub stopped: bool,
}

/// One kernel instance.
pub struct Kernel {
    /// The machine's MMU.
    pub mmu: Arc<dyn Mmu>,
    /// Clock registry and timer worker.
    pub time: TimeKeeper,
    /// All threads.
    pub threads: ThreadArena,
    /// The scheduler.
    pub sched: Scheduler,
    /// All processes.
    pub ptable: ProcessTable,
    /// Kernel entropy source.
    pub entropy: EntropyPool,
    root: SpinLock<Option<Arc<dyn Inode>>>,
}

impl Kernel {
    /// Creates a kernel instance over the given MMU.
    pub fn new(mmu: Arc<dyn Mmu>) -> Arc<Self> {
        Arc::new(Self {
            mmu,
            time: TimeKeeper::new(),
            threads: ThreadArena::new(),
            sched: Scheduler::new(),
            ptable: ProcessTable::new(),
            entropy: EntropyPool::new(0x6d75_6f6e),
            root: SpinLock::new(None),
        })
    }

    /// Installs the root filesystem inode.
    pub fn set_root(&self, root: Arc<dyn Inode>) {
        *self.root.lock() = Some(root);
    }

    /// The root filesystem inode.
    pub fn root_inode(&self) -> Option<Arc<dyn Inode>> {
        self.root.lock().clone()
    }

    // ── Lookup helpers ──────────────────────────────────────────────

    /// The process owning `tid`.
    pub fn process_of(&self, tid: Tid) -> Option<Arc<Process>> {
        let pid = self.threads.with(tid, |t| t.pid)?;
        self.ptable.get(pid)
    }

    /// The currently running process.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.process_of(self.sched.current()?)
    }

    /// User-domain copy access for a process.
    pub fn process_space(&self, process: &Process) -> Arc<ProcessSpace> {
        Arc::new(ProcessSpace::new(
            self.mmu.clone(),
            *process.space.lock(),
            process.segments.clone(),
        ))
    }

    /// A user-domain [`IoCtx`] carrying the process's credentials.
    pub fn user_ctx(&self, process: &Process) -> IoCtx {
        let family = process.family.lock();
        let mut ctx = IoCtx::user(family.euid, family.egid, self.process_space(process));
        ctx.auth_uid = family.uid;
        ctx.auth_gid = family.gid;
        ctx
    }

    /// A kernel-domain [`IoCtx`] carrying the process's credentials.
    pub fn kernel_ctx(&self, process: &Process) -> IoCtx {
        let family = process.family.lock();
        IoCtx::kernel(family.euid, family.egid)
    }

    // ── Boot ────────────────────────────────────────────────────────

    /// Creates the init process (pid 1) with an empty image and one
    /// runnable thread, wired to the root filesystem.
    ///
    /// # Panics
    ///
    /// Panics if called twice or before [`Kernel::set_root`].
    pub fn spawn_init(self: &Arc<Self>) -> (Arc<Process>, Tid) {
        let root = self.root_inode().expect("spawn_init before set_root");
        let space = self.mmu.create_space();
        let process = self
            .ptable
            .allocate(|pid| Arc::new(Process::new(pid, Pid::new(0), space)))
            .expect("pid space exhausted at boot");
        assert_eq!(process.pid, Pid::new(1), "init must be pid 1");

        *process.root.lock() = Some(root.clone());
        *process.cwd.lock() = Some(Descriptor::new(root, O_READ));
        process.family.lock().program_path = String::from("/sbin/init");

        let tid = self.threads.create(process.pid);
        self.sched
            .set_thread_state(&self.threads, tid, ThreadState::Runnable);
        if self.sched.current().is_none() {
            self.sched.adopt_current(tid);
        }
        kinfo!("init: pid {} thread {}", process.pid, tid);
        (process, tid)
    }

    // ── Fork ────────────────────────────────────────────────────────

    /// Forks the process owning `caller`. Returns the child pid.
    ///
    /// The child gets a per-segment copy-or-share of the address space
    /// (per the segment `FORK` bit), a forked descriptor table, the
    /// shared mount table, inherited dispositions, an empty pending set,
    /// and one runnable thread whose fork returns zero.
    ///
    /// # Errors
    ///
    /// Returns an errno on pid exhaustion or a dead caller.
    pub fn fork(self: &Arc<Self>, caller: Tid) -> Result<Pid, i32> {
        let parent = self.process_of(caller).ok_or(ESRCH)?;
        let parent_frame = self
            .threads
            .with(caller, |t| (t.frame, t.sigmask, t.user_stack, t.tls))
            .ok_or(ESRCH)?;

        let child_space = self.mmu.create_space();
        let parent_space = *parent.space.lock();

        let child = self
            .ptable
            .allocate(|pid| Arc::new(Process::new(pid, parent.pid, child_space)))
            .ok_or(muon_syscall::errno::EAGAIN)?;

        // Address space: copy or share per segment.
        {
            let parent_segments = parent.segments.lock();
            let mut child_segments = child.segments.lock();
            for segment in parent_segments.iter() {
                let share = !segment.prot.contains(muon_mm::segment::Prot::FORK);
                self.mmu.clone_range(parent_space, child_space, segment, share);
                child_segments.push(*segment);
            }
        }

        // Tables and identity.
        *child.dtable.lock() = parent.dtable.lock().fork();
        *child.mounts.lock() = parent.mounts.lock().clone();
        *child.cwd.lock() = parent.cwd.lock().clone();
        *child.root.lock() = parent.root.lock().clone();
        *child.dispositions.lock() = *parent.dispositions.lock();
        {
            let parent_family = parent.family.lock();
            let mut child_family = child.family.lock();
            child_family.pgid = parent_family.pgid;
            child_family.sid = parent_family.sid;
            child_family.uid = parent_family.uid;
            child_family.euid = parent_family.euid;
            child_family.gid = parent_family.gid;
            child_family.egid = parent_family.egid;
            child_family.program_path = parent_family.program_path.clone();
            child_family.rlimits = parent_family.rlimits;
        }
        parent.family.lock().children.push(child.pid);

        // The sole child thread: parent's registers, fork returns 0.
        let (frame, sigmask, user_stack, tls) = parent_frame;
        let child_tid = self.threads.create(child.pid);
        self.threads.with(child_tid, |t| {
            t.frame = frame;
            t.frame.retval = 0;
            t.sigmask = sigmask;
            t.user_stack = user_stack;
            t.tls = tls;
        });
        self.sched
            .set_thread_state(&self.threads, child_tid, ThreadState::Runnable);

        kdebug!("fork: {} -> {}", parent.pid, child.pid);
        Ok(child.pid)
    }

    // ── Exit and wait ───────────────────────────────────────────────

    /// Terminates one thread. The last thread of a process takes the
    /// whole process down with an exited status.
    pub fn exit_thread(self: &Arc<Self>, tid: Tid, status: i32) {
        let Some(process) = self.process_of(tid) else {
            return;
        };
        let peers = self.threads.threads_of(process.pid);
        if peers.len() <= 1 {
            self.exit_process(
                process.pid,
                wconstruct(WNATURE_EXITED, status & 0xFF, 0),
            );
        } else {
            self.sched
                .set_thread_state(&self.threads, tid, ThreadState::Dead);
            self.threads.release(tid);
        }
    }

    /// Terminates a process with an encoded status word: tears down the
    /// address space and descriptors, orphans children to init, leaves a
    /// zombie, and notifies the parent with `SIGCHLD`.
    pub fn exit_process(self: &Arc<Self>, pid: Pid, status_word: i32) {
        let Some(process) = self.ptable.get(pid) else {
            return;
        };
        if process.is_zombie() {
            return;
        }
        kdebug!("exit: pid {} status {:#x}", pid, status_word);

        // All threads die and are collected.
        for tid in self.threads.threads_of(pid) {
            self.sched
                .set_thread_state(&self.threads, tid, ThreadState::Dead);
            self.threads.release(tid);
        }

        // Tear down the address space; only the status survives.
        {
            let mut segments = process.segments.lock();
            segments.clear();
        }
        self.mmu.destroy_space(*process.space.lock());
        *process.dtable.lock() = Arc::new(muon_fs::DescriptorTable::new());
        *process.cwd.lock() = None;

        // Orphan children to init.
        let orphans = {
            let mut family = process.family.lock();
            family.exit = Some(ExitRecord {
                status: status_word,
            });
            core::mem::take(&mut family.children)
        };
        if let Some(init) = self.ptable.get(Pid::new(1)) {
            for orphan_pid in orphans {
                if let Some(orphan) = self.ptable.get(orphan_pid) {
                    orphan.family.lock().ppid = Pid::new(1);
                }
                init.family.lock().children.push(orphan_pid);
            }
            init.child_cond.signal();
        }

        // Wake and signal the parent.
        let ppid = process.family.lock().ppid;
        if let Some(parent) = self.ptable.get(ppid) {
            let _ = self.deliver_signal(ppid, SIGCHLD);
            parent.child_cond.signal();
        }
    }

    /// Waits for a child matching `pid_arg` per `waitpid` rules.
    ///
    /// Returns `(pid, status)`; `(0, 0)` for `WNOHANG` with nothing to
    /// report.
    ///
    /// # Errors
    ///
    /// `ECHILD` without matching children; [`syscall::SysError::Block`]
    /// when the caller must wait.
    pub fn wait(
        self: &Arc<Self>,
        caller: Tid,
        pid_arg: i32,
        options: i32,
    ) -> Result<(i32, i32), syscall::SysError> {
        let process = self
            .process_of(caller)
            .ok_or(syscall::SysError::Errno(ESRCH))?;
        let (children, own_pgid) = {
            let family = process.family.lock();
            (family.children.clone(), family.pgid)
        };

        let mut matched_any = false;
        for child_pid in &children {
            let Some(child) = self.ptable.get(*child_pid) else {
                continue;
            };
            let child_pgid = child.family.lock().pgid;
            let matches = match pid_arg {
                -1 => true,
                0 => child_pgid == own_pgid,
                p if p > 0 => child.pid.get() == p,
                p => child_pgid.get() == -p,
            };
            if !matches {
                continue;
            }
            matched_any = true;

            // Zombie: reap it.
            let exit = child.family.lock().exit;
            if let Some(exit) = exit {
                self.reap(&process, &child);
                return Ok((child.pid.get(), exit.status));
            }
            // Stop/continue events, when asked for.
            if options & WUNTRACED != 0 {
                let mut family = child.family.lock();
                if family.event_stopped {
                    family.event_stopped = false;
                    let sig = family.stop_signal;
                    return Ok((child.pid.get(), wconstruct(WNATURE_STOPPED, 0, sig)));
                }
            }
            if options & WCONTINUED != 0 {
                let mut family = child.family.lock();
                if family.event_continued {
                    family.event_continued = false;
                    return Ok((child.pid.get(), wconstruct(WNATURE_CONTINUED, 0, 0)));
                }
            }
        }

        if !matched_any {
            return Err(syscall::SysError::Errno(ECHILD));
        }
        if options & WNOHANG != 0 {
            return Ok((0, 0));
        }
        Err(syscall::SysError::Block(process.child_cond.clone()))
    }

    /// Consumes a zombie: unregisters it and merges its CPU time into
    /// the parent's child clocks.
    fn reap(&self, parent: &Process, child: &Process) {
        let cpu = child
            .cpu_clock
            .advancement()
            .add(child.child_cpu_clock.advancement());
        let sys = child
            .sys_clock
            .advancement()
            .add(child.child_sys_clock.advancement());
        if !cpu.is_zero() {
            self.time.advance_clock(&parent.child_cpu_clock, cpu);
        }
        if !sys.is_zero() {
            self.time.advance_clock(&parent.child_sys_clock, sys);
        }
        parent
            .family
            .lock()
            .children
            .retain(|pid| *pid != child.pid);
        self.ptable.remove(child.pid);
    }

    // ── Signals ─────────────────────────────────────────────────────

    /// Posts `sig` to a process: sets the pending bit and wakes an
    /// interruptible thread. `SIGCONT` additionally restarts a stopped
    /// process.
    ///
    /// # Errors
    ///
    /// `ESRCH` for a dead pid, `EINVAL` for a bad signal number.
    pub fn deliver_signal(self: &Arc<Self>, target: Pid, sig: i32) -> Result<(), i32> {
        let process = self.ptable.get(target).ok_or(ESRCH)?;
        if sig == 0 {
            return Ok(()); // permission probe only
        }
        if !is_valid_signal(sig) {
            return Err(EINVAL);
        }

        if sig == SIGCONT {
            let was_stopped = {
                let mut family = process.family.lock();
                let was = family.stopped;
                family.stopped = false;
                if was {
                    family.event_continued = true;
                }
                was
            };
            if was_stopped {
                for tid in self.threads.threads_of(target) {
                    let stopped = self
                        .threads
                        .with(tid, |t| t.state == ThreadState::Stopped)
                        .unwrap_or(false);
                    if stopped {
                        self.sched
                            .set_thread_state(&self.threads, tid, ThreadState::Runnable);
                    }
                }
                let ppid = process.family.lock().ppid;
                if let Some(parent) = self.ptable.get(ppid) {
                    parent.child_cond.signal();
                }
            }
        }

        // A signal whose disposition ignores it is discarded at
        // generation; it neither becomes pending nor interrupts a wait.
        let action = process.dispositions.lock()[sig as usize];
        if matches!(decide(sig, action), Delivery::Ignore { .. }) {
            return Ok(());
        }

        process.pending.lock().add(sig);

        // Interrupt one thread that does not mask the signal.
        for tid in self.threads.threads_of(target) {
            let woke = self
                .threads
                .with(tid, |t| {
                    if t.sigmask.contains(sig) {
                        return false;
                    }
                    if t.state == ThreadState::Blocking {
                        t.wake_interrupted = true;
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if woke {
                self.sched
                    .set_thread_state(&self.threads, tid, ThreadState::Runnable);
                break;
            }
        }
        Ok(())
    }

    /// Posts `sig` to every member of process group `pgid`.
    pub fn deliver_signal_group(self: &Arc<Self>, pgid: Pid, sig: i32) -> Result<(), i32> {
        let members = self.ptable.group_members(pgid);
        if members.is_empty() {
            return Err(ESRCH);
        }
        for member in members {
            self.deliver_signal(member.pid, sig)?;
        }
        Ok(())
    }

    /// Whether `tid` has a deliverable pending signal.
    pub fn signal_pending(&self, tid: Tid) -> bool {
        let Some(process) = self.process_of(tid) else {
            return false;
        };
        let mask = self
            .threads
            .with(tid, |t| t.sigmask)
            .unwrap_or_else(SigSet::empty);
        next_deliverable(*process.pending.lock(), mask).is_some()
    }

    /// The return-to-user signal check: delivers every deliverable
    /// pending signal, synthesizing at most one handler frame.
    pub fn return_to_user(self: &Arc<Self>, tid: Tid) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        loop {
            let Some(process) = self.process_of(tid) else {
                return report;
            };
            let Some(mask) = self.threads.with(tid, |t| t.sigmask) else {
                return report;
            };
            let Some(sig) = next_deliverable(*process.pending.lock(), mask) else {
                return report;
            };
            process.pending.lock().remove(sig);

            let action = process.dispositions.lock()[sig as usize];
            match decide(sig, action) {
                Delivery::Ignore { .. } => {}
                Delivery::Terminate { sig, core } => {
                    let _ = core; // core dumps are logged, not written
                    kinfo!("pid {}: killed by signal {}", process.pid, sig);
                    self.exit_process(process.pid, wconstruct(WNATURE_SIGNALED, 0, sig));
                    report.terminated = true;
                    return report;
                }
                Delivery::Stop { sig } => {
                    {
                        let mut family = process.family.lock();
                        family.stopped = true;
                        family.event_stopped = true;
                        family.stop_signal = sig;
                    }
                    for peer in self.threads.threads_of(process.pid) {
                        self.sched
                            .set_thread_state(&self.threads, peer, ThreadState::Stopped);
                    }
                    let ppid = process.family.lock().ppid;
                    if let Some(parent) = self.ptable.get(ppid) {
                        parent.child_cond.signal();
                        let _ = self.deliver_signal(ppid, SIGCHLD);
                    }
                    report.stopped = true;
                    return report;
                }
                Delivery::Handler { sig, action } => {
                    if self.push_handler_frame(tid, &process, sig, action) {
                        report.handled = true;
                        report.restart = action.flags & SA_RESTART != 0;
                        if action.flags & muon_syscall::signal::SA_RESETHAND != 0 {
                            process.dispositions.lock()[sig as usize] =
                                crate::proc::signal::SigAction::default();
                        }
                    }
                    return report;
                }
            }
        }
    }

    /// Writes the signal frame to the user stack and redirects the
    /// thread into the handler. Returns false if the stack is bad (the
    /// process then dies with the original signal's default).
    fn push_handler_frame(
        self: &Arc<Self>,
        tid: Tid,
        process: &Arc<Process>,
        sig: i32,
        action: crate::proc::signal::SigAction,
    ) -> bool {
        let space = *process.space.lock();
        let Some((frame, mask)) = self.threads.with(tid, |t| (t.frame, t.sigmask)) else {
            return false;
        };

        let mut record = [0u8; SIGNAL_FRAME_SIZE];
        record[..REGISTER_FRAME_SIZE].copy_from_slice(&frame.to_bytes());
        record[REGISTER_FRAME_SIZE..REGISTER_FRAME_SIZE + 16]
            .copy_from_slice(&mask.bits().to_le_bytes());
        // siginfo: signal number, then a zero code.
        record[REGISTER_FRAME_SIZE + 16..REGISTER_FRAME_SIZE + 20]
            .copy_from_slice(&sig.to_le_bytes());

        let Some(frame_top) = frame.sp.checked_sub(SIGNAL_FRAME_SIZE) else {
            self.exit_process(process.pid, wconstruct(WNATURE_SIGNALED, 0, sig));
            return false;
        };
        let frame_addr = frame_top & !0xF;
        if !self.mmu.write(space, frame_addr, &record) {
            kinfo!("pid {}: unwritable stack during delivery of {}", process.pid, sig);
            self.exit_process(process.pid, wconstruct(WNATURE_SIGNALED, 0, sig));
            return false;
        }

        self.threads.with(tid, |t| {
            t.frame.ip = action.handler;
            t.frame.sp = frame_addr;
            t.frame.args[0] = sig as usize;
            t.sigmask = handler_entry_mask(mask, action, sig);
        });
        true
    }

    /// Returns from a signal handler: restores the frame and mask the
    /// delivery saved on the user stack.
    ///
    /// # Errors
    ///
    /// `EINVAL` when the saved frame is unreadable.
    pub fn sigreturn(self: &Arc<Self>, tid: Tid) -> Result<(), i32> {
        let process = self.process_of(tid).ok_or(ESRCH)?;
        let space = *process.space.lock();
        let sp = self.threads.with(tid, |t| t.frame.sp).ok_or(ESRCH)?;

        let mut record = [0u8; SIGNAL_FRAME_SIZE];
        if !self.mmu.read(space, sp, &mut record) {
            return Err(EINVAL);
        }
        let mut frame_bytes = [0u8; REGISTER_FRAME_SIZE];
        frame_bytes.copy_from_slice(&record[..REGISTER_FRAME_SIZE]);
        let frame = RegisterFrame::from_bytes(&frame_bytes);
        let mut mask_bytes = [0u8; 16];
        mask_bytes.copy_from_slice(&record[REGISTER_FRAME_SIZE..REGISTER_FRAME_SIZE + 16]);
        let mask = SigSet::from_bits(u128::from_le_bytes(mask_bytes));

        self.threads.with(tid, |t| {
            t.frame = frame;
            t.sigmask = mask;
        });
        Ok(())
    }

    // ── Syscall driving and the blocking model ──────────────────────

    /// A waker that marks `tid` runnable when a condition fires.
    fn thread_waker(self: &Arc<Self>, tid: Tid) -> Box<dyn Fn() + Send + Sync> {
        let kernel = Arc::downgrade(self);
        Box::new(move || {
            if let Some(kernel) = kernel.upgrade() {
                kernel
                    .sched
                    .set_thread_state(&kernel.threads, tid, ThreadState::Runnable);
            }
        })
    }

    /// Dispatches a syscall for `tid`, handling blocking and the
    /// return-path signal check.
    pub fn syscall(self: &Arc<Self>, tid: Tid, nr: usize, args: [usize; 6]) -> SyscallOutcome {
        self.threads.with(tid, |t| t.in_kernel = true);
        loop {
            let result = syscall::dispatch(self, tid, nr, args);
            match result {
                Ok(value) => return self.finish_syscall(tid, nr, value),
                Err(syscall::SysError::Errno(errno)) => {
                    return self.finish_syscall(tid, nr, -(errno as isize));
                }
                Err(syscall::SysError::Block(cond)) => {
                    if cond.subscribe(self.thread_waker(tid)) {
                        // Signalled between the attempt and the
                        // subscription: retry instead of sleeping.
                        continue;
                    }
                    self.threads.with(tid, |t| {
                        t.pending_syscall = Some((nr, args));
                        t.blocked_on = Some(cond.clone());
                    });
                    self.sched
                        .set_thread_state(&self.threads, tid, ThreadState::Blocking);
                    return SyscallOutcome::Blocked;
                }
            }
        }
    }

    fn finish_syscall(self: &Arc<Self>, tid: Tid, nr: usize, value: isize) -> SyscallOutcome {
        // Sigreturn ends the handler, not the call the handler landed on
        // top of; the staged restart and its wait bookkeeping survive it.
        let ends_restart = nr != muon_syscall::number::SYS_SIGRETURN;
        self.threads.with(tid, |t| {
            t.pending_syscall = None;
            if ends_restart {
                t.restart_syscall = None;
                t.sleep_deadline = None;
                t.poll_nodes.clear();
            }
            t.in_kernel = false;
            if value < 0 {
                t.errno = -(value as i32);
            }
            t.frame.retval = value as usize;
        });
        self.return_to_user(tid);
        SyscallOutcome::Done(value)
    }

    /// Re-drives a woken thread's parked syscall.
    ///
    /// A wake by the awaited condition re-issues the call (the restart
    /// model of an interrupted `int` instruction). A wake by a signal
    /// fails the call with `EINTR` and delivers on the return path —
    /// unless the disposition carries `SA_RESTART`, in which case the
    /// handler frame is pushed over the parked call, which is staged to
    /// re-issue after `sigreturn`.
    pub fn resume(self: &Arc<Self>, tid: Tid) -> Option<SyscallOutcome> {
        let (nr, args) = self
            .threads
            .with(tid, |t| t.pending_syscall.or(t.restart_syscall))??;
        let interrupted = self
            .threads
            .with(tid, |t| core::mem::take(&mut t.wake_interrupted))
            .unwrap_or(false);

        if interrupted {
            match self.peek_delivery(tid) {
                // The signal went elsewhere; treat as a spurious wake.
                None => {}
                Some(action) if action.flags & SA_RESTART != 0 => {
                    let report = self.return_to_user(tid);
                    if report.terminated || report.stopped {
                        return Some(SyscallOutcome::Done(-(EINTR as isize)));
                    }
                    // Stage the call; it re-issues after the handler's
                    // sigreturn.
                    self.threads.with(tid, |t| {
                        t.pending_syscall = None;
                        t.restart_syscall = Some((nr, args));
                    });
                    return Some(SyscallOutcome::Blocked);
                }
                Some(_) => {
                    // EINTR lands in the saved frame before any handler
                    // frame is synthesized on top of it.
                    return Some(self.finish_syscall(tid, nr, -(EINTR as isize)));
                }
            }
        }
        Some(self.syscall(tid, nr, args))
    }

    /// The disposition of the next deliverable pending signal, if any.
    fn peek_delivery(&self, tid: Tid) -> Option<crate::proc::signal::SigAction> {
        let process = self.process_of(tid)?;
        let mask = self.threads.with(tid, |t| t.sigmask)?;
        let sig = next_deliverable(*process.pending.lock(), mask)?;
        Some(process.dispositions.lock()[sig as usize])
    }

    // ── The tick ────────────────────────────────────────────────────

    /// Hardware-tick entry: advances wall clocks, charges the running
    /// thread's and process's CPU clocks, burns quantum.
    pub fn on_tick(self: &Arc<Self>) {
        let duration = Timespec::from_nanos(TICK_NS);
        self.time.tick(duration);

        if let Some(tid) = self.sched.current() {
            let charged = self.threads.with(tid, |t| {
                (t.cpu_clock.clone(), t.sys_clock.clone(), t.in_kernel, t.pid)
            });
            if let Some((cpu, sys, in_kernel, pid)) = charged {
                self.time.charge(&[&cpu], duration);
                if in_kernel {
                    self.time.charge(&[&sys], duration);
                }
                if let Some(process) = self.ptable.get(pid) {
                    self.time.charge(&[&process.cpu_clock], duration);
                    if in_kernel {
                        self.time.charge(&[&process.sys_clock], duration);
                    }
                }
            }
        }
        self.sched.tick(&self.threads);
    }

    /// The interrupt-return scheduling point: switches threads when a
    /// yield is pending, installing the next process's address space if
    /// the process changes.
    pub fn preempt(self: &Arc<Self>) -> crate::sched::Switch {
        let switch = self.sched.switch(&self.threads);
        if let (Some(prev), Some(next)) = (switch.prev, switch.next) {
            let prev_pid = self.threads.with(prev, |t| t.pid);
            let next_pid = self.threads.with(next, |t| t.pid);
            if prev_pid != next_pid {
                if let Some(process) = next_pid.and_then(|pid| self.ptable.get(pid)) {
                    self.mmu.switch(*process.space.lock());
                }
            }
        }
        switch
    }

    /// Drains deferred timer firings; the timer worker's loop body.
    pub fn run_timer_worker(&self) -> usize {
        self.time.drain_worker()
    }
}
