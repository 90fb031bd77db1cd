//! Kernel-wide scenarios driven through the syscall surface.
//!
//! Each test boots a fresh kernel over the model MMU, mounts a ramfs
//! root, and drives threads by dispatching syscalls and ticking the
//! clock, exactly as the interrupt and syscall stubs would.

use std::sync::Arc;

use muon_core::id::{Dev, Pid, Tid};
use muon_fs::ramfs::RamFs;
use muon_fs::{DstBuf, IoCtx, SrcBuf};
use muon_mm::PAGE_SIZE;
use muon_mm::segment::{Prot, Segment, add_segment};
use muon_syscall::errno::{EINTR, EPIPE};
use muon_syscall::fcntl::{O_CREATE, O_READ, O_WRITE};
use muon_syscall::number::*;
use muon_syscall::signal::{
    SIG_SETMASK, SIGALRM, SIGPIPE, SIGUSR1, SigSet,
};
use muon_syscall::time::Timespec;
use muon_syscall::wait;

use crate::kernel::{Kernel, SyscallOutcome};
use crate::mem::{Mmu, ModelMmu};
use crate::proc::Process;
use crate::proc::thread::ThreadState;

/// Scratch user region mapped into init (and forked children).
const SCRATCH: usize = 0x0010_0000;
const SCRATCH_SIZE: usize = 16 * PAGE_SIZE;

struct Fixture {
    kernel: Arc<Kernel>,
    init: Arc<Process>,
    init_tid: Tid,
}

/// A minimal ELF64 executable: one PT_LOAD at 0x40_0000 with `payload`.
fn tiny_elf(payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    buf[4] = 2; // ELFCLASS64
    buf[5] = 1; // little endian
    buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    buf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    buf[24..32].copy_from_slice(&0x0040_1000u64.to_le_bytes()); // e_entry
    buf[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
    buf[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
    buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

    let mut phdr = vec![0u8; 56];
    phdr[0..4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    phdr[4..8].copy_from_slice(&5u32.to_le_bytes()); // PF_R | PF_X
    phdr[8..16].copy_from_slice(&120u64.to_le_bytes()); // offset
    phdr[16..24].copy_from_slice(&0x0040_0000u64.to_le_bytes()); // vaddr
    phdr[32..40].copy_from_slice(&(payload.len() as u64).to_le_bytes()); // filesz
    phdr[40..48].copy_from_slice(&0x2000u64.to_le_bytes()); // memsz
    phdr[48..56].copy_from_slice(&16u64.to_le_bytes()); // align
    buf.extend_from_slice(&phdr);
    buf.extend_from_slice(payload);
    buf
}

fn boot() -> Fixture {
    let kernel = Kernel::new(Arc::new(ModelMmu::new()));
    let fs = RamFs::new(Dev::new(1));
    let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);

    // /bin/true: the canonical do-nothing executable.
    let bin = fs.root().mkdir(&ctx, "bin", 0o755).unwrap();
    let image = tiny_elf(&[0x90, 0x90, 0xc3]);
    let true_inode = bin
        .open(&ctx, "true", O_READ | O_WRITE | O_CREATE, 0o755)
        .unwrap();
    true_inode
        .pwrite(&ctx, &SrcBuf::Kernel(&image), 0)
        .unwrap();

    kernel.set_root(fs.root());
    let (init, init_tid) = kernel.spawn_init();

    // A writable scratch segment so syscall arguments have somewhere to
    // live; copied into children on fork.
    let scratch = Segment::new(
        SCRATCH,
        SCRATCH_SIZE,
        Prot::READ | Prot::WRITE | Prot::FORK | Prot::KREAD | Prot::KWRITE,
    );
    add_segment(&mut init.segments.lock(), scratch).unwrap();
    kernel.mmu.map(*init.space.lock(), &scratch);
    kernel.threads.with(init_tid, |t| {
        t.frame.sp = SCRATCH + SCRATCH_SIZE;
        t.user_stack = (SCRATCH, SCRATCH_SIZE);
    });

    Fixture {
        kernel,
        init,
        init_tid,
    }
}

impl Fixture {
    fn call(&self, tid: Tid, nr: usize, args: [usize; 6]) -> SyscallOutcome {
        self.kernel.syscall(tid, nr, args)
    }

    fn call_ok(&self, tid: Tid, nr: usize, args: [usize; 6]) -> isize {
        match self.call(tid, nr, args) {
            SyscallOutcome::Done(value) => value,
            SyscallOutcome::Blocked => panic!("syscall unexpectedly blocked"),
        }
    }

    fn poke(&self, process: &Process, addr: usize, bytes: &[u8]) {
        assert!(self.kernel.mmu.write(*process.space.lock(), addr, bytes));
    }

    fn peek(&self, process: &Process, addr: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        assert!(self.kernel.mmu.read(*process.space.lock(), addr, &mut out));
        out
    }

    fn poke_str(&self, process: &Process, addr: usize, s: &str) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.poke(process, addr, &bytes);
    }

    fn only_thread_of(&self, pid: Pid) -> Tid {
        let threads = self.kernel.threads.threads_of(pid);
        assert_eq!(threads.len(), 1);
        threads[0]
    }

    /// Ticks the monotonic clock `ms` milliseconds and runs the timer
    /// worker, as the hardware tick and worker thread would.
    fn pass_time(&self, ms: usize) {
        for _ in 0..ms {
            self.kernel.on_tick();
        }
        self.kernel.run_timer_worker();
    }
}

// ── Fork / exec / wait ──────────────────────────────────────────────

#[test]
fn fork_exec_wait_round_trip() {
    let fix = boot();
    assert_eq!(fix.init.pid, Pid::new(1));

    // fork: parent sees pid 2, child's fork returns 0.
    let child_pid = fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    assert_eq!(child_pid, 2);
    let child_tid = fix.only_thread_of(Pid::new(2));
    let child = fix.kernel.ptable.get(Pid::new(2)).unwrap();
    assert_eq!(
        fix.kernel.threads.with(child_tid, |t| t.frame.retval),
        Some(0)
    );

    // execve("/bin/true", {"true", NULL}, {NULL}) from the child.
    let path_at = SCRATCH;
    let arg0_at = SCRATCH + 0x100;
    let argv_at = SCRATCH + 0x200;
    fix.poke_str(&child, path_at, "/bin/true");
    fix.poke_str(&child, arg0_at, "true");
    let mut argv = Vec::new();
    argv.extend_from_slice(&(arg0_at as u64).to_le_bytes());
    argv.extend_from_slice(&0u64.to_le_bytes());
    fix.poke(&child, argv_at, &argv);

    assert_eq!(
        fix.call_ok(child_tid, SYS_EXECVE, [path_at, argv_at, 0, 0, 0, 0]),
        0
    );
    let (ip, sp) = fix
        .kernel
        .threads
        .with(child_tid, |t| (t.frame.ip, t.frame.sp))
        .unwrap();
    assert_eq!(ip, 0x0040_1000);
    // argc sits at the new stack pointer.
    let argc = u64::from_le_bytes(fix.peek(&child, sp, 8).try_into().unwrap());
    assert_eq!(argc, 1);

    // Child exits 0; parent reaps it.
    fix.call_ok(child_tid, SYS_EXIT_THREAD, [0; 6]);
    let status_at = SCRATCH + 0x300;
    let reaped = fix.call_ok(
        fix.init_tid,
        SYS_WAITPID,
        [2, status_at, 0, 0, 0, 0],
    );
    assert_eq!(reaped, 2);
    let status =
        i32::from_le_bytes(fix.peek(&fix.init, status_at, 4).try_into().unwrap());
    assert!(wait::wifexited(status));
    assert_eq!(wait::wexitstatus(status), 0);
    // The zombie is gone.
    assert!(fix.kernel.ptable.get(Pid::new(2)).is_none());
}

#[test]
fn waitpid_blocks_until_child_exits() {
    let fix = boot();
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    let child_tid = fix.only_thread_of(Pid::new(2));

    let outcome = fix.call(fix.init_tid, SYS_WAITPID, [2, 0, 0, 0, 0, 0]);
    assert_eq!(outcome, SyscallOutcome::Blocked);
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.state),
        Some(ThreadState::Blocking)
    );

    // Child exits: the parent wakes and reaps.
    fix.call_ok(child_tid, SYS_EXIT_THREAD, [0; 6]);
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.state),
        Some(ThreadState::Runnable)
    );
    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Done(2));
}

// ── Pipes ───────────────────────────────────────────────────────────

/// Occupies fds 0-2 the way a console would.
fn occupy_stdio(fix: &Fixture) {
    let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);
    let console = fix
        .kernel
        .root_inode()
        .unwrap()
        .open(&ctx, "console", O_CREATE | O_READ | O_WRITE, 0o666)
        .unwrap();
    let dtable = fix.init.dtable.lock().clone();
    for flags in [O_READ, O_WRITE, O_WRITE] {
        dtable
            .allocate(muon_fs::Descriptor::new(console.clone(), flags), 0, 0)
            .unwrap();
    }
}

#[test]
fn pipe_write_read_eof() {
    let fix = boot();
    occupy_stdio(&fix);

    let fds_at = SCRATCH;
    fix.call_ok(fix.init_tid, SYS_PIPE, [fds_at, 0, 0, 0, 0, 0]);
    let raw = fix.peek(&fix.init, fds_at, 8);
    let read_fd = i32::from_le_bytes(raw[..4].try_into().unwrap());
    let write_fd = i32::from_le_bytes(raw[4..].try_into().unwrap());
    assert_eq!((read_fd, write_fd), (3, 4));

    // Write "AB" through fd 4 and close it.
    let data_at = SCRATCH + 0x100;
    fix.poke(&fix.init, data_at, b"AB");
    assert_eq!(
        fix.call_ok(fix.init_tid, SYS_WRITE, [4, data_at, 2, 0, 0, 0]),
        2
    );
    fix.call_ok(fix.init_tid, SYS_CLOSE, [4, 0, 0, 0, 0, 0]);

    // Reading 4 bytes yields the 2 buffered, then end-of-file.
    let buf_at = SCRATCH + 0x200;
    assert_eq!(
        fix.call_ok(fix.init_tid, SYS_READ, [3, buf_at, 4, 0, 0, 0]),
        2
    );
    assert_eq!(&fix.peek(&fix.init, buf_at, 2), b"AB");
    assert_eq!(
        fix.call_ok(fix.init_tid, SYS_READ, [3, buf_at, 4, 0, 0, 0]),
        0
    );
}

#[test]
fn blocked_pipe_reader_wakes_on_write() {
    let fix = boot();

    let fds_at = SCRATCH;
    fix.call_ok(fix.init_tid, SYS_PIPE, [fds_at, 0, 0, 0, 0, 0]);
    let raw = fix.peek(&fix.init, fds_at, 8);
    let read_fd = i32::from_le_bytes(raw[..4].try_into().unwrap()) as usize;
    let write_fd = i32::from_le_bytes(raw[4..].try_into().unwrap()) as usize;

    let buf_at = SCRATCH + 0x100;
    let outcome = fix.call(fix.init_tid, SYS_READ, [read_fd, buf_at, 4, 0, 0, 0]);
    assert_eq!(outcome, SyscallOutcome::Blocked);

    // The writer side fills the pipe; the wake condition's waker marks
    // the parked reader runnable again.
    let desc = fix.init.dtable.lock().get(write_fd as i32).unwrap();
    let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);
    desc.write(&ctx, &SrcBuf::Kernel(b"hi")).unwrap();

    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Done(2));
    assert_eq!(&fix.peek(&fix.init, buf_at, 2), b"hi");
}

#[test]
fn sigpipe_kills_writer_to_closed_pipe() {
    let fix = boot();
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    let child_tid = fix.only_thread_of(Pid::new(2));
    let child = fix.kernel.ptable.get(Pid::new(2)).unwrap();

    let fds_at = SCRATCH;
    fix.call_ok(child_tid, SYS_PIPE, [fds_at, 0, 0, 0, 0, 0]);
    let raw = fix.peek(&child, fds_at, 8);
    let read_fd = i32::from_le_bytes(raw[..4].try_into().unwrap()) as usize;
    let write_fd = i32::from_le_bytes(raw[4..].try_into().unwrap()) as usize;

    fix.call_ok(child_tid, SYS_CLOSE, [read_fd, 0, 0, 0, 0, 0]);
    let data_at = SCRATCH + 0x100;
    fix.poke(&child, data_at, b"x");
    let result = fix.call_ok(child_tid, SYS_WRITE, [write_fd, data_at, 1, 0, 0, 0]);
    assert_eq!(result, -(EPIPE as isize));

    // SIGPIPE's default disposition terminated the writer on the return
    // path.
    let exit = child.family.lock().exit.expect("writer died");
    assert!(wait::wifsignaled(exit.status));
    assert_eq!(wait::wtermsig(exit.status), SIGPIPE);
}

// ── Signals ─────────────────────────────────────────────────────────

const HANDLER_ADDR: usize = 0x0040_2000;

fn sigaction_bytes(handler: usize, mask: SigSet, flags: i32) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(&mask.bits().to_le_bytes());
    bytes[16..24].copy_from_slice(&(handler as u64).to_le_bytes());
    bytes[24..28].copy_from_slice(&flags.to_le_bytes());
    bytes
}

#[test]
fn alarm_delivers_sigalrm_to_a_handler_exactly_once() {
    let fix = boot();

    // Install a handler for SIGALRM.
    let act_at = SCRATCH;
    fix.poke(
        &fix.init,
        act_at,
        &sigaction_bytes(HANDLER_ADDR, SigSet::empty(), 0),
    );
    fix.call_ok(
        fix.init_tid,
        SYS_SIGACTION,
        [SIGALRM as usize, act_at, 0, 0, 0, 0],
    );

    // alarmns({0, 10ms}).
    let delay_at = SCRATCH + 0x100;
    let delay = Timespec::from_nanos(10_000_000);
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&delay.tv_sec.to_le_bytes());
    bytes[8..].copy_from_slice(&delay.tv_nsec.to_le_bytes());
    fix.poke(&fix.init, delay_at, &bytes);
    fix.call_ok(fix.init_tid, SYS_ALARMNS, [delay_at, 0, 0, 0, 0, 0]);

    // 9 ms: nothing yet.
    fix.pass_time(9);
    assert!(!fix.init.pending.lock().contains(SIGALRM));

    // 10 ms: pending, and the return path runs the handler once.
    fix.pass_time(1);
    let ip_before = fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip);
    let report = fix.kernel.return_to_user(fix.init_tid);
    assert!(report.handled);
    let ip_after = fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip);
    assert_eq!(ip_after, Some(HANDLER_ADDR));
    assert_ne!(ip_before, ip_after);

    // No second delivery.
    let report = fix.kernel.return_to_user(fix.init_tid);
    assert!(!report.handled && !report.terminated);

    // sigreturn restores the interrupted frame.
    fix.call_ok(fix.init_tid, SYS_SIGRETURN, [0; 6]);
    assert_eq!(fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip), ip_before);
}

#[test]
fn sigprocmask_round_trip_and_masked_deferral() {
    let fix = boot();

    // SIG_SETMASK{USR1}; read back equals what was set.
    let mut mask = SigSet::empty();
    mask.add(SIGUSR1);
    let set_at = SCRATCH;
    let old_at = SCRATCH + 0x40;
    fix.poke(&fix.init, set_at, &mask.bits().to_le_bytes());
    fix.call_ok(
        fix.init_tid,
        SYS_SIGPROCMASK,
        [SIG_SETMASK as usize, set_at, 0, 0, 0, 0],
    );
    fix.call_ok(
        fix.init_tid,
        SYS_SIGPROCMASK,
        [SIG_SETMASK as usize, 0, old_at, 0, 0, 0],
    );
    let read_back = u128::from_le_bytes(fix.peek(&fix.init, old_at, 16).try_into().unwrap());
    assert_eq!(SigSet::from_bits(read_back), mask);

    // A masked signal with a handler stays pending, undelivered.
    let act_at = SCRATCH + 0x80;
    fix.poke(
        &fix.init,
        act_at,
        &sigaction_bytes(HANDLER_ADDR, SigSet::empty(), 0),
    );
    fix.call_ok(
        fix.init_tid,
        SYS_SIGACTION,
        [SIGUSR1 as usize, act_at, 0, 0, 0, 0],
    );
    fix.call_ok(fix.init_tid, SYS_RAISE, [SIGUSR1 as usize, 0, 0, 0, 0, 0]);
    assert!(fix.init.pending.lock().contains(SIGUSR1));
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip),
        Some(0)
    );

    // Unmasking delivers it.
    let empty_at = SCRATCH + 0xC0;
    fix.poke(&fix.init, empty_at, &SigSet::empty().bits().to_le_bytes());
    fix.call_ok(
        fix.init_tid,
        SYS_SIGPROCMASK,
        [SIG_SETMASK as usize, empty_at, 0, 0, 0, 0],
    );
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip),
        Some(HANDLER_ADDR)
    );
    assert!(!fix.init.pending.lock().contains(SIGUSR1));
}

#[test]
fn signal_interrupts_blocked_wait_with_eintr() {
    let fix = boot();
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);

    // Parent blocks waiting for the (running) child.
    let outcome = fix.call(fix.init_tid, SYS_WAITPID, [2, 0, 0, 0, 0, 0]);
    assert_eq!(outcome, SyscallOutcome::Blocked);

    // Install a handler for SIGUSR1 so delivery interrupts, not kills.
    let act_at = SCRATCH;
    fix.poke(
        &fix.init,
        act_at,
        &sigaction_bytes(HANDLER_ADDR, SigSet::empty(), 0),
    );
    // The disposition write happens directly; the thread is parked.
    fix.init.dispositions.lock()[SIGUSR1 as usize] = crate::proc::signal::SigAction {
        handler: HANDLER_ADDR,
        mask: SigSet::empty(),
        flags: 0,
    };
    fix.kernel
        .deliver_signal(Pid::new(1), SIGUSR1)
        .unwrap();
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.state),
        Some(ThreadState::Runnable)
    );

    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Done(-(EINTR as isize)));
}

#[test]
fn sa_restart_reissues_the_interrupted_wait() {
    let fix = boot();
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    let child_tid = fix.only_thread_of(Pid::new(2));

    let outcome = fix.call(fix.init_tid, SYS_WAITPID, [2, 0, 0, 0, 0, 0]);
    assert_eq!(outcome, SyscallOutcome::Blocked);

    fix.init.dispositions.lock()[SIGUSR1 as usize] = crate::proc::signal::SigAction {
        handler: HANDLER_ADDR,
        mask: SigSet::empty(),
        flags: muon_syscall::signal::SA_RESTART,
    };
    fix.kernel.deliver_signal(Pid::new(1), SIGUSR1).unwrap();

    // The wait is not failed: the handler runs first, the call is
    // staged for restart.
    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Blocked);
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.frame.ip),
        Some(HANDLER_ADDR)
    );

    // Handler returns; the wait re-issues and blocks again.
    fix.call_ok(fix.init_tid, SYS_SIGRETURN, [0; 6]);
    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Blocked);

    // The child's exit completes the restarted wait.
    fix.call_ok(child_tid, SYS_EXIT_THREAD, [0; 6]);
    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Done(2));
}

// ── Accounting ──────────────────────────────────────────────────────

#[test]
fn child_cpu_time_shows_in_parent_rusage() {
    let fix = boot();
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    let child_tid = fix.only_thread_of(Pid::new(2));

    // The child runs for 3 ms of charged CPU time.
    fix.kernel.sched.adopt_current(child_tid);
    for _ in 0..3 {
        fix.kernel.on_tick();
    }
    fix.call_ok(child_tid, SYS_EXIT_THREAD, [0; 6]);
    fix.kernel.sched.adopt_current(fix.init_tid);
    fix.call_ok(fix.init_tid, SYS_WAITPID, [2, 0, 0, 0, 0, 0]);

    let usage_at = SCRATCH;
    fix.call_ok(
        fix.init_tid,
        SYS_GETRUSAGE,
        [usize::MAX, usage_at, 0, 0, 0, 0], // RUSAGE_CHILDREN = -1
    );
    let raw = fix.peek(&fix.init, usage_at, 16);
    let sec = i64::from_le_bytes(raw[..8].try_into().unwrap());
    let nsec = i64::from_le_bytes(raw[8..].try_into().unwrap());
    let utime_ns = sec * 1_000_000_000 + nsec;
    assert!(utime_ns >= 3_000_000, "got {utime_ns} ns");
}

// ── Odds and ends through the table ─────────────────────────────────

#[test]
fn kernelinfo_reports_name_and_range_errors() {
    let fix = boot();
    let req_at = SCRATCH;
    let resp_at = SCRATCH + 0x100;
    fix.poke_str(&fix.init, req_at, "name");

    assert_eq!(
        fix.call_ok(fix.init_tid, SYS_KERNELINFO, [req_at, resp_at, 64, 0, 0, 0]),
        0
    );
    assert_eq!(&fix.peek(&fix.init, resp_at, 4), b"muon");

    // Too-small buffer: positive length with ERANGE in errno.
    let needed = fix.call_ok(fix.init_tid, SYS_KERNELINFO, [req_at, resp_at, 2, 0, 0, 0]);
    assert_eq!(needed, 4);
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.errno),
        Some(muon_syscall::errno::ERANGE)
    );
}

#[test]
fn getentropy_fills_and_bounds() {
    let fix = boot();
    let buf_at = SCRATCH;
    assert_eq!(
        fix.call_ok(fix.init_tid, SYS_GETENTROPY, [buf_at, 16, 0, 0, 0, 0]),
        0
    );
    let data = fix.peek(&fix.init, buf_at, 16);
    assert_ne!(data, vec![0u8; 16]);

    let result = fix.call_ok(fix.init_tid, SYS_GETENTROPY, [buf_at, 4096, 0, 0, 0, 0]);
    assert_eq!(result, -(muon_syscall::errno::EIO as isize));
}

#[test]
fn bad_syscall_number_is_enosys() {
    let fix = boot();
    let result = fix.call_ok(fix.init_tid, 9999, [0; 6]);
    assert_eq!(result, -(muon_syscall::errno::ENOSYS as isize));
}

#[test]
fn open_read_via_the_table() {
    let fix = boot();
    let path_at = SCRATCH;
    fix.poke_str(&fix.init, path_at, "/bin/true");
    let fd = fix.call_ok(
        fix.init_tid,
        SYS_OPEN,
        [path_at, O_READ as usize, 0, 0, 0, 0],
    );
    assert!(fd >= 0);

    let buf_at = SCRATCH + 0x100;
    let read = fix.call_ok(fix.init_tid, SYS_READ, [fd as usize, buf_at, 4, 0, 0, 0]);
    assert_eq!(read, 4);
    assert_eq!(&fix.peek(&fix.init, buf_at, 4), b"\x7fELF");
}

#[test]
fn nanosleep_blocks_until_the_deadline() {
    let fix = boot();
    let req_at = SCRATCH;
    let delay = Timespec::from_nanos(5_000_000);
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&delay.tv_sec.to_le_bytes());
    bytes[8..].copy_from_slice(&delay.tv_nsec.to_le_bytes());
    fix.poke(&fix.init, req_at, &bytes);

    let outcome = fix.call(
        fix.init_tid,
        SYS_CLOCK_NANOSLEEP,
        [
            muon_syscall::time::CLOCK_MONOTONIC as usize,
            0,
            req_at,
            0,
            0,
            0,
        ],
    );
    assert_eq!(outcome, SyscallOutcome::Blocked);

    fix.pass_time(5);
    assert_eq!(
        fix.kernel.threads.with(fix.init_tid, |t| t.state),
        Some(ThreadState::Runnable)
    );
    let outcome = fix.kernel.resume(fix.init_tid).unwrap();
    assert_eq!(outcome, SyscallOutcome::Done(0));
}

#[test]
fn getdelim_scenario_via_descriptor_reads() {
    let fix = boot();
    let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);
    let file = fix
        .kernel
        .root_inode()
        .unwrap()
        .open(&ctx, "lines", O_CREATE | O_READ | O_WRITE, 0o644)
        .unwrap();
    file.pwrite(&ctx, &SrcBuf::Kernel(b"a\nb"), 0).unwrap();
    let desc = muon_fs::Descriptor::new(file, O_READ);

    let mut line = Vec::new();
    assert_eq!(
        muon_fs::delim::read_until(&desc, &ctx, b'\n', &mut line).unwrap(),
        2
    );
    assert_eq!(line, b"a\n");
    line.clear();
    assert_eq!(
        muon_fs::delim::read_until(&desc, &ctx, b'\n', &mut line).unwrap(),
        1
    );
    assert_eq!(line, b"b");
    line.clear();
    assert_eq!(
        muon_fs::delim::read_until(&desc, &ctx, b'\n', &mut line).unwrap(),
        0
    );
}

#[test]
fn fork_isolates_copied_segments() {
    let fix = boot();
    fix.poke(&fix.init, SCRATCH, b"parent");
    fix.call_ok(fix.init_tid, SYS_FORK, [0; 6]);
    let child = fix.kernel.ptable.get(Pid::new(2)).unwrap();

    // The child sees the data, then diverges after a parent write.
    assert_eq!(&fix.peek(&child, SCRATCH, 6), b"parent");
    fix.poke(&fix.init, SCRATCH, b"PARENT");
    assert_eq!(&fix.peek(&child, SCRATCH, 6), b"parent");
}

#[test]
fn exec_failure_keeps_the_caller_alive() {
    let fix = boot();
    let path_at = SCRATCH;
    fix.poke_str(&fix.init, path_at, "/bin/missing");
    let result = fix.call_ok(fix.init_tid, SYS_EXECVE, [path_at, 0, 0, 0, 0, 0]);
    assert_eq!(result, -(muon_syscall::errno::ENOENT as isize));
    assert!(!fix.init.is_zombie());
}

#[test]
fn dup_and_descriptor_sharing() {
    let fix = boot();
    let path_at = SCRATCH;
    fix.poke_str(&fix.init, path_at, "/bin/true");
    let fd = fix.call_ok(fix.init_tid, SYS_OPEN, [path_at, O_READ as usize, 0, 0, 0, 0]);
    let dup = fix.call_ok(fix.init_tid, SYS_DUP, [fd as usize, 0, 0, 0, 0, 0]);
    assert_ne!(fd, dup);

    // Aliases share one offset.
    let buf_at = SCRATCH + 0x100;
    fix.call_ok(fix.init_tid, SYS_READ, [fd as usize, buf_at, 4, 0, 0, 0]);
    let pos = fix.call_ok(
        fix.init_tid,
        SYS_LSEEK,
        [dup as usize, 0, muon_syscall::fcntl::SEEK_CUR as usize, 0, 0, 0],
    );
    assert_eq!(pos, 4);
}
