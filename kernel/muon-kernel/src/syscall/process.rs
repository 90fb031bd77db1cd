//! Process lifecycle syscalls.

extern crate alloc;

use muon_core::id::Pid;
use muon_syscall::errno::{EINVAL, EPERM, ESRCH};
use muon_syscall::resource::{
    RLIMIT_NUM_DECLARED, RUSAGE_CHILDREN, RUSAGE_SELF, Rlimit,
};
use muon_syscall::signal::SIGABRT;
use muon_syscall::wait::{WNATURE_SIGNALED, wconstruct};

use super::{SysError, SysResult, SyscallCtx};
use crate::proc::exec;

pub(super) fn sys_exit_thread(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [status, ..] = args;
    ctx.kernel.exit_thread(ctx.tid, status as i32);
    Ok(0)
}

pub(super) fn sys_fork(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    let pid = ctx.kernel.fork(ctx.tid).map_err(SysError::Errno)?;
    Ok(pid.get() as isize)
}

pub(super) fn sys_execve(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, argv_ptr, envp_ptr, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let argv = ctx.read_string_array(argv_ptr)?;
    let envp = ctx.read_string_array(envp_ptr)?;
    exec::exec(ctx.kernel, ctx.tid, &path, &argv, &envp).map_err(SysError::Errno)?;
    // On success the new image sees a zero "return"; the real transfer
    // happens through the rewritten register frame.
    Ok(0)
}

pub(super) fn sys_waitpid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, status_ptr, options, ..] = args;
    let (reaped, status) = ctx
        .kernel
        .wait(ctx.tid, pid as i32, options as i32)?;
    if status_ptr != 0 && reaped != 0 {
        ctx.write_i32(status_ptr, status)?;
    }
    Ok(reaped as isize)
}

pub(super) fn sys_wait(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [status_ptr, ..] = args;
    sys_waitpid(ctx, [usize::MAX, status_ptr, 0, 0, 0, 0])
}

pub(super) fn sys_kill(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, sig, ..] = args;
    let pid = pid as i32;
    let sig = sig as i32;
    let result = if pid > 0 {
        ctx.kernel.deliver_signal(Pid::new(pid), sig)
    } else if pid == 0 {
        let pgid = ctx.process.family.lock().pgid;
        ctx.kernel.deliver_signal_group(pgid, sig)
    } else if pid == -1 {
        // Every process the caller may signal; here, everyone but init.
        Err(EPERM)
    } else {
        ctx.kernel.deliver_signal_group(Pid::new(-pid), sig)
    };
    result.map_err(SysError::Errno)?;
    Ok(0)
}

pub(super) fn sys_raise(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [sig, ..] = args;
    ctx.kernel
        .deliver_signal(ctx.process.pid, sig as i32)
        .map_err(SysError::Errno)?;
    Ok(0)
}

pub(super) fn sys_getpid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.pid.get() as isize)
}

pub(super) fn sys_getppid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.family.lock().ppid.get() as isize)
}

pub(super) fn sys_setpgid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, pgid, ..] = args;
    let pid = pid as i32;
    let pgid = pgid as i32;
    if pgid < 0 {
        return Err(SysError::Errno(EINVAL));
    }
    let target = if pid == 0 {
        ctx.process.clone()
    } else {
        ctx.kernel
            .ptable
            .get(Pid::new(pid))
            .ok_or(SysError::Errno(ESRCH))?
    };
    let mut family = target.family.lock();
    family.pgid = if pgid == 0 { target.pid } else { Pid::new(pgid) };
    Ok(0)
}

pub(super) fn sys_getpgid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, ..] = args;
    let target = resolve_pid_arg(ctx, pid as i32)?;
    Ok(target.family.lock().pgid.get() as isize)
}

pub(super) fn sys_setsid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    // Group membership is computed before taking our own family lock;
    // the table walk locks every member's family in turn.
    let group_size = ctx.kernel.ptable.group_members(ctx.process.pid).len();
    let mut family = ctx.process.family.lock();
    // A group leader with other members cannot start a session.
    if family.pgid == ctx.process.pid && group_size > 1 {
        return Err(SysError::Errno(EPERM));
    }
    family.sid = ctx.process.pid;
    family.pgid = ctx.process.pid;
    Ok(ctx.process.pid.get() as isize)
}

pub(super) fn sys_getsid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, ..] = args;
    let target = resolve_pid_arg(ctx, pid as i32)?;
    Ok(target.family.lock().sid.get() as isize)
}

fn resolve_pid_arg(
    ctx: &SyscallCtx<'_>,
    pid: i32,
) -> Result<alloc::sync::Arc<crate::proc::Process>, SysError> {
    if pid == 0 {
        Ok(ctx.process.clone())
    } else {
        ctx.kernel
            .ptable
            .get(Pid::new(pid))
            .ok_or(SysError::Errno(ESRCH))
    }
}

pub(super) fn sys_prlimit(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [pid, resource, new_ptr, old_ptr, ..] = args;
    let target = resolve_pid_arg(ctx, pid as i32)?;
    let resource = resource as i32;
    if !(0..RLIMIT_NUM_DECLARED).contains(&resource) {
        return Err(SysError::Errno(EINVAL));
    }

    let old = target.family.lock().rlimits[resource as usize];
    if old_ptr != 0 {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&old.rlim_cur.to_le_bytes());
        bytes[8..].copy_from_slice(&old.rlim_max.to_le_bytes());
        ctx.write_bytes(old_ptr, &bytes)?;
    }
    if new_ptr != 0 {
        let bytes = ctx.read_bytes(new_ptr, 16)?;
        let mut cur = [0u8; 8];
        let mut max = [0u8; 8];
        cur.copy_from_slice(&bytes[..8]);
        max.copy_from_slice(&bytes[8..]);
        let new = Rlimit {
            rlim_cur: u64::from_le_bytes(cur),
            rlim_max: u64::from_le_bytes(max),
        };
        if new.rlim_cur > new.rlim_max {
            return Err(SysError::Errno(EINVAL));
        }
        target.family.lock().rlimits[resource as usize] = new;
    }
    Ok(0)
}

pub(super) fn sys_getrusage(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [who, usage_ptr, ..] = args;
    let (cpu, sys) = match who as i32 {
        RUSAGE_SELF => (
            ctx.process.cpu_clock.advancement(),
            ctx.process.sys_clock.advancement(),
        ),
        RUSAGE_CHILDREN => (
            ctx.process.child_cpu_clock.advancement(),
            ctx.process.child_sys_clock.advancement(),
        ),
        _ => return Err(SysError::Errno(EINVAL)),
    };
    // ru_utime is time outside the kernel.
    let user = cpu.sub(sys);
    let user = if user.is_negative() {
        muon_syscall::time::Timespec::zero()
    } else {
        user
    };
    ctx.write_timespec(usage_ptr, user)?;
    ctx.write_timespec(usage_ptr + 16, sys)?;
    Ok(0)
}

/// Userspace assertion or stack-smash failure: the process dies with a
/// signalled status, as if `SIGABRT` had terminated it.
pub(super) fn sys_abort_process(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    ctx.kernel.exit_process(
        ctx.process.pid,
        wconstruct(WNATURE_SIGNALED, 0, SIGABRT),
    );
    Ok(0)
}
