//! Clock and timer syscalls.

extern crate alloc;

use alloc::sync::Arc;

use muon_core::sync::WakeCondition;
use muon_syscall::errno::{EINVAL, EPERM};
use muon_syscall::time::{
    CLOCK_BOOTTIME, CLOCK_CHILD_CPUTIME_ID, CLOCK_CHILD_SYSTIME_ID, CLOCK_INIT, CLOCK_MONOTONIC,
    CLOCK_PROCESS_CPUTIME_ID, CLOCK_PROCESS_SYSTIME_ID, CLOCK_REALTIME, CLOCK_THREAD_CPUTIME_ID,
    CLOCK_THREAD_SYSTIME_ID, Itimerspec, TIMER_ABSTIME, Timespec,
};

use super::{SysError, SysResult, SyscallCtx};
use crate::proc::UserTimer;
use crate::time::{Clock, TimerCallback, TimerFlags};

/// Resolves a clock id to the clock object.
pub(super) fn clock_by_id(ctx: &SyscallCtx<'_>, id: i32) -> Result<Arc<Clock>, SysError> {
    let clock = match id {
        CLOCK_REALTIME => ctx.kernel.time.realtime.clone(),
        CLOCK_MONOTONIC => ctx.kernel.time.monotonic.clone(),
        CLOCK_BOOTTIME => ctx.kernel.time.boottime.clone(),
        CLOCK_INIT => ctx.kernel.time.init.clone(),
        CLOCK_PROCESS_CPUTIME_ID => ctx.process.cpu_clock.clone(),
        CLOCK_PROCESS_SYSTIME_ID => ctx.process.sys_clock.clone(),
        CLOCK_CHILD_CPUTIME_ID => ctx.process.child_cpu_clock.clone(),
        CLOCK_CHILD_SYSTIME_ID => ctx.process.child_sys_clock.clone(),
        CLOCK_THREAD_CPUTIME_ID => ctx
            .kernel
            .threads
            .with(ctx.tid, |t| t.cpu_clock.clone())
            .ok_or(SysError::Errno(EINVAL))?,
        CLOCK_THREAD_SYSTIME_ID => ctx
            .kernel
            .threads
            .with(ctx.tid, |t| t.sys_clock.clone())
            .ok_or(SysError::Errno(EINVAL))?,
        _ => return Err(SysError::Errno(EINVAL)),
    };
    Ok(clock)
}

/// Arms a self-releasing one-shot wakeup at `deadline` that signals
/// `cond` when it fires.
pub(super) fn arm_wakeup(clock: &Arc<Clock>, deadline: Timespec, cond: Arc<WakeCondition>) {
    let id = clock.create_timer();
    let weak = Arc::downgrade(clock);
    let callback: TimerCallback = Arc::new(move |fired| {
        cond.signal();
        if let Some(clock) = weak.upgrade() {
            clock.release_timer(fired);
        }
    });
    let setting = Itimerspec {
        it_interval: Timespec::zero(),
        it_value: deadline,
    };
    let _ = clock.timer_set(
        id,
        setting,
        TimerFlags::ABSOLUTE | TimerFlags::FUNC_INTERRUPT_HANDLER,
        callback,
    );
}

pub(super) fn sys_clock_gettime(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [clock_id, tp, ..] = args;
    let clock = clock_by_id(ctx, clock_id as i32)?;
    let (now, _resolution) = clock.get();
    if tp != 0 {
        ctx.write_timespec(tp, now)?;
    }
    Ok(0)
}

pub(super) fn sys_clock_settime(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [clock_id, tp, ..] = args;
    if clock_id as i32 != CLOCK_REALTIME {
        return Err(SysError::Errno(EPERM));
    }
    let value = ctx.read_timespec(tp)?;
    if !value.is_canonical() {
        return Err(SysError::Errno(EINVAL));
    }
    ctx.kernel.time.realtime.set(value, None);
    Ok(0)
}

pub(super) fn sys_clock_nanosleep(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [clock_id, flags, req_ptr, rem_ptr, ..] = args;
    let clock_id = clock_id as i32;
    let clock = clock_by_id(ctx, clock_id)?;
    let request = ctx.read_timespec(req_ptr)?;
    if !request.is_canonical() || request.is_negative() {
        return Err(SysError::Errno(EINVAL));
    }

    // The deadline survives the park so a restarted call does not start
    // the sleep over.
    let stored = ctx
        .kernel
        .threads
        .with(ctx.tid, |t| t.sleep_deadline)
        .flatten();
    let deadline = match stored {
        Some((stored_clock, deadline)) if stored_clock == clock_id => deadline,
        _ => {
            let now = clock.get().0;
            let deadline = if flags as i32 & TIMER_ABSTIME != 0 {
                request
            } else {
                now.add(request)
            };
            ctx.kernel.threads.with(ctx.tid, |t| {
                t.sleep_deadline = Some((clock_id, deadline));
            });
            deadline
        }
    };

    let now = clock.get().0;
    if now >= deadline {
        ctx.kernel.threads.with(ctx.tid, |t| t.sleep_deadline = None);
        if rem_ptr != 0 {
            ctx.write_timespec(rem_ptr, Timespec::zero())?;
        }
        return Ok(0);
    }

    let cond = Arc::new(WakeCondition::new());
    arm_wakeup(&clock, deadline, cond.clone());
    Err(SysError::Block(cond))
}

pub(super) fn sys_alarmns(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [delay_ptr, odelay_ptr, ..] = args;
    let delay = ctx.read_timespec(delay_ptr)?;
    if !delay.is_canonical() || delay.is_negative() {
        return Err(SysError::Errno(EINVAL));
    }

    let clock = ctx.kernel.time.monotonic.clone();
    let id = {
        let mut alarm = ctx.process.alarm.lock();
        *alarm.get_or_insert_with(|| clock.create_timer())
    };

    let kernel = Arc::downgrade(ctx.kernel);
    let pid = ctx.process.pid;
    let callback: TimerCallback = Arc::new(move |_fired| {
        if let Some(kernel) = kernel.upgrade() {
            let _ = kernel.deliver_signal(pid, muon_syscall::signal::SIGALRM);
        }
    });

    let setting = Itimerspec {
        it_interval: Timespec::zero(),
        it_value: delay,
    };
    let old = clock
        .timer_set(id, setting, TimerFlags::FUNC_ADVANCE_THREAD, callback)
        .map_err(|_| SysError::Errno(EINVAL))?;
    if odelay_ptr != 0 {
        ctx.write_timespec(odelay_ptr, old.it_value)?;
    }
    Ok(0)
}

pub(super) fn sys_timer_create(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [clock_id, timerid_ptr, ..] = args;
    let clock = clock_by_id(ctx, clock_id as i32)?;
    let id = clock.create_timer();

    let index = {
        let mut timers = ctx.process.user_timers.lock();
        let index = timers.iter().position(Option::is_none).unwrap_or_else(|| {
            timers.push(None);
            timers.len() - 1
        });
        timers[index] = Some(UserTimer { clock, id });
        index
    };
    ctx.write_usize(timerid_ptr, index)?;
    Ok(0)
}

fn user_timer(
    ctx: &SyscallCtx<'_>,
    index: usize,
) -> Result<(Arc<Clock>, crate::time::TimerId), SysError> {
    let timers = ctx.process.user_timers.lock();
    timers
        .get(index)
        .and_then(Option::as_ref)
        .map(|t| (t.clock.clone(), t.id))
        .ok_or(SysError::Errno(EINVAL))
}

pub(super) fn sys_timer_settime(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [timerid, flags, new_ptr, old_ptr, ..] = args;
    let (clock, id) = user_timer(ctx, timerid)?;
    let new = ctx.read_itimerspec(new_ptr)?;

    let kernel = Arc::downgrade(ctx.kernel);
    let pid = ctx.process.pid;
    let callback: TimerCallback = Arc::new(move |_fired| {
        if let Some(kernel) = kernel.upgrade() {
            let _ = kernel.deliver_signal(pid, muon_syscall::signal::SIGALRM);
        }
    });

    let mut timer_flags = TimerFlags::FUNC_ADVANCE_THREAD;
    if flags as i32 & TIMER_ABSTIME != 0 {
        timer_flags |= TimerFlags::ABSOLUTE;
    }
    let old = clock
        .timer_set(id, new, timer_flags, callback)
        .map_err(|_| SysError::Errno(EINVAL))?;
    if old_ptr != 0 {
        ctx.write_itimerspec(old_ptr, old)?;
    }
    Ok(0)
}

pub(super) fn sys_timer_gettime(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [timerid, curr_ptr, ..] = args;
    let (clock, id) = user_timer(ctx, timerid)?;
    let current = clock
        .timer_get(id)
        .map_err(|_| SysError::Errno(EINVAL))?;
    ctx.write_itimerspec(curr_ptr, current)?;
    Ok(0)
}

pub(super) fn sys_timer_delete(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [timerid, ..] = args;
    let removed = {
        let mut timers = ctx.process.user_timers.lock();
        timers
            .get_mut(timerid)
            .and_then(Option::take)
            .ok_or(SysError::Errno(EINVAL))?
    };
    removed.clock.release_timer(removed.id);
    Ok(0)
}
