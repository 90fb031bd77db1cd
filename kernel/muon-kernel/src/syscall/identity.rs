//! Credential syscalls.
//!
//! Setting ids is permitted to the superuser or when the new id equals a
//! current real/effective id, the usual unprivileged cases.

extern crate alloc;

use muon_core::id::{Gid, Uid};
use muon_syscall::errno::EPERM;

use super::{SysError, SysResult, SyscallCtx};

pub(super) fn sys_getuid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.family.lock().uid.get() as isize)
}

pub(super) fn sys_geteuid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.family.lock().euid.get() as isize)
}

pub(super) fn sys_getgid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.family.lock().gid.get() as isize)
}

pub(super) fn sys_getegid(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    Ok(ctx.process.family.lock().egid.get() as isize)
}

pub(super) fn sys_setuid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [uid, ..] = args;
    let uid = Uid::new(uid as u32);
    let mut family = ctx.process.family.lock();
    if family.euid != Uid::ROOT && uid != family.uid && uid != family.euid {
        return Err(SysError::Errno(EPERM));
    }
    family.uid = uid;
    family.euid = uid;
    Ok(0)
}

pub(super) fn sys_setgid(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [gid, ..] = args;
    let gid = Gid::new(gid as u32);
    let mut family = ctx.process.family.lock();
    if family.euid != Uid::ROOT && gid != family.gid && gid != family.egid {
        return Err(SysError::Errno(EPERM));
    }
    family.gid = gid;
    family.egid = gid;
    Ok(0)
}
