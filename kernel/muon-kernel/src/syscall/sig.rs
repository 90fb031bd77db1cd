//! Signal-management syscalls.
//!
//! The user-visible `struct sigaction` is serialized as: 16 bytes of
//! mask, 8 bytes of handler, 4 bytes of flags, 4 bytes of padding.

extern crate alloc;

use muon_syscall::errno::EINVAL;
use muon_syscall::signal::{
    SIG_BLOCK, SIG_SETMASK, SIG_UNBLOCK, SIGKILL, SIGSTOP, SigSet, is_valid_signal,
};

use super::{SysError, SysResult, SyscallCtx};
use crate::proc::signal::SigAction;

/// Serialized byte length of `struct sigaction`.
const SIGACTION_SIZE: usize = 32;

fn encode_action(action: SigAction) -> [u8; SIGACTION_SIZE] {
    let mut bytes = [0u8; SIGACTION_SIZE];
    bytes[..16].copy_from_slice(&action.mask.bits().to_le_bytes());
    bytes[16..24].copy_from_slice(&(action.handler as u64).to_le_bytes());
    bytes[24..28].copy_from_slice(&action.flags.to_le_bytes());
    bytes
}

fn decode_action(bytes: &[u8]) -> SigAction {
    let mut mask = [0u8; 16];
    mask.copy_from_slice(&bytes[..16]);
    let mut handler = [0u8; 8];
    handler.copy_from_slice(&bytes[16..24]);
    let mut flags = [0u8; 4];
    flags.copy_from_slice(&bytes[24..28]);
    SigAction {
        handler: u64::from_le_bytes(handler) as usize,
        mask: SigSet::from_bits(u128::from_le_bytes(mask)),
        flags: i32::from_le_bytes(flags),
    }
}

pub(super) fn sys_sigaction(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [sig, act_ptr, old_ptr, ..] = args;
    let sig = sig as i32;
    if !is_valid_signal(sig) || sig == SIGKILL || sig == SIGSTOP {
        return Err(SysError::Errno(EINVAL));
    }

    let old = ctx.process.dispositions.lock()[sig as usize];
    if old_ptr != 0 {
        ctx.write_bytes(old_ptr, &encode_action(old))?;
    }
    if act_ptr != 0 {
        let bytes = ctx.read_bytes(act_ptr, SIGACTION_SIZE)?;
        ctx.process.dispositions.lock()[sig as usize] = decode_action(&bytes);
    }
    Ok(0)
}

pub(super) fn sys_sigprocmask(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [how, set_ptr, old_ptr, ..] = args;
    let current = ctx
        .kernel
        .threads
        .with(ctx.tid, |t| t.sigmask)
        .unwrap_or_else(SigSet::empty);

    if old_ptr != 0 {
        ctx.write_bytes(old_ptr, &current.bits().to_le_bytes())?;
    }
    if set_ptr != 0 {
        let bytes = ctx.read_bytes(set_ptr, 16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);
        let requested = SigSet::from_bits(u128::from_le_bytes(raw));
        let mut new_mask = match how as i32 {
            SIG_BLOCK => current.union(requested),
            SIG_UNBLOCK => current.difference(requested),
            SIG_SETMASK => requested,
            _ => return Err(SysError::Errno(EINVAL)),
        };
        // SIGKILL and SIGSTOP can never be blocked.
        new_mask.remove(SIGKILL);
        new_mask.remove(SIGSTOP);
        ctx.kernel.threads.with(ctx.tid, |t| t.sigmask = new_mask);
    }
    Ok(0)
}

pub(super) fn sys_sigpending(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [set_ptr, ..] = args;
    let pending = *ctx.process.pending.lock();
    ctx.write_bytes(set_ptr, &pending.bits().to_le_bytes())?;
    Ok(0)
}

pub(super) fn sys_sigreturn(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    ctx.kernel.sigreturn(ctx.tid).map_err(SysError::Errno)?;
    // The restored frame's retval is about to be clobbered by this
    // syscall's own return; hand back the saved value instead.
    let retval = ctx
        .kernel
        .threads
        .with(ctx.tid, |t| t.frame.retval as isize)
        .unwrap_or(0);
    Ok(retval)
}
