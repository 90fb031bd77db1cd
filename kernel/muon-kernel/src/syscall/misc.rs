//! Kernel information and entropy syscalls.

extern crate alloc;

use muon_syscall::errno::{EINVAL, EIO, ERANGE};

use super::{SysError, SysResult, SyscallCtx};
use crate::config::{GETENTROPY_MAX, KERNEL_NAME, KERNEL_VERSION};

fn kernel_info(request: &str) -> Option<&'static str> {
    match request {
        "name" => Some(KERNEL_NAME),
        "version" => Some(KERNEL_VERSION),
        "builddate" | "buildtime" => Some("unknown"),
        _ => None,
    }
}

/// `kernelinfo(request, buffer, length)`.
///
/// On a too-small buffer the needed string length is returned positive
/// with `errno` set to `ERANGE`, so callers can retry with a fitting
/// buffer.
pub(super) fn sys_kernelinfo(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [req_ptr, resp_ptr, resp_len, ..] = args;
    let request = ctx.read_cstring(req_ptr)?;
    let value = kernel_info(&request).ok_or(SysError::Errno(EINVAL))?;

    if resp_len < value.len() + 1 {
        ctx.set_errno(ERANGE);
        return Ok(value.len() as isize);
    }
    let mut out = alloc::vec::Vec::with_capacity(value.len() + 1);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    ctx.write_bytes(resp_ptr, &out)?;
    Ok(0)
}

pub(super) fn sys_getentropy(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [buf_ptr, size, ..] = args;
    if size > GETENTROPY_MAX {
        return Err(SysError::Errno(EIO));
    }
    let mut buffer = [0u8; GETENTROPY_MAX];
    ctx.kernel.entropy.fill(&mut buffer[..size]);
    ctx.write_bytes(buf_ptr, &buffer[..size])?;
    Ok(0)
}
