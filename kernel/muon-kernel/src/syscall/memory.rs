//! Memory-mapping syscalls.
//!
//! `mmap_wrapper` supports anonymous private mappings; every placement
//! decision goes through the segment module, and the MMU only ever sees
//! ranges the segment table accepted.

extern crate alloc;

use muon_mm::segment::{Prot, Segment, add_segment, place_segment, protect_range, unmap_range};
use muon_mm::{PAGE_SIZE, page_align_up};
use muon_syscall::errno::{EINVAL, ENOMEM, ENOTSUP};
use muon_syscall::mman::{MAP_ANONYMOUS, PROT_FORK, PROT_KREAD, PROT_KWRITE, PROT_USER_MASK};

use super::{SysError, SysResult, SyscallCtx};
use crate::mem::Mmu;

fn user_prot(raw: usize) -> Result<Prot, SysError> {
    let raw = raw as u32;
    if raw & !PROT_USER_MASK != 0 {
        return Err(SysError::Errno(EINVAL));
    }
    // Anonymous private memory is always copied into children and
    // reachable from kernel mode for the copy routines.
    Prot::from_bits(raw | PROT_FORK | PROT_KREAD | PROT_KWRITE).ok_or(SysError::Errno(EINVAL))
}

pub(super) fn sys_mmap_wrapper(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [addr, size, prot, flags, fd, _offset] = args;
    if size == 0 {
        return Err(SysError::Errno(EINVAL));
    }
    if flags as u32 & MAP_ANONYMOUS == 0 || fd as i32 != -1 {
        // File-backed mappings are not part of this kernel's contract.
        return Err(SysError::Errno(ENOTSUP));
    }
    let prot = user_prot(prot)?;
    let size = page_align_up(size);

    let segment = {
        let mut segments = ctx.process.segments.lock();
        let base = place_segment(&segments, addr, size, flags as u32)
            .map_err(|_| SysError::Errno(ENOMEM))?;
        let segment = Segment::new(base, size, prot);
        add_segment(&mut segments, segment).map_err(|_| SysError::Errno(ENOMEM))?;
        segment
    };
    ctx.kernel.mmu.map(*ctx.process.space.lock(), &segment);
    Ok(segment.addr as isize)
}

pub(super) fn sys_mprotect(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [addr, size, prot, ..] = args;
    if addr % PAGE_SIZE != 0 || size == 0 {
        return Err(SysError::Errno(EINVAL));
    }
    let prot = user_prot(prot)?;
    let size = page_align_up(size);

    let changed = {
        let mut segments = ctx.process.segments.lock();
        protect_range(&mut segments, addr, size, prot)
    };
    let space = *ctx.process.space.lock();
    for segment in &changed {
        ctx.kernel.mmu.protect(space, segment);
    }
    Ok(0)
}

pub(super) fn sys_munmap(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [addr, size, ..] = args;
    if addr % PAGE_SIZE != 0 || size == 0 {
        return Err(SysError::Errno(EINVAL));
    }
    let size = page_align_up(size);

    let removed = {
        let mut segments = ctx.process.segments.lock();
        unmap_range(&mut segments, addr, size)
    };
    let space = *ctx.process.space.lock();
    for segment in &removed {
        ctx.kernel.mmu.unmap(space, segment);
    }
    Ok(0)
}
