//! Filesystem syscalls: opening, naming, and metadata.

extern crate alloc;

use alloc::sync::Arc;

use muon_core::id::{Gid, Uid};
use muon_fs::inode::InodeType;
use muon_fs::{Descriptor, DstBuf, FsError};
use muon_syscall::errno::EINVAL;
use muon_syscall::fcntl::{
    FD_CLOEXEC, FD_CLOFORK, O_CLOEXEC, O_CLOFORK, O_DESCRIPTOR_FLAGS, O_DIRECTORY, O_READ,
    O_TRUNC, O_WRITE,
};
use muon_syscall::stat::Stat;

use super::{SysError, SysResult, SyscallCtx};
use crate::vfs;

fn encode_stat(stat: &Stat) -> [u8; 104] {
    let mut bytes = [0u8; 104];
    bytes[0..8].copy_from_slice(&stat.st_dev.to_le_bytes());
    bytes[8..16].copy_from_slice(&stat.st_ino.to_le_bytes());
    bytes[16..20].copy_from_slice(&stat.st_mode.to_le_bytes());
    bytes[20..24].copy_from_slice(&stat.st_nlink.to_le_bytes());
    bytes[24..28].copy_from_slice(&stat.st_uid.to_le_bytes());
    bytes[28..32].copy_from_slice(&stat.st_gid.to_le_bytes());
    bytes[32..40].copy_from_slice(&stat.st_size.to_le_bytes());
    for (slot, time) in [stat.st_atim, stat.st_mtim, stat.st_ctim]
        .iter()
        .enumerate()
    {
        let at = 40 + slot * 16;
        bytes[at..at + 8].copy_from_slice(&time.tv_sec.to_le_bytes());
        bytes[at + 8..at + 16].copy_from_slice(&time.tv_nsec.to_le_bytes());
    }
    bytes[88..96].copy_from_slice(&stat.st_blksize.to_le_bytes());
    bytes[96..104].copy_from_slice(&stat.st_blocks.to_le_bytes());
    bytes
}

pub(super) fn sys_open(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, flags, mode, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let flags = flags as u32;
    let mode = mode as u32;
    let user_ctx = ctx.user_ctx();

    // Paths naming a directory outright (trailing slash, ".", "/") are
    // resolved whole; everything else goes through the parent so the
    // directory's open applies create/exclusive/permission semantics.
    let inode = match vfs::resolve_parent(ctx.kernel, &ctx.process, &path) {
        Ok(parent) => {
            let inode = parent
                .dir
                .open(&user_ctx, &parent.name, flags, mode)?;
            let inode = ctx.process.mounts.lock().redirect(inode);
            if inode.inode_type() == InodeType::Symlink {
                vfs::resolve(ctx.kernel, &ctx.process, &path)?
            } else if parent.must_be_dir && inode.inode_type() != InodeType::Dir {
                return Err(FsError::NotADirectory.into());
            } else {
                inode
            }
        }
        Err(FsError::InvalidArgument) => vfs::resolve(ctx.kernel, &ctx.process, &path)?,
        Err(error) => return Err(error.into()),
    };

    if flags & O_DIRECTORY != 0 && inode.inode_type() != InodeType::Dir {
        return Err(FsError::NotADirectory.into());
    }
    if inode.inode_type() == InodeType::Dir && flags & O_WRITE != 0 {
        return Err(FsError::IsADirectory.into());
    }
    if flags & O_TRUNC != 0 && inode.inode_type() == InodeType::File {
        inode.truncate(&user_ctx, 0)?;
    }

    let mut slot_flags = 0;
    if flags & O_CLOEXEC != 0 {
        slot_flags |= FD_CLOEXEC;
    }
    if flags & O_CLOFORK != 0 {
        slot_flags |= FD_CLOFORK;
    }
    let desc = Descriptor::new(inode, flags & O_DESCRIPTOR_FLAGS);
    let dtable = ctx.process.dtable.lock().clone();
    let fd = dtable.allocate(desc, slot_flags, 0)?;
    Ok(fd as isize)
}

pub(super) fn sys_mkdir(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, mode, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &path)?;
    parent
        .dir
        .mkdir(&ctx.user_ctx(), &parent.name, mode as u32)?;
    Ok(0)
}

pub(super) fn sys_rmdir(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &path)?;
    parent.dir.rmdir(&ctx.user_ctx(), &parent.name)?;
    Ok(0)
}

pub(super) fn sys_unlink(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &path)?;
    if parent.must_be_dir {
        return Err(SysError::Errno(EINVAL));
    }
    parent.dir.unlink(&ctx.user_ctx(), &parent.name)?;
    Ok(0)
}

pub(super) fn sys_link(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [old_ptr, new_ptr, ..] = args;
    let old_path = ctx.read_cstring(old_ptr)?;
    let new_path = ctx.read_cstring(new_ptr)?;
    let target = vfs::resolve(ctx.kernel, &ctx.process, &old_path)?;
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &new_path)?;
    parent.dir.link(&ctx.user_ctx(), &parent.name, &target)?;
    Ok(0)
}

pub(super) fn sys_symlink(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [target_ptr, link_ptr, ..] = args;
    let target = ctx.read_cstring(target_ptr)?;
    let link_path = ctx.read_cstring(link_ptr)?;
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &link_path)?;
    parent.dir.symlink(&ctx.user_ctx(), &parent.name, &target)?;
    Ok(0)
}

pub(super) fn sys_readlink(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, buf, len, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    // Resolve the parent and look the link itself up without following.
    let parent = vfs::resolve_parent(ctx.kernel, &ctx.process, &path)?;
    let user_ctx = ctx.user_ctx();
    let inode = parent.dir.open(&user_ctx, &parent.name, 0, 0)?;
    let count = inode.readlink(&user_ctx, &mut DstBuf::User(buf, len))?;
    Ok(count as isize)
}

pub(super) fn sys_truncate(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, length, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let inode = vfs::resolve(ctx.kernel, &ctx.process, &path)?;
    inode.truncate(&ctx.user_ctx(), length as u64)?;
    Ok(0)
}

pub(super) fn sys_ftruncate(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, length, ..] = args;
    let desc = ctx.desc(fd)?;
    desc.truncate(&ctx.user_ctx(), length as u64)?;
    Ok(0)
}

pub(super) fn sys_stat(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, stat_ptr, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let inode = vfs::resolve(ctx.kernel, &ctx.process, &path)?;
    let stat = inode.stat(&ctx.user_ctx())?;
    ctx.write_bytes(stat_ptr, &encode_stat(&stat))?;
    Ok(0)
}

pub(super) fn sys_fstat(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, stat_ptr, ..] = args;
    let desc = ctx.desc(fd)?;
    let stat = desc.stat(&ctx.user_ctx())?;
    ctx.write_bytes(stat_ptr, &encode_stat(&stat))?;
    Ok(0)
}

pub(super) fn sys_chmod(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, mode, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let inode = vfs::resolve(ctx.kernel, &ctx.process, &path)?;
    inode.chmod(&ctx.user_ctx(), mode as u32)?;
    Ok(0)
}

pub(super) fn sys_chown(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, uid, gid, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let inode = vfs::resolve(ctx.kernel, &ctx.process, &path)?;
    inode.chown(
        &ctx.user_ctx(),
        Uid::new(uid as u32),
        Gid::new(gid as u32),
    )?;
    Ok(0)
}

pub(super) fn sys_chdir(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [path_ptr, ..] = args;
    let path = ctx.read_cstring(path_ptr)?;
    let inode = vfs::resolve(ctx.kernel, &ctx.process, &path)?;
    set_cwd(ctx, inode)
}

pub(super) fn sys_fchdir(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, ..] = args;
    let desc = ctx.desc(fd)?;
    set_cwd(ctx, desc.inode().clone())
}

fn set_cwd(ctx: &SyscallCtx<'_>, inode: Arc<dyn muon_fs::Inode>) -> SysResult {
    if inode.inode_type() != InodeType::Dir {
        return Err(FsError::NotADirectory.into());
    }
    *ctx.process.cwd.lock() = Some(Descriptor::new(inode, O_READ));
    Ok(0)
}
