//! Descriptor I/O syscalls.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::sync::WakeCondition;
use muon_fs::inode::IoctlArg;
use muon_fs::poll::PollNode;
use muon_fs::{Descriptor, DstBuf, FsError, PipeInode, SrcBuf};
use muon_syscall::errno::{EAGAIN, EBADF, EINVAL, EPIPE};
use muon_syscall::fcntl::{
    F_DUPFD, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, O_READ, O_WRITE,
    SOCK_CLOEXEC, SOCK_NONBLOCK,
};
use muon_syscall::ioctl::{
    IOCTL_TYPE_INT, IOCTL_TYPE_LONG, IOCTL_TYPE_PTR, IOCTL_TYPE_VOID, ioctl_type,
};
use muon_syscall::poll::POLLNVAL;
use muon_syscall::signal::SIGPIPE;

use super::{SysError, SysResult, SyscallCtx};
use crate::syscall::time::arm_wakeup;

/// Maps a would-block I/O failure to EAGAIN or a parked thread.
fn block_or_again(
    nonblock: bool,
    cond: Option<Arc<WakeCondition>>,
) -> SysError {
    if nonblock {
        return SysError::Errno(EAGAIN);
    }
    match cond {
        Some(cond) => SysError::Block(cond),
        None => SysError::Errno(EAGAIN),
    }
}

pub(super) fn sys_read(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, buf, count, ..] = args;
    let desc = ctx.desc(fd)?;
    let nonblock = desc.flags() & O_NONBLOCK != 0;
    match desc.read(&ctx.user_ctx(), &mut DstBuf::User(buf, count)) {
        Ok(read) => Ok(read as isize),
        Err(FsError::WouldBlock) => {
            Err(block_or_again(nonblock, desc.inode().read_condition()))
        }
        Err(error) => Err(error.into()),
    }
}

pub(super) fn sys_write(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, buf, count, ..] = args;
    let desc = ctx.desc(fd)?;
    let nonblock = desc.flags() & O_NONBLOCK != 0;
    match desc.write(&ctx.user_ctx(), &SrcBuf::User(buf, count)) {
        Ok(written) => Ok(written as isize),
        Err(FsError::WouldBlock) => {
            Err(block_or_again(nonblock, desc.inode().write_condition()))
        }
        Err(FsError::PipeClosed) => {
            // A write to a reader-less pipe raises SIGPIPE at the writer.
            let _ = ctx.kernel.deliver_signal(ctx.process.pid, SIGPIPE);
            Err(SysError::Errno(EPIPE))
        }
        Err(error) => Err(error.into()),
    }
}

pub(super) fn sys_pread(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, buf, count, offset, ..] = args;
    let desc = ctx.desc(fd)?;
    let read = desc.pread(&ctx.user_ctx(), &mut DstBuf::User(buf, count), offset as u64)?;
    Ok(read as isize)
}

pub(super) fn sys_pwrite(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, buf, count, offset, ..] = args;
    let desc = ctx.desc(fd)?;
    let written = desc.pwrite(&ctx.user_ctx(), &SrcBuf::User(buf, count), offset as u64)?;
    Ok(written as isize)
}

pub(super) fn sys_close(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, ..] = args;
    let dtable = ctx.process.dtable.lock().clone();
    dtable.free(fd as i32)?;
    Ok(0)
}

pub(super) fn sys_lseek(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, offset, whence, ..] = args;
    let desc = ctx.desc(fd)?;
    let position = desc.lseek(offset as i64, whence as i32)?;
    Ok(position as isize)
}

pub(super) fn sys_dup(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, ..] = args;
    let dtable = ctx.process.dtable.lock().clone();
    let new_fd = dtable.allocate_from(fd as i32, 0, 0)?;
    Ok(new_fd as isize)
}

pub(super) fn sys_dup2(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [old_fd, new_fd, ..] = args;
    let dtable = ctx.process.dtable.lock().clone();
    if old_fd == new_fd {
        // Validated no-op per POSIX.
        return dtable
            .get(old_fd as i32)
            .map(|_| new_fd as isize)
            .ok_or(SysError::Errno(EBADF));
    }
    let fd = dtable.copy(old_fd as i32, new_fd as i32, 0)?;
    Ok(fd as isize)
}

pub(super) fn sys_pipe(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fds_ptr, ..] = args;
    let (read_inode, write_inode) = PipeInode::pair();
    let dtable = ctx.process.dtable.lock().clone();

    let read_fd = dtable.allocate(Descriptor::new(read_inode, O_READ), 0, 0)?;
    let write_fd = match dtable.allocate(Descriptor::new(write_inode, O_WRITE), 0, 0) {
        Ok(fd) => fd,
        Err(error) => {
            let _ = dtable.free(read_fd);
            return Err(error.into());
        }
    };

    let mut both = [0u8; 8];
    both[..4].copy_from_slice(&read_fd.to_le_bytes());
    both[4..].copy_from_slice(&write_fd.to_le_bytes());
    if let Err(error) = ctx.write_bytes(fds_ptr, &both) {
        let _ = dtable.free(read_fd);
        let _ = dtable.free(write_fd);
        return Err(error);
    }
    Ok(0)
}

pub(super) fn sys_fcntl(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, cmd, arg, ..] = args;
    let dtable = ctx.process.dtable.lock().clone();
    match cmd as i32 {
        F_DUPFD => {
            let new_fd = dtable.allocate_from(fd as i32, 0, arg as i32)?;
            Ok(new_fd as isize)
        }
        F_GETFD => Ok(dtable.get_flags(fd as i32)? as isize),
        F_SETFD => {
            dtable.set_flags(fd as i32, arg as i32)?;
            Ok(0)
        }
        F_GETFL => {
            let desc = ctx.desc(fd)?;
            Ok(desc.flags() as isize)
        }
        F_SETFL => {
            let desc = ctx.desc(fd)?;
            desc.set_status_flags(arg as u32);
            Ok(0)
        }
        _ => Err(SysError::Errno(EINVAL)),
    }
}

pub(super) fn sys_ioctl(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, code, raw_arg, ..] = args;
    let desc = ctx.desc(fd)?;
    let code = code as i32;
    let user_ctx = ctx.user_ctx();
    let arg = match ioctl_type(code) {
        IOCTL_TYPE_VOID => IoctlArg::Void,
        IOCTL_TYPE_INT => IoctlArg::Int(raw_arg as i32),
        IOCTL_TYPE_LONG => IoctlArg::Long(raw_arg as isize),
        IOCTL_TYPE_PTR => IoctlArg::Ptr(raw_arg, &user_ctx),
        _ => return Err(SysError::Errno(EINVAL)),
    };
    let value = desc.ioctl(&user_ctx, code, arg)?;
    Ok(value)
}

pub(super) fn sys_closefrom(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, ..] = args;
    let dtable = ctx.process.dtable.lock().clone();
    let closed = dtable.close_from(fd as i32)?;
    Ok(closed as isize)
}

pub(super) fn sys_accept4(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fd, _addr, _addrlen, flags, ..] = args;
    let desc = ctx.desc(fd)?;
    let nonblock =
        desc.flags() & O_NONBLOCK != 0 || flags as u32 & SOCK_NONBLOCK != 0;
    match desc.accept(&ctx.user_ctx()) {
        Ok(stream) => {
            let mut open_flags = O_READ | O_WRITE;
            if flags as u32 & SOCK_NONBLOCK != 0 {
                open_flags |= O_NONBLOCK;
            }
            let slot_flags = if flags as u32 & SOCK_CLOEXEC != 0 {
                FD_CLOEXEC
            } else {
                0
            };
            let dtable = ctx.process.dtable.lock().clone();
            let new_fd = dtable.allocate(Descriptor::new(stream, open_flags), slot_flags, 0)?;
            Ok(new_fd as isize)
        }
        Err(FsError::WouldBlock) => {
            Err(block_or_again(nonblock, desc.inode().read_condition()))
        }
        Err(error) => Err(error.into()),
    }
}

pub(super) fn sys_ppoll(ctx: &SyscallCtx<'_>, args: [usize; 6]) -> SysResult {
    let [fds_ptr, nfds, timeout_ptr, _sigmask_ptr, ..] = args;
    if nfds > 64 {
        return Err(SysError::Errno(EINVAL));
    }

    // Read the pollfd array: (i32, i16, i16) per entry.
    let raw = ctx.read_bytes(fds_ptr, nfds * 8)?;
    let mut fds = Vec::with_capacity(nfds);
    for entry in 0..nfds {
        let at = entry * 8;
        let fd = i32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let events = i16::from_le_bytes([raw[at + 4], raw[at + 5]]);
        fds.push((fd, events));
    }

    let cond = Arc::new(WakeCondition::new());
    let mut nodes: Vec<Option<Arc<PollNode>>> = Vec::with_capacity(nfds);
    let dtable = ctx.process.dtable.lock().clone();
    let user_ctx = ctx.user_ctx();
    for (fd, events) in &fds {
        if *fd < 0 {
            nodes.push(None);
            continue;
        }
        match dtable.get(*fd) {
            Some(desc) => {
                let node = PollNode::new(*events, cond.clone());
                match desc.poll(&user_ctx, &node) {
                    Ok(()) => nodes.push(Some(node)),
                    Err(_) => nodes.push(Some({
                        node.publish(POLLNVAL);
                        node
                    })),
                }
            }
            None => {
                let node = PollNode::new(*events, cond.clone());
                node.publish(POLLNVAL);
                nodes.push(Some(node));
            }
        }
    }

    let ready = nodes
        .iter()
        .flatten()
        .filter(|node| node.revents() != 0)
        .count();

    // Timeout bookkeeping on the monotonic clock.
    let deadline = if timeout_ptr == 0 {
        None
    } else {
        let timeout = ctx.read_timespec(timeout_ptr)?;
        if !timeout.is_canonical() || timeout.is_negative() {
            return Err(SysError::Errno(EINVAL));
        }
        let stored = ctx.kernel.threads.with(ctx.tid, |t| t.sleep_deadline);
        match stored.flatten() {
            Some((_, deadline)) => Some(deadline),
            None => {
                let now = ctx.kernel.time.monotonic.get().0;
                Some(now.add(timeout))
            }
        }
    };

    let timed_out = deadline
        .is_some_and(|deadline| ctx.kernel.time.monotonic.get().0 >= deadline);

    if ready > 0 || timed_out {
        // Report: write revents back into the user array.
        let mut out = raw;
        for (entry, node) in nodes.iter().enumerate() {
            let revents = node.as_ref().map_or(0, |n| n.revents());
            let at = entry * 8 + 6;
            out[at..at + 2].copy_from_slice(&revents.to_le_bytes());
        }
        ctx.write_bytes(fds_ptr, &out)?;
        ctx.kernel.threads.with(ctx.tid, |t| {
            t.sleep_deadline = None;
            t.poll_nodes.clear();
        });
        return Ok(ready as isize);
    }

    // Keep the nodes alive across the park so channel signals reach us.
    let live: Vec<Arc<PollNode>> = nodes.into_iter().flatten().collect();
    ctx.kernel.threads.with(ctx.tid, |t| {
        t.poll_nodes = live;
    });
    if let Some(deadline) = deadline {
        ctx.kernel.threads.with(ctx.tid, |t| {
            t.sleep_deadline = Some((muon_syscall::time::CLOCK_MONOTONIC, deadline));
        });
        arm_wakeup(&ctx.kernel.time.monotonic, deadline, cond.clone());
    }
    Err(SysError::Block(cond))
}
