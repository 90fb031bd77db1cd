//! Open-file descriptions.
//!
//! A [`Descriptor`] binds an inode to open flags and a seek offset. Dup
//! and fork share the descriptor object itself, so aliases see one
//! offset; the offset lock also serializes same-descriptor I/O from
//! multiple threads.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::{Gid, Uid};
use muon_core::sync::SpinLock;
use muon_syscall::fcntl::{
    O_APPEND, O_NONBLOCK, O_READ, O_WRITE, SEEK_CUR, SEEK_END, SEEK_SET,
};
use muon_syscall::stat::Stat;

use crate::inode::{DirEntry, Inode, IoctlArg};
use crate::ioctx::{DstBuf, IoCtx, SrcBuf};
use crate::poll::PollNode;
use crate::FsError;

/// An open-file description.
pub struct Descriptor {
    inode: Arc<dyn Inode>,
    /// `O_READ`/`O_WRITE` capabilities plus mutable status flags
    /// (`O_APPEND`, `O_NONBLOCK`).
    flags: SpinLock<u32>,
    /// Seek offset; also the per-descriptor operation lock.
    offset: SpinLock<u64>,
    seekable: bool,
}

impl Descriptor {
    /// Wraps an inode in a descriptor with the given open flags.
    pub fn new(inode: Arc<dyn Inode>, flags: u32) -> Arc<Self> {
        let seekable = inode.is_seekable();
        Arc::new(Self {
            inode,
            flags: SpinLock::new(flags),
            offset: SpinLock::new(0),
            seekable,
        })
    }

    /// The underlying inode.
    pub fn inode(&self) -> &Arc<dyn Inode> {
        &self.inode
    }

    /// Current open flags.
    pub fn flags(&self) -> u32 {
        *self.flags.lock()
    }

    /// Replaces the mutable status flags, keeping the capabilities.
    pub fn set_status_flags(&self, new_flags: u32) {
        let mut flags = self.flags.lock();
        let mutable = O_APPEND | O_NONBLOCK;
        *flags = (*flags & !mutable) | (new_flags & mutable);
    }

    fn require(&self, capability: u32) -> Result<(), FsError> {
        if self.flags() & capability != 0 {
            Ok(())
        } else {
            Err(FsError::BadDescriptor)
        }
    }

    /// Context for the inode call, carrying this descriptor's flags.
    fn io_ctx(&self, ctx: &IoCtx) -> IoCtx {
        ctx.with_dflags(self.flags())
    }

    // ── Byte I/O ────────────────────────────────────────────────────

    /// Reads at the current offset, advancing it on success.
    pub fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        self.require(O_READ)?;
        let ctx = self.io_ctx(ctx);
        if self.seekable {
            let mut offset = self.offset.lock();
            let count = self.inode.pread(&ctx, buf, *offset)?;
            *offset += count as u64;
            Ok(count)
        } else {
            self.inode.read(&ctx, buf)
        }
    }

    /// Writes at the current offset (or the end under `O_APPEND`),
    /// advancing it on success.
    pub fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        self.require(O_WRITE)?;
        let ctx = self.io_ctx(ctx);
        if self.seekable {
            let mut offset = self.offset.lock();
            if self.flags() & O_APPEND != 0 {
                *offset = self.inode.size();
            }
            let count = self.inode.pwrite(&ctx, buf, *offset)?;
            *offset += count as u64;
            Ok(count)
        } else {
            self.inode.write(&ctx, buf)
        }
    }

    /// Positioned read; the descriptor offset is untouched.
    pub fn pread(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>, offset: u64) -> Result<usize, FsError> {
        self.require(O_READ)?;
        if !self.seekable {
            return Err(FsError::IllegalSeek);
        }
        self.inode.pread(&self.io_ctx(ctx), buf, offset)
    }

    /// Positioned write; the descriptor offset is untouched.
    pub fn pwrite(&self, ctx: &IoCtx, buf: &SrcBuf<'_>, offset: u64) -> Result<usize, FsError> {
        self.require(O_WRITE)?;
        if !self.seekable {
            return Err(FsError::IllegalSeek);
        }
        self.inode.pwrite(&self.io_ctx(ctx), buf, offset)
    }

    /// Repositions the offset. Returns the new offset.
    pub fn lseek(&self, offset: i64, whence: i32) -> Result<u64, FsError> {
        if !self.seekable {
            return Err(FsError::IllegalSeek);
        }
        let mut current = self.offset.lock();
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => *current as i64,
            SEEK_END => self.inode.size() as i64,
            _ => return Err(FsError::InvalidArgument),
        };
        let target = base.checked_add(offset).ok_or(FsError::Overflow)?;
        if target < 0 {
            return Err(FsError::InvalidArgument);
        }
        *current = target as u64;
        Ok(*current)
    }

    // ── Delegations ─────────────────────────────────────────────────

    /// Stats the inode.
    pub fn stat(&self, ctx: &IoCtx) -> Result<Stat, FsError> {
        self.inode.stat(&self.io_ctx(ctx))
    }

    /// Changes mode bits.
    pub fn chmod(&self, ctx: &IoCtx, mode: u32) -> Result<(), FsError> {
        self.inode.chmod(&self.io_ctx(ctx), mode)
    }

    /// Changes ownership.
    pub fn chown(&self, ctx: &IoCtx, uid: Uid, gid: Gid) -> Result<(), FsError> {
        self.inode.chown(&self.io_ctx(ctx), uid, gid)
    }

    /// Truncates to `length`; requires write capability.
    pub fn truncate(&self, ctx: &IoCtx, length: u64) -> Result<(), FsError> {
        self.require(O_WRITE)?;
        self.inode.truncate(&self.io_ctx(ctx), length)
    }

    /// Device control.
    pub fn ioctl(&self, ctx: &IoCtx, code: i32, arg: IoctlArg<'_>) -> Result<isize, FsError> {
        self.inode.ioctl(&self.io_ctx(ctx), code, arg)
    }

    /// Registers a poll subscription.
    pub fn poll(&self, ctx: &IoCtx, node: &Arc<PollNode>) -> Result<(), FsError> {
        self.inode.poll(&self.io_ctx(ctx), node)
    }

    /// Lists a directory.
    pub fn readdir(&self, ctx: &IoCtx) -> Result<Vec<DirEntry>, FsError> {
        self.inode.readdir(&self.io_ctx(ctx))
    }

    /// Accepts a connection on a listening socket.
    pub fn accept(&self, ctx: &IoCtx) -> Result<Arc<dyn Inode>, FsError> {
        self.inode.accept(&self.io_ctx(ctx))
    }

    /// Sends on a connected stream.
    pub fn send(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        self.require(O_WRITE)?;
        self.inode.send(&self.io_ctx(ctx), buf)
    }

    /// Receives from a connected stream.
    pub fn recv(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        self.require(O_READ)?;
        self.inode.recv(&self.io_ctx(ctx), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;
    use muon_core::id::Dev;
    use muon_syscall::fcntl::O_CREATE;

    fn file_with(content: &[u8]) -> Arc<Descriptor> {
        let fs = RamFs::new(Dev::new(1));
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let inode = fs
            .root()
            .open(&ctx, "f", O_READ | O_WRITE | O_CREATE, 0o644)
            .unwrap();
        let desc = Descriptor::new(inode, O_READ | O_WRITE);
        let written = desc
            .write(&ctx, &SrcBuf::Kernel(content))
            .unwrap();
        assert_eq!(written, content.len());
        desc.lseek(0, SEEK_SET).unwrap();
        desc
    }

    #[test]
    fn sequential_reads_advance_the_offset() {
        let desc = file_with(b"abcdef");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let mut buf = [0u8; 3];
        assert_eq!(desc.read(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(desc.read(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(desc.read(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(), 0);
    }

    #[test]
    fn pread_leaves_offset_alone() {
        let desc = file_with(b"abcdef");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let mut buf = [0u8; 2];
        assert_eq!(
            desc.pread(&ctx, &mut DstBuf::Kernel(&mut buf), 4).unwrap(),
            2
        );
        assert_eq!(&buf, b"ef");
        let mut first = [0u8; 1];
        desc.read(&ctx, &mut DstBuf::Kernel(&mut first)).unwrap();
        assert_eq!(&first, b"a");
    }

    #[test]
    fn lseek_end_and_current() {
        let desc = file_with(b"abcdef");
        assert_eq!(desc.lseek(-2, SEEK_END).unwrap(), 4);
        assert_eq!(desc.lseek(1, SEEK_CUR).unwrap(), 5);
        assert_eq!(desc.lseek(-10, SEEK_SET), Err(FsError::InvalidArgument));
    }

    #[test]
    fn capability_checks() {
        let desc = file_with(b"x");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let ro = Descriptor::new(desc.inode().clone(), O_READ);
        assert_eq!(
            ro.write(&ctx, &SrcBuf::Kernel(b"y")),
            Err(FsError::BadDescriptor)
        );
        let wo = Descriptor::new(desc.inode().clone(), O_WRITE);
        let mut buf = [0u8; 1];
        assert_eq!(
            wo.read(&ctx, &mut DstBuf::Kernel(&mut buf)),
            Err(FsError::BadDescriptor)
        );
    }

    #[test]
    fn append_writes_go_to_the_end() {
        let desc = file_with(b"abc");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let appender = Descriptor::new(desc.inode().clone(), O_WRITE | O_APPEND);
        appender.write(&ctx, &SrcBuf::Kernel(b"def")).unwrap();
        let mut buf = [0u8; 6];
        desc.pread(&ctx, &mut DstBuf::Kernel(&mut buf), 0).unwrap();
        assert_eq!(&buf, b"abcdef");
    }
}
