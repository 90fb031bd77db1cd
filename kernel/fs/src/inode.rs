//! The inode abstraction.
//!
//! An inode is an in-memory filesystem object identified by `(dev, ino)`.
//! The operation set is one trait; implementations override what they
//! support and inherit the POSIX-correct failure for everything else
//! (reading a directory is `EISDIR`, accepting on a file is `ENOTSOCK`,
//! seeking a pipe is `ESPIPE`, and so on).
//!
//! All buffer-moving operations take an [`IoCtx`] and opaque buffers; no
//! implementation ever dereferences a user pointer itself.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::{Dev, Gid, Ino, Uid};
use muon_syscall::stat::Stat;

use crate::ioctx::{DstBuf, IoCtx, SrcBuf};
use crate::poll::PollNode;
use crate::FsError;

/// The kind of object an inode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Character or block device.
    Device,
    /// Pipe endpoint.
    Pipe,
    /// Listening or connected socket.
    Socket,
    /// Connected byte stream (an accepted socket).
    Stream,
}

/// One directory entry as returned by [`Inode::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name, no slashes.
    pub name: String,
    /// Inode number of the target.
    pub ino: Ino,
    /// `DT_*` type tag.
    pub dt: u8,
}

/// The polymorphic inode operation set.
#[allow(unused_variables)]
pub trait Inode: Send + Sync {
    /// The inode's kind.
    fn inode_type(&self) -> InodeType;

    /// Device id of the owning filesystem instance.
    fn dev(&self) -> Dev;

    /// Inode number, unique within the device.
    fn ino(&self) -> Ino;

    /// Fills a [`Stat`] for this inode.
    fn stat(&self, ctx: &IoCtx) -> Result<Stat, FsError>;

    /// Size in bytes, when meaningful.
    fn size(&self) -> u64 {
        0
    }

    /// Changes the permission bits.
    fn chmod(&self, ctx: &IoCtx, mode: u32) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Changes ownership.
    fn chown(&self, ctx: &IoCtx, uid: Uid, gid: Gid) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Truncates or extends to `length` bytes.
    fn truncate(&self, ctx: &IoCtx, length: u64) -> Result<(), FsError> {
        match self.inode_type() {
            InodeType::Dir => Err(FsError::IsADirectory),
            _ => Err(FsError::NotSupported),
        }
    }

    // ── Byte I/O ────────────────────────────────────────────────────

    /// Stream read (no offset). Returns the byte count; zero is end of
    /// stream. Short reads are permitted.
    fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    /// Stream write (no offset). Returns the byte count written.
    fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    /// Positioned read.
    fn pread(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>, offset: u64) -> Result<usize, FsError> {
        Err(FsError::IllegalSeek)
    }

    /// Positioned write.
    fn pwrite(&self, ctx: &IoCtx, buf: &SrcBuf<'_>, offset: u64) -> Result<usize, FsError> {
        Err(FsError::IllegalSeek)
    }

    /// Whether descriptor offsets apply to this inode.
    fn is_seekable(&self) -> bool {
        matches!(self.inode_type(), InodeType::File | InodeType::Dir)
    }

    // ── Events and device control ───────────────────────────────────

    /// Registers a poll subscription and reports currently-true events.
    fn poll(&self, ctx: &IoCtx, node: &Arc<PollNode>) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Device control. `arg` was decoded by the ioctl wrapper per the
    /// code's argument-type tag.
    fn ioctl(&self, ctx: &IoCtx, code: i32, arg: IoctlArg<'_>) -> Result<isize, FsError> {
        Err(FsError::NotATerminal)
    }

    // ── Directory operations ────────────────────────────────────────

    /// Looks up (and with `O_CREATE` possibly creates) a child.
    fn open(
        &self,
        ctx: &IoCtx,
        name: &str,
        flags: u32,
        mode: u32,
    ) -> Result<Arc<dyn Inode>, FsError> {
        Err(FsError::NotADirectory)
    }

    /// Creates a child directory.
    fn mkdir(&self, ctx: &IoCtx, name: &str, mode: u32) -> Result<Arc<dyn Inode>, FsError> {
        Err(FsError::NotADirectory)
    }

    /// Removes a non-directory child.
    fn unlink(&self, ctx: &IoCtx, name: &str) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    /// Removes an empty child directory.
    fn rmdir(&self, ctx: &IoCtx, name: &str) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    /// Hard-links `target` under `name`.
    fn link(&self, ctx: &IoCtx, name: &str, target: &Arc<dyn Inode>) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    /// Creates a symbolic link child pointing at `target`.
    fn symlink(&self, ctx: &IoCtx, name: &str, target: &str) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    /// Reads a symlink target; returns the byte count (no terminator).
    fn readlink(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        Err(FsError::InvalidArgument)
    }

    /// Lists the directory.
    fn readdir(&self, ctx: &IoCtx) -> Result<Vec<DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }

    // ── Socket operations ───────────────────────────────────────────

    /// Binds a listening socket to an address.
    fn bind(&self, ctx: &IoCtx, addr: &[u8]) -> Result<(), FsError> {
        Err(FsError::NotASocket)
    }

    /// Starts accepting connections.
    fn listen(&self, ctx: &IoCtx, backlog: usize) -> Result<(), FsError> {
        Err(FsError::NotASocket)
    }

    /// Accepts a pending connection, yielding the connected stream inode.
    fn accept(&self, ctx: &IoCtx) -> Result<Arc<dyn Inode>, FsError> {
        Err(FsError::NotASocket)
    }

    /// Connects to a listening socket, yielding the connected stream inode.
    fn connect(&self, ctx: &IoCtx, addr: &[u8]) -> Result<Arc<dyn Inode>, FsError> {
        Err(FsError::NotASocket)
    }

    /// Sends on a connected stream.
    fn send(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        Err(FsError::NotASocket)
    }

    /// Receives from a connected stream.
    fn recv(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        Err(FsError::NotASocket)
    }

    // ── Blocking support ────────────────────────────────────────────

    /// The condition a would-block reader should wait on, if any.
    fn read_condition(&self) -> Option<Arc<muon_core::sync::WakeCondition>> {
        None
    }

    /// The condition a would-block writer should wait on, if any.
    fn write_condition(&self) -> Option<Arc<muon_core::sync::WakeCondition>> {
        None
    }
}

/// The decoded third argument of an ioctl call.
pub enum IoctlArg<'a> {
    /// The request takes no argument.
    Void,
    /// An `int`-tagged argument.
    Int(i32),
    /// A `long`-tagged argument.
    Long(isize),
    /// A pointer-tagged argument, exposed as an opaque user range that
    /// must be accessed through the call's [`IoCtx`].
    Ptr(usize, &'a IoCtx),
}
