//! In-memory filesystem backed by kernel heap allocations.
//!
//! `RamFs` is the root filesystem: directories are maps, file contents are
//! byte vectors. One instance is one device; inode numbers are unique
//! within it. Hard links share the node; the link counter decides when a
//! node leaves the filesystem's inode index.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_core::id::{Dev, Gid, Ino, Uid};
use muon_core::refcount::Refcount;
use muon_core::sync::SpinLock;
use muon_syscall::fcntl::{O_CREATE, O_DIRECTORY, O_EXCL, O_TRUNC, O_WRITE};
use muon_syscall::stat::{mode_to_dt, S_IFDIR, S_IFLNK, S_IFREG, S_IFMT, Stat};

use crate::inode::{DirEntry, Inode, InodeType};
use crate::ioctx::{DstBuf, IoCtx, SrcBuf};
use crate::FsError;

/// Longest accepted component name.
const NAME_MAX: usize = 255;

struct FsShared {
    dev: Dev,
    next_ino: AtomicU64,
    /// Index of live (still linked) nodes by inode number.
    index: SpinLock<BTreeMap<u64, Weak<RamInode>>>,
}

impl FsShared {
    fn allocate_ino(&self) -> Ino {
        Ino::new(self.next_ino.fetch_add(1, Ordering::Relaxed))
    }
}

/// A ramfs filesystem instance.
pub struct RamFs {
    shared: Arc<FsShared>,
    root: Arc<RamInode>,
}

impl RamFs {
    /// Creates a filesystem with an empty root directory on device `dev`.
    pub fn new(dev: Dev) -> Self {
        let shared = Arc::new(FsShared {
            dev,
            next_ino: AtomicU64::new(2),
            index: SpinLock::new(BTreeMap::new()),
        });
        let root = RamInode::new(shared.clone(), Ino::new(1), InodeType::Dir, 0o755);
        Self { shared, root }
    }

    /// The root directory inode.
    pub fn root(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    /// Looks up a live node by inode number.
    pub fn inode_by_number(&self, ino: Ino) -> Option<Arc<dyn Inode>> {
        let index = self.shared.index.lock();
        index
            .get(&ino.get())
            .and_then(Weak::upgrade)
            .map(|node| node as Arc<dyn Inode>)
    }
}

struct Meta {
    mode: u32,
    uid: Uid,
    gid: Gid,
}

/// One ramfs node: file, directory, or symlink.
pub struct RamInode {
    shared: Arc<FsShared>,
    ino: Ino,
    kind: InodeType,
    meta: SpinLock<Meta>,
    /// File content, or symlink target bytes.
    data: SpinLock<Vec<u8>>,
    /// Directory entries.
    children: SpinLock<BTreeMap<String, Arc<RamInode>>>,
    /// Hard-link count; at zero the node leaves the inode index.
    links: Refcount,
}

impl RamInode {
    fn new(shared: Arc<FsShared>, ino: Ino, kind: InodeType, mode: u32) -> Arc<Self> {
        let type_bits = match kind {
            InodeType::Dir => S_IFDIR,
            InodeType::Symlink => S_IFLNK,
            _ => S_IFREG,
        };
        let node = Arc::new(Self {
            shared: shared.clone(),
            ino,
            kind,
            meta: SpinLock::new(Meta {
                mode: type_bits | (mode & !S_IFMT),
                uid: Uid::ROOT,
                gid: Gid::ROOT,
            }),
            data: SpinLock::new(Vec::new()),
            children: SpinLock::new(BTreeMap::new()),
            links: Refcount::new(),
        });
        shared.index.lock().insert(ino.get(), Arc::downgrade(&node));
        node
    }

    fn require_dir(&self) -> Result<(), FsError> {
        if self.kind == InodeType::Dir {
            Ok(())
        } else {
            Err(FsError::NotADirectory)
        }
    }

    fn check_name(name: &str) -> Result<(), FsError> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    /// Classic owner/group/other permission check; root bypasses.
    fn check_access(&self, ctx: &IoCtx, want: u32) -> Result<(), FsError> {
        if ctx.uid == Uid::ROOT {
            return Ok(());
        }
        let meta = self.meta.lock();
        let shift = if ctx.uid == meta.uid {
            6
        } else if ctx.gid == meta.gid {
            3
        } else {
            0
        };
        if (meta.mode >> shift) & want == want {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    /// Drops one link; the last link removes the node from the index.
    fn drop_link(&self) {
        if self.links.unref() {
            self.shared.index.lock().remove(&self.ino.get());
        }
    }
}

impl Inode for RamInode {
    fn inode_type(&self) -> InodeType {
        self.kind
    }

    fn dev(&self) -> Dev {
        self.shared.dev
    }

    fn ino(&self) -> Ino {
        self.ino
    }

    fn size(&self) -> u64 {
        match self.kind {
            InodeType::Dir => self.children.lock().len() as u64,
            _ => self.data.lock().len() as u64,
        }
    }

    fn stat(&self, _ctx: &IoCtx) -> Result<Stat, FsError> {
        let meta = self.meta.lock();
        let size = self.size();
        Ok(Stat {
            st_dev: self.shared.dev.get(),
            st_ino: self.ino.get(),
            st_mode: meta.mode,
            st_nlink: self.links.count() as u32,
            st_uid: meta.uid.get(),
            st_gid: meta.gid.get(),
            st_size: size as i64,
            st_blksize: 512,
            st_blocks: (size as i64 + 511) / 512,
            ..Stat::default()
        })
    }

    fn chmod(&self, ctx: &IoCtx, mode: u32) -> Result<(), FsError> {
        let mut meta = self.meta.lock();
        if ctx.uid != Uid::ROOT && ctx.uid != meta.uid {
            return Err(FsError::PermissionDenied);
        }
        meta.mode = (meta.mode & S_IFMT) | (mode & !S_IFMT);
        Ok(())
    }

    fn chown(&self, ctx: &IoCtx, uid: Uid, gid: Gid) -> Result<(), FsError> {
        if ctx.uid != Uid::ROOT {
            return Err(FsError::PermissionDenied);
        }
        let mut meta = self.meta.lock();
        meta.uid = uid;
        meta.gid = gid;
        Ok(())
    }

    fn truncate(&self, _ctx: &IoCtx, length: u64) -> Result<(), FsError> {
        match self.kind {
            InodeType::Dir => Err(FsError::IsADirectory),
            InodeType::File => {
                let length = usize::try_from(length).map_err(|_| FsError::Overflow)?;
                self.data.lock().resize(length, 0);
                Ok(())
            }
            _ => Err(FsError::NotSupported),
        }
    }

    fn pread(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>, offset: u64) -> Result<usize, FsError> {
        if self.kind == InodeType::Dir {
            return Err(FsError::IsADirectory);
        }
        let data = self.data.lock();
        let offset = usize::try_from(offset).map_err(|_| FsError::Overflow)?;
        if offset >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - offset);
        let chunk = &data[offset..offset + count];
        ctx.copy_to_dest(buf, 0, chunk)?;
        Ok(count)
    }

    fn pwrite(&self, ctx: &IoCtx, buf: &SrcBuf<'_>, offset: u64) -> Result<usize, FsError> {
        if self.kind == InodeType::Dir {
            return Err(FsError::IsADirectory);
        }
        let offset = usize::try_from(offset).map_err(|_| FsError::Overflow)?;
        let mut chunk = alloc::vec![0u8; buf.len()];
        ctx.copy_from_src(&mut chunk, buf, 0)?;
        let mut data = self.data.lock();
        let end = offset.checked_add(chunk.len()).ok_or(FsError::Overflow)?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn open(
        &self,
        ctx: &IoCtx,
        name: &str,
        flags: u32,
        mode: u32,
    ) -> Result<Arc<dyn Inode>, FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        let mut children = self.children.lock();

        if let Some(child) = children.get(name) {
            if flags & (O_CREATE | O_EXCL) == O_CREATE | O_EXCL {
                return Err(FsError::Exists);
            }
            if flags & O_DIRECTORY != 0 && child.kind != InodeType::Dir {
                return Err(FsError::NotADirectory);
            }
            if flags & O_WRITE != 0 {
                child.check_access(ctx, 2)?;
            }
            if flags & O_TRUNC != 0 && child.kind == InodeType::File {
                child.data.lock().clear();
            }
            return Ok(child.clone() as Arc<dyn Inode>);
        }

        if flags & O_CREATE == 0 {
            return Err(FsError::NotFound);
        }
        if flags & O_DIRECTORY != 0 {
            return Err(FsError::NotFound);
        }
        self.check_access(ctx, 2)?;
        let node = RamInode::new(
            self.shared.clone(),
            self.shared.allocate_ino(),
            InodeType::File,
            mode,
        );
        children.insert(name.to_string(), node.clone());
        Ok(node as Arc<dyn Inode>)
    }

    fn mkdir(&self, ctx: &IoCtx, name: &str, mode: u32) -> Result<Arc<dyn Inode>, FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        self.check_access(ctx, 2)?;
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return Err(FsError::Exists);
        }
        let node = RamInode::new(
            self.shared.clone(),
            self.shared.allocate_ino(),
            InodeType::Dir,
            mode,
        );
        children.insert(name.to_string(), node.clone());
        Ok(node as Arc<dyn Inode>)
    }

    fn unlink(&self, ctx: &IoCtx, name: &str) -> Result<(), FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        self.check_access(ctx, 2)?;
        let mut children = self.children.lock();
        let child = children.get(name).ok_or(FsError::NotFound)?;
        if child.kind == InodeType::Dir {
            return Err(FsError::IsADirectory);
        }
        let child = children.remove(name).expect("entry vanished under lock");
        child.drop_link();
        Ok(())
    }

    fn rmdir(&self, ctx: &IoCtx, name: &str) -> Result<(), FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        self.check_access(ctx, 2)?;
        let mut children = self.children.lock();
        let child = children.get(name).ok_or(FsError::NotFound)?;
        if child.kind != InodeType::Dir {
            return Err(FsError::NotADirectory);
        }
        if !child.children.lock().is_empty() {
            return Err(FsError::NotEmpty);
        }
        let child = children.remove(name).expect("entry vanished under lock");
        child.drop_link();
        Ok(())
    }

    fn link(&self, ctx: &IoCtx, name: &str, target: &Arc<dyn Inode>) -> Result<(), FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        self.check_access(ctx, 2)?;
        if target.dev() != self.shared.dev {
            return Err(FsError::InvalidArgument);
        }
        if target.inode_type() == InodeType::Dir {
            return Err(FsError::IsADirectory);
        }
        // Resolve through our own index so we hold a RamInode, not just
        // the trait object.
        let node = {
            let index = self.shared.index.lock();
            index
                .get(&target.ino().get())
                .and_then(Weak::upgrade)
                .ok_or(FsError::NotFound)?
        };
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return Err(FsError::Exists);
        }
        node.links.refer();
        children.insert(name.to_string(), node);
        Ok(())
    }

    fn symlink(&self, ctx: &IoCtx, name: &str, target: &str) -> Result<(), FsError> {
        self.require_dir()?;
        Self::check_name(name)?;
        self.check_access(ctx, 2)?;
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return Err(FsError::Exists);
        }
        let node = RamInode::new(
            self.shared.clone(),
            self.shared.allocate_ino(),
            InodeType::Symlink,
            0o777,
        );
        *node.data.lock() = target.as_bytes().to_vec();
        children.insert(name.to_string(), node);
        Ok(())
    }

    fn readlink(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        if self.kind != InodeType::Symlink {
            return Err(FsError::InvalidArgument);
        }
        let data = self.data.lock();
        let count = buf.len().min(data.len());
        ctx.copy_to_dest(buf, 0, &data[..count])?;
        Ok(count)
    }

    fn readdir(&self, _ctx: &IoCtx) -> Result<Vec<DirEntry>, FsError> {
        self.require_dir()?;
        let children = self.children.lock();
        Ok(children
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                ino: node.ino,
                dt: mode_to_dt(node.meta.lock().mode),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muon_syscall::fcntl::O_READ;
    use muon_syscall::stat::DT_DIR;

    fn ctx() -> IoCtx {
        IoCtx::kernel(Uid::ROOT, Gid::ROOT)
    }

    fn user_ctx(uid: u32) -> IoCtx {
        IoCtx::kernel(Uid::new(uid), Gid::new(uid))
    }

    #[test]
    fn create_write_read_back() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        let file = fs
            .root()
            .open(&ctx, "hello", O_READ | O_WRITE | O_CREATE, 0o644)
            .unwrap();
        assert_eq!(file.pwrite(&ctx, &SrcBuf::Kernel(b"a\nb"), 0).unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(
            file.pread(&ctx, &mut DstBuf::Kernel(&mut buf), 0).unwrap(),
            3
        );
        assert_eq!(&buf[..3], b"a\nb");
    }

    #[test]
    fn exclusive_create_fails_on_existing() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        fs.root().open(&ctx, "f", O_CREATE, 0o644).unwrap();
        assert_eq!(
            fs.root()
                .open(&ctx, "f", O_CREATE | O_EXCL, 0o644)
                .map(|_| ()),
            Err(FsError::Exists)
        );
    }

    #[test]
    fn mkdir_and_readdir() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        fs.root().mkdir(&ctx, "bin", 0o755).unwrap();
        fs.root().open(&ctx, "note", O_CREATE, 0o600).unwrap();
        let entries = fs.root().readdir(&ctx).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["bin", "note"]);
        assert_eq!(entries[0].dt, DT_DIR);
    }

    #[test]
    fn unlink_removes_and_last_link_deindexes() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        let file = fs.root().open(&ctx, "f", O_CREATE, 0o644).unwrap();
        let ino = file.ino();
        assert!(fs.inode_by_number(ino).is_some());

        fs.root().link(&ctx, "g", &file).unwrap();
        fs.root().unlink(&ctx, "f").unwrap();
        // Still linked as "g".
        assert!(fs.inode_by_number(ino).is_some());
        fs.root().unlink(&ctx, "g").unwrap();
        assert!(fs.inode_by_number(ino).is_none());
    }

    #[test]
    fn rmdir_requires_empty() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        let dir = fs.root().mkdir(&ctx, "d", 0o755).unwrap();
        dir.open(&ctx, "f", O_CREATE, 0o644).unwrap();
        assert_eq!(fs.root().rmdir(&ctx, "d"), Err(FsError::NotEmpty));
        dir.unlink(&ctx, "f").unwrap();
        fs.root().rmdir(&ctx, "d").unwrap();
        assert_eq!(fs.root().readdir(&ctx).unwrap().len(), 0);
    }

    #[test]
    fn symlink_round_trip() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        fs.root().symlink(&ctx, "l", "/bin/true").unwrap();
        let link = fs.root().open(&ctx, "l", 0, 0).unwrap();
        assert_eq!(link.inode_type(), InodeType::Symlink);
        let mut buf = [0u8; 32];
        let n = link.readlink(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap();
        assert_eq!(&buf[..n], b"/bin/true");
    }

    #[test]
    fn permission_denied_for_other_users() {
        let fs = RamFs::new(Dev::new(1));
        let root_ctx = ctx();
        let file = fs
            .root()
            .open(&root_ctx, "secret", O_CREATE, 0o600)
            .unwrap();
        let other = user_ctx(1000);
        assert_eq!(
            fs.root().open(&other, "secret", O_WRITE, 0).map(|_| ()),
            Err(FsError::PermissionDenied)
        );
        // Mode change by a non-owner fails too.
        assert_eq!(file.chmod(&other, 0o666), Err(FsError::PermissionDenied));
    }

    #[test]
    fn truncate_extends_and_shrinks() {
        let fs = RamFs::new(Dev::new(1));
        let ctx = ctx();
        let file = fs.root().open(&ctx, "f", O_CREATE, 0o644).unwrap();
        file.pwrite(&ctx, &SrcBuf::Kernel(b"abcdef"), 0).unwrap();
        file.truncate(&ctx, 2).unwrap();
        assert_eq!(file.size(), 2);
        file.truncate(&ctx, 4).unwrap();
        let mut buf = [0u8; 4];
        file.pread(&ctx, &mut DstBuf::Kernel(&mut buf), 0).unwrap();
        assert_eq!(&buf, b"ab\0\0");
    }
}
