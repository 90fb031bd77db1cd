//! The mount table.
//!
//! A mount point is the triple (host inode number, host device, mounted
//! root inode). Path resolution consults the table after every directory
//! step: when the reached directory's `(dev, ino)` matches an entry, the
//! walk continues from the mounted root instead. Mount points are only
//! ever roots of attached filesystems, so redirection cannot cycle.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::{Dev, Ino};
use muon_core::sync::SpinLock;

use crate::inode::Inode;
use crate::FsError;

/// One mounted filesystem.
pub struct MountPoint {
    /// Inode number of the covered directory.
    pub ino: Ino,
    /// Device of the covered directory.
    pub dev: Dev,
    /// Root inode of the mounted filesystem.
    pub root: Arc<dyn Inode>,
}

/// The set of mount points, shared by reference between processes.
pub struct MountTable {
    mounts: SpinLock<Vec<MountPoint>>,
}

impl MountTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            mounts: SpinLock::new(Vec::new()),
        }
    }

    /// Attaches `root` over the directory identified by `(dev, ino)`.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::Busy`] when something is already mounted
    /// there.
    pub fn add_mount(&self, ino: Ino, dev: Dev, root: Arc<dyn Inode>) -> Result<(), FsError> {
        let mut mounts = self.mounts.lock();
        if mounts.iter().any(|mp| mp.ino == ino && mp.dev == dev) {
            return Err(FsError::Busy);
        }
        mounts.push(MountPoint { ino, dev, root });
        Ok(())
    }

    /// The mounted root covering `(dev, ino)`, if any.
    pub fn lookup(&self, dev: Dev, ino: Ino) -> Option<Arc<dyn Inode>> {
        let mounts = self.mounts.lock();
        mounts
            .iter()
            .find(|mp| mp.dev == dev && mp.ino == ino)
            .map(|mp| mp.root.clone())
    }

    /// Follows mount redirections from `inode` to the effective inode.
    pub fn redirect(&self, inode: Arc<dyn Inode>) -> Arc<dyn Inode> {
        let mut current = inode;
        while let Some(root) = self.lookup(current.dev(), current.ino()) {
            // A filesystem cannot be mounted on its own root, so each
            // step reaches a new (dev, ino).
            if root.dev() == current.dev() && root.ino() == current.ino() {
                break;
            }
            current = root;
        }
        current
    }

    /// Clones the table for a new process family.
    pub fn fork(&self) -> Arc<Self> {
        let mounts = self.mounts.lock();
        let clone: Vec<MountPoint> = mounts
            .iter()
            .map(|mp| MountPoint {
                ino: mp.ino,
                dev: mp.dev,
                root: mp.root.clone(),
            })
            .collect();
        Arc::new(Self {
            mounts: SpinLock::new(clone),
        })
    }

    /// Number of mounts.
    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }

    /// Whether no filesystem is mounted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;

    #[test]
    fn lookup_finds_mounted_root() {
        let host = RamFs::new(Dev::new(1));
        let guest = RamFs::new(Dev::new(2));
        let table = MountTable::new();

        let host_root = host.root();
        table
            .add_mount(host_root.ino(), host_root.dev(), guest.root())
            .unwrap();

        let redirected = table.redirect(host.root());
        assert_eq!(redirected.dev(), Dev::new(2));
    }

    #[test]
    fn double_mount_is_busy() {
        let host = RamFs::new(Dev::new(1));
        let guest = RamFs::new(Dev::new(2));
        let table = MountTable::new();
        let root = host.root();
        table.add_mount(root.ino(), root.dev(), guest.root()).unwrap();
        assert_eq!(
            table.add_mount(root.ino(), root.dev(), guest.root()),
            Err(FsError::Busy)
        );
    }

    #[test]
    fn fork_snapshots_the_table() {
        let host = RamFs::new(Dev::new(1));
        let guest = RamFs::new(Dev::new(2));
        let table = MountTable::new();
        let root = host.root();
        table.add_mount(root.ino(), root.dev(), guest.root()).unwrap();

        let forked = table.fork();
        assert_eq!(forked.len(), 1);
        assert!(forked.lookup(root.dev(), root.ino()).is_some());
    }
}
