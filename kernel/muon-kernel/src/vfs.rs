//! Path resolution against a process's root, cwd, and mount table.
//!
//! Resolution walks one component at a time. After every step the reached
//! inode's `(dev, ino)` is checked against the mount table and redirected
//! to the mounted root on a hit. Symbolic links are followed up to the
//! depth limit; `..` walks the ancestry collected during this resolution.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_fs::inode::InodeType;
use muon_fs::path::{
    components, is_absolute, requires_directory, split_final_elem, trim_trailing_slashes,
};
use muon_fs::{DstBuf, FsError, Inode, IoCtx, MountTable};

use crate::config::SYMLINK_DEPTH_MAX;
use crate::kernel::Kernel;
use crate::proc::Process;

/// Longest accepted symlink target.
const SYMLINK_TARGET_MAX: usize = 4096;

/// Outcome of [`resolve_parent`]: the directory, the final name, and
/// whether a trailing slash demands a directory.
pub struct ResolvedParent {
    /// The containing directory.
    pub dir: Arc<dyn Inode>,
    /// The final path element, slashes trimmed.
    pub name: String,
    /// Whether the path's trailing slash requires the target to be a
    /// directory.
    pub must_be_dir: bool,
}

/// Resolves `path` to an inode.
///
/// Absolute paths start at the process root, relative ones at the cwd.
///
/// # Errors
///
/// The usual resolution failures: `NotFound`, `NotADirectory`,
/// `SymlinkLoop`, permission errors from `open`.
pub fn resolve(kernel: &Kernel, process: &Process, path: &str) -> Result<Arc<dyn Inode>, FsError> {
    let ctx = kernel.kernel_ctx(process);
    let mounts = process.mounts.lock().clone();
    let stack = starting_stack(kernel, process, &mounts, path)?;
    let stack = walk(&ctx, &mounts, stack, path, 0)?;
    let inode = stack.last().cloned().expect("walk keeps a root");

    // A trailing slash requires a directory.
    let (_, final_elem) = split_final_elem(path);
    if requires_directory(final_elem) && inode.inode_type() != InodeType::Dir {
        return Err(FsError::NotADirectory);
    }
    Ok(inode)
}

/// Resolves everything but the final element.
///
/// # Errors
///
/// `InvalidArgument` when the final element is empty, `.` or `..`;
/// resolution errors for the directory part.
pub fn resolve_parent(
    kernel: &Kernel,
    process: &Process,
    path: &str,
) -> Result<ResolvedParent, FsError> {
    let (dir_part, final_part) = split_final_elem(path);
    let name = trim_trailing_slashes(final_part);
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument);
    }
    let search = if dir_part.is_empty() { "." } else { dir_part };
    let dir = resolve(kernel, process, search)?;
    if dir.inode_type() != InodeType::Dir {
        return Err(FsError::NotADirectory);
    }
    Ok(ResolvedParent {
        dir,
        name: name.to_string(),
        must_be_dir: requires_directory(final_part),
    })
}

/// The ancestry stack a walk starts from: `[root]`, plus the cwd for
/// relative paths.
fn starting_stack(
    kernel: &Kernel,
    process: &Process,
    mounts: &Arc<MountTable>,
    path: &str,
) -> Result<Vec<Arc<dyn Inode>>, FsError> {
    let root = process
        .root
        .lock()
        .clone()
        .or_else(|| kernel.root_inode())
        .ok_or(FsError::NotFound)?;
    let mut stack = alloc::vec![mounts.redirect(root)];
    if !is_absolute(path) {
        let cwd = process.cwd.lock().clone().ok_or(FsError::NotFound)?;
        stack.push(mounts.redirect(cwd.inode().clone()));
    }
    Ok(stack)
}

/// Walks `path` from `stack`, returning the extended ancestry.
fn walk(
    ctx: &IoCtx,
    mounts: &Arc<MountTable>,
    mut stack: Vec<Arc<dyn Inode>>,
    path: &str,
    depth: usize,
) -> Result<Vec<Arc<dyn Inode>>, FsError> {
    if depth > SYMLINK_DEPTH_MAX {
        return Err(FsError::SymlinkLoop);
    }
    for component in components(path) {
        match component {
            "." => {}
            ".." => {
                // The root is its own parent.
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            name => {
                let current = stack.last().cloned().expect("walk keeps a root");
                let child = current.open(ctx, name, 0, 0)?;
                let child = mounts.redirect(child);
                if child.inode_type() == InodeType::Symlink {
                    let target = read_link_target(ctx, &child)?;
                    stack = if is_absolute(&target) {
                        let root = stack.first().cloned().expect("walk keeps a root");
                        walk(ctx, mounts, alloc::vec![root], &target, depth + 1)?
                    } else {
                        walk(ctx, mounts, stack, &target, depth + 1)?
                    };
                } else {
                    stack.push(child);
                }
            }
        }
    }
    Ok(stack)
}

fn read_link_target(ctx: &IoCtx, link: &Arc<dyn Inode>) -> Result<String, FsError> {
    let mut buf = alloc::vec![0u8; SYMLINK_TARGET_MAX];
    let len = link.readlink(ctx, &mut DstBuf::Kernel(&mut buf))?;
    buf.truncate(len);
    String::from_utf8(buf).map_err(|_| FsError::InvalidArgument)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::ModelMmu;
    use muon_core::id::Dev;
    use muon_fs::ramfs::RamFs;
    use muon_syscall::fcntl::O_CREATE;

    fn fixture() -> (Arc<Kernel>, Arc<Process>) {
        let kernel = Kernel::new(Arc::new(ModelMmu::new()));
        let fs = RamFs::new(Dev::new(1));
        let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);
        let bin = fs.root().mkdir(&ctx, "bin", 0o755).unwrap();
        bin.open(&ctx, "true", O_CREATE, 0o755).unwrap();
        fs.root().symlink(&ctx, "link", "/bin/true").unwrap();
        fs.root().symlink(&ctx, "rel", "bin").unwrap();
        kernel.set_root(fs.root());
        let (process, _tid) = kernel.spawn_init();
        (kernel, process)
    }

    #[test]
    fn absolute_resolution() {
        let (kernel, process) = fixture();
        let inode = resolve(&kernel, &process, "/bin/true").unwrap();
        assert_eq!(inode.inode_type(), InodeType::File);
    }

    #[test]
    fn relative_resolution_from_cwd() {
        let (kernel, process) = fixture();
        let inode = resolve(&kernel, &process, "bin/true").unwrap();
        assert_eq!(inode.inode_type(), InodeType::File);
    }

    #[test]
    fn dot_and_dotdot() {
        let (kernel, process) = fixture();
        let inode = resolve(&kernel, &process, "/bin/./../bin/true").unwrap();
        assert_eq!(inode.inode_type(), InodeType::File);
        // `..` at the root stays at the root.
        let root = resolve(&kernel, &process, "/../..").unwrap();
        assert_eq!(root.inode_type(), InodeType::Dir);
    }

    #[test]
    fn symlinks_follow_absolute_and_relative() {
        let (kernel, process) = fixture();
        assert_eq!(
            resolve(&kernel, &process, "/link").unwrap().inode_type(),
            InodeType::File
        );
        assert_eq!(
            resolve(&kernel, &process, "/rel/true").unwrap().inode_type(),
            InodeType::File
        );
    }

    #[test]
    fn symlink_loops_are_detected() {
        let (kernel, process) = fixture();
        let ctx = kernel.kernel_ctx(&process);
        let root = kernel.root_inode().unwrap();
        root.symlink(&ctx, "a", "/b").unwrap();
        root.symlink(&ctx, "b", "/a").unwrap();
        assert_eq!(
            resolve(&kernel, &process, "/a").map(|_| ()),
            Err(FsError::SymlinkLoop)
        );
    }

    #[test]
    fn trailing_slash_requires_directory() {
        let (kernel, process) = fixture();
        assert_eq!(
            resolve(&kernel, &process, "/bin/true/").map(|_| ()),
            Err(FsError::NotADirectory)
        );
        assert!(resolve(&kernel, &process, "/bin/").is_ok());
    }

    #[test]
    fn parent_resolution_splits_correctly() {
        let (kernel, process) = fixture();
        let parent = resolve_parent(&kernel, &process, "/bin/newfile").unwrap();
        assert_eq!(parent.name, "newfile");
        assert!(!parent.must_be_dir);
        let parent = resolve_parent(&kernel, &process, "/bin/sub///").unwrap();
        assert_eq!(parent.name, "sub");
        assert!(parent.must_be_dir);
    }

    #[test]
    fn mount_redirection_on_lookup() {
        let (kernel, process) = fixture();
        let other = RamFs::new(Dev::new(2));
        let ctx = IoCtx::kernel(muon_core::id::Uid::ROOT, muon_core::id::Gid::ROOT);
        other.root().open(&ctx, "guest", O_CREATE, 0o644).unwrap();

        let mountpoint = resolve(&kernel, &process, "/bin").unwrap();
        let mounts = process.mounts.lock().clone();
        mounts
            .add_mount(mountpoint.ino(), mountpoint.dev(), other.root())
            .unwrap();

        let inode = resolve(&kernel, &process, "/bin/guest").unwrap();
        assert_eq!(inode.dev(), Dev::new(2));
    }
}
