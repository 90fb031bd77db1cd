//! Memory protection and mapping flags.
//!
//! The low protection bits match POSIX `PROT_*`; the high bits are
//! kernel-extended: kernel-side access is controlled independently of user
//! access, and `PROT_FORK` selects whether a segment is copied or shared
//! into a forked child.

/// No access.
pub const PROT_NONE: u32 = 0;
/// User-mode read.
pub const PROT_READ: u32 = 1 << 0;
/// User-mode write.
pub const PROT_WRITE: u32 = 1 << 1;
/// User-mode execute.
pub const PROT_EXEC: u32 = 1 << 2;
/// Kernel-mode read.
pub const PROT_KREAD: u32 = 1 << 3;
/// Kernel-mode write.
pub const PROT_KWRITE: u32 = 1 << 4;
/// Copy this segment into forked children (clear = share).
pub const PROT_FORK: u32 = 1 << 5;

/// Protections a userspace caller may request directly.
pub const PROT_USER_MASK: u32 = PROT_READ | PROT_WRITE | PROT_EXEC;

/// Changes are private to the mapping.
pub const MAP_PRIVATE: u32 = 1 << 0;
/// Changes are shared with other mappings of the object.
pub const MAP_SHARED: u32 = 1 << 1;
/// Place the mapping exactly at the requested address.
pub const MAP_FIXED: u32 = 1 << 2;
/// The mapping is not backed by a file.
pub const MAP_ANONYMOUS: u32 = 1 << 3;

/// `mmap` failure return at the ABI level.
pub const MAP_FAILED: usize = usize::MAX;
