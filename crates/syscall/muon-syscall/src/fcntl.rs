//! Open flags, descriptor flags, fcntl commands, and seek whences.
//!
//! Open flags are independent bits (read and write are separate flags, not
//! an access-mode field), so the kernel can test capabilities with plain
//! masks.

/// Open for reading.
pub const O_READ: u32 = 1 << 0;
/// Open for writing.
pub const O_WRITE: u32 = 1 << 1;
/// Open for execution (image loading).
pub const O_EXEC: u32 = 1 << 2;
/// All writes append to the end.
pub const O_APPEND: u32 = 1 << 3;
/// Never block; would-block operations fail with EAGAIN.
pub const O_NONBLOCK: u32 = 1 << 4;
/// Create the file if it does not exist.
pub const O_CREATE: u32 = 1 << 5;
/// Truncate to zero length on open.
pub const O_TRUNC: u32 = 1 << 6;
/// With `O_CREATE`, fail if the file exists.
pub const O_EXCL: u32 = 1 << 7;
/// Fail unless the path names a directory.
pub const O_DIRECTORY: u32 = 1 << 8;
/// Set close-on-exec on the new descriptor slot.
pub const O_CLOEXEC: u32 = 1 << 9;
/// Set close-on-fork on the new descriptor slot.
pub const O_CLOFORK: u32 = 1 << 10;

/// Mask of flags stored on the descriptor (as opposed to the table slot).
pub const O_DESCRIPTOR_FLAGS: u32 =
    O_READ | O_WRITE | O_EXEC | O_APPEND | O_NONBLOCK;

// ── Descriptor-table slot flags ─────────────────────────────────────

/// Close the slot on `execve`.
pub const FD_CLOEXEC: i32 = 1 << 0;
/// Omit the slot when forking the table.
pub const FD_CLOFORK: i32 = 1 << 1;

// ── fcntl commands ──────────────────────────────────────────────────

/// Duplicate the descriptor to the lowest free slot at or above `arg`.
pub const F_DUPFD: i32 = 0;
/// Get the slot flags.
pub const F_GETFD: i32 = 1;
/// Set the slot flags.
pub const F_SETFD: i32 = 2;
/// Get the descriptor status flags.
pub const F_GETFL: i32 = 3;
/// Set the descriptor status flags (append/nonblock only).
pub const F_SETFL: i32 = 4;

// ── lseek whences ───────────────────────────────────────────────────

/// Seek from the start of the file.
pub const SEEK_SET: i32 = 0;
/// Seek from the current offset.
pub const SEEK_CUR: i32 = 1;
/// Seek from the end of the file.
pub const SEEK_END: i32 = 2;

// ── accept4 flags ───────────────────────────────────────────────────

/// `accept4`: set close-on-exec on the accepted descriptor.
pub const SOCK_CLOEXEC: u32 = O_CLOEXEC;
/// `accept4`: set nonblocking on the accepted descriptor.
pub const SOCK_NONBLOCK: u32 = O_NONBLOCK;
