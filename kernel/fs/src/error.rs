//! Filesystem error type.

use muon_syscall::errno;

/// Errors produced by the VFS layer and inode implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The caller lacks permission.
    PermissionDenied,
    /// No such file or directory.
    NotFound,
    /// The entry already exists.
    Exists,
    /// Directory operation on a non-directory.
    NotADirectory,
    /// Non-directory operation on a directory.
    IsADirectory,
    /// The directory still has entries.
    NotEmpty,
    /// Malformed argument.
    InvalidArgument,
    /// The descriptor is not open or lacks the required capability.
    BadDescriptor,
    /// A user-space address failed validation.
    BadAddress,
    /// Allocation failed.
    OutOfMemory,
    /// A per-process resource limit was reached.
    LimitReached,
    /// The operation would block (reported under `O_NONBLOCK`).
    WouldBlock,
    /// The operation was interrupted by a signal.
    Interrupted,
    /// Device-level I/O failure.
    Io,
    /// Writing to a pipe whose read end is gone.
    PipeClosed,
    /// The inode does not support the operation.
    NotSupported,
    /// A timed wait expired.
    TimedOut,
    /// A value does not fit the requested representation.
    Overflow,
    /// A path component exceeds the name length limit.
    NameTooLong,
    /// Symbolic link resolution exceeded the depth limit.
    SymlinkLoop,
    /// Socket operation on a non-socket.
    NotASocket,
    /// ioctl on an inode with no device control interface.
    NotATerminal,
    /// Seek on a non-seekable inode.
    IllegalSeek,
    /// The object is busy (e.g. already mounted on).
    Busy,
}

impl FsError {
    /// Maps the error to its errno value.
    pub const fn to_errno(self) -> i32 {
        match self {
            Self::PermissionDenied => errno::EACCES,
            Self::NotFound => errno::ENOENT,
            Self::Exists => errno::EEXIST,
            Self::NotADirectory => errno::ENOTDIR,
            Self::IsADirectory => errno::EISDIR,
            Self::NotEmpty => errno::ENOTEMPTY,
            Self::InvalidArgument => errno::EINVAL,
            Self::BadDescriptor => errno::EBADF,
            Self::BadAddress => errno::EFAULT,
            Self::OutOfMemory => errno::ENOMEM,
            Self::LimitReached => errno::EMFILE,
            Self::WouldBlock => errno::EAGAIN,
            Self::Interrupted => errno::EINTR,
            Self::Io => errno::EIO,
            Self::PipeClosed => errno::EPIPE,
            Self::NotSupported => errno::ENOTSUP,
            Self::TimedOut => errno::ETIMEDOUT,
            Self::Overflow => errno::EOVERFLOW,
            Self::NameTooLong => errno::ENAMETOOLONG,
            Self::SymlinkLoop => errno::ELOOP,
            Self::NotASocket => errno::ENOTSOCK,
            Self::NotATerminal => errno::ENOTTY,
            Self::IllegalSeek => errno::ESPIPE,
            Self::Busy => errno::EBUSY,
        }
    }

    /// Negated errno for the syscall return convention.
    pub const fn as_neg(self) -> isize {
        -(self.to_errno() as isize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_spot_checks() {
        assert_eq!(FsError::NotFound.to_errno(), errno::ENOENT);
        assert_eq!(FsError::PipeClosed.to_errno(), errno::EPIPE);
        assert_eq!(FsError::WouldBlock.as_neg(), -(errno::EAGAIN as isize));
    }
}
