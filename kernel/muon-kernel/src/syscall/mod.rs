//! Syscall dispatch.
//!
//! One fixed-size function table indexed by the syscall number; an
//! out-of-range number lands in the bad-syscall stub. Handlers receive the
//! raw register arguments and narrow them themselves. User pointers cross
//! only through the calling process's validated [`IoCtx`]; the helpers on
//! [`SyscallCtx`] wrap the common shapes (integers, timespecs, strings,
//! string arrays).
//!
//! Failures are negated errnos; a handler that must sleep returns
//! [`SysError::Block`] with the condition to wait on and the kernel parks
//! the thread and re-issues the call on wakeup.

extern crate alloc;

mod identity;
mod io;
mod memory;
mod misc;
mod process;
mod sig;
mod time;
mod vfs_ops;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::Tid;
use muon_core::kwarn;
use muon_core::sync::WakeCondition;
use muon_fs::{Descriptor, FsError, IoCtx, SrcBuf};
use muon_syscall::errno::{EFAULT, ENAMETOOLONG, ENOSYS, ESRCH};
use muon_syscall::number::{self, SYSCALL_MAX};
use muon_syscall::time::{Itimerspec, Timespec};

use crate::kernel::Kernel;
use crate::proc::Process;

/// How a syscall fails: an errno, or a park-and-retry.
#[derive(Clone)]
pub enum SysError {
    /// Fail with this errno (returned negated).
    Errno(i32),
    /// Park the thread on this condition and re-issue the call.
    Block(Arc<WakeCondition>),
}

impl core::fmt::Debug for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Errno(errno) => write!(f, "Errno({errno})"),
            Self::Block(_) => write!(f, "Block(..)"),
        }
    }
}

impl From<FsError> for SysError {
    fn from(error: FsError) -> Self {
        Self::Errno(error.to_errno())
    }
}

/// Handler result: a return value or a [`SysError`].
pub type SysResult = Result<isize, SysError>;

/// One syscall handler.
pub type SyscallFn = fn(&SyscallCtx<'_>, [usize; 6]) -> SysResult;

/// Per-call context handed to every handler.
pub struct SyscallCtx<'a> {
    /// The kernel instance.
    pub kernel: &'a Arc<Kernel>,
    /// The calling thread.
    pub tid: Tid,
    /// The calling process.
    pub process: Arc<Process>,
}

/// Longest accepted NUL-terminated user string (paths, kernelinfo keys).
const STRING_MAX: usize = 4096;

/// Most entries accepted in an argv/envp array.
const STRING_ARRAY_MAX: usize = 1024;

impl SyscallCtx<'_> {
    /// A user-domain I/O context for this call.
    pub fn user_ctx(&self) -> IoCtx {
        self.kernel.user_ctx(&self.process)
    }

    /// Stores an errno without failing the call (odd ABI corners only).
    pub fn set_errno(&self, errno: i32) {
        self.kernel.threads.with(self.tid, |t| t.errno = errno);
    }

    /// Reads `len` bytes of user memory.
    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>, SysError> {
        let mut data = alloc::vec![0u8; len];
        self.user_ctx()
            .copy_from_src(&mut data, &SrcBuf::User(addr, len), 0)?;
        Ok(data)
    }

    /// Writes bytes to user memory.
    pub fn write_bytes(&self, addr: usize, data: &[u8]) -> Result<(), SysError> {
        let mut dst = muon_fs::DstBuf::User(addr, data.len());
        self.user_ctx().copy_to_dest(&mut dst, 0, data)?;
        Ok(())
    }

    /// Reads one machine word.
    pub fn read_usize(&self, addr: usize) -> Result<usize, SysError> {
        let bytes = self.read_bytes(addr, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw) as usize)
    }

    /// Writes one machine word.
    pub fn write_usize(&self, addr: usize, value: usize) -> Result<(), SysError> {
        self.write_bytes(addr, &(value as u64).to_le_bytes())
    }

    /// Writes one `i32`.
    pub fn write_i32(&self, addr: usize, value: i32) -> Result<(), SysError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Reads a `timespec`.
    pub fn read_timespec(&self, addr: usize) -> Result<Timespec, SysError> {
        let bytes = self.read_bytes(addr, 16)?;
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 8];
        sec.copy_from_slice(&bytes[..8]);
        nsec.copy_from_slice(&bytes[8..]);
        Ok(Timespec {
            tv_sec: i64::from_le_bytes(sec),
            tv_nsec: i64::from_le_bytes(nsec),
        })
    }

    /// Writes a `timespec`.
    pub fn write_timespec(&self, addr: usize, value: Timespec) -> Result<(), SysError> {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&value.tv_sec.to_le_bytes());
        bytes[8..].copy_from_slice(&value.tv_nsec.to_le_bytes());
        self.write_bytes(addr, &bytes)
    }

    /// Reads an `itimerspec`.
    pub fn read_itimerspec(&self, addr: usize) -> Result<Itimerspec, SysError> {
        Ok(Itimerspec {
            it_interval: self.read_timespec(addr)?,
            it_value: self.read_timespec(addr + 16)?,
        })
    }

    /// Writes an `itimerspec`.
    pub fn write_itimerspec(&self, addr: usize, value: Itimerspec) -> Result<(), SysError> {
        self.write_timespec(addr, value.it_interval)?;
        self.write_timespec(addr + 16, value.it_value)
    }

    /// Reads a NUL-terminated user string.
    pub fn read_cstring(&self, addr: usize) -> Result<String, SysError> {
        let mut collected = Vec::new();
        let mut cursor = addr;
        loop {
            if collected.len() >= STRING_MAX {
                return Err(SysError::Errno(ENAMETOOLONG));
            }
            let chunk = self.read_bytes(cursor, 32)
                .or_else(|_| self.read_bytes(cursor, 1))?;
            match chunk.iter().position(|b| *b == 0) {
                Some(nul) => {
                    collected.extend_from_slice(&chunk[..nul]);
                    break;
                }
                None => {
                    cursor += chunk.len();
                    collected.extend_from_slice(&chunk);
                }
            }
        }
        String::from_utf8(collected).map_err(|_| SysError::Errno(EFAULT))
    }

    /// Reads a NULL-terminated array of string pointers (argv/envp).
    pub fn read_string_array(&self, addr: usize) -> Result<Vec<String>, SysError> {
        if addr == 0 {
            return Ok(Vec::new());
        }
        let mut strings = Vec::new();
        for index in 0..STRING_ARRAY_MAX {
            let ptr = self.read_usize(addr + index * 8)?;
            if ptr == 0 {
                return Ok(strings);
            }
            strings.push(self.read_cstring(ptr)?);
        }
        Err(SysError::Errno(muon_syscall::errno::E2BIG))
    }

    /// The descriptor at a raw fd argument.
    pub fn desc(&self, fd: usize) -> Result<Arc<Descriptor>, SysError> {
        let dtable = self.process.dtable.lock().clone();
        dtable
            .get(fd as i32)
            .ok_or(SysError::Errno(muon_syscall::errno::EBADF))
    }
}

/// The bad-syscall stub: logs and fails with `ENOSYS`.
fn sys_bad(ctx: &SyscallCtx<'_>, _args: [usize; 6]) -> SysResult {
    kwarn!("pid {}: bad system call", ctx.process.pid);
    Err(SysError::Errno(ENOSYS))
}

const fn build_table() -> [SyscallFn; SYSCALL_MAX] {
    let mut table: [SyscallFn; SYSCALL_MAX] = [sys_bad; SYSCALL_MAX];
    table[number::SYS_EXIT_THREAD] = process::sys_exit_thread;
    table[number::SYS_FORK] = process::sys_fork;
    table[number::SYS_EXECVE] = process::sys_execve;
    table[number::SYS_WAITPID] = process::sys_waitpid;
    table[number::SYS_WAIT] = process::sys_wait;
    table[number::SYS_KILL] = process::sys_kill;
    table[number::SYS_RAISE] = process::sys_raise;
    table[number::SYS_GETPID] = process::sys_getpid;
    table[number::SYS_GETPPID] = process::sys_getppid;
    table[number::SYS_SETPGID] = process::sys_setpgid;
    table[number::SYS_GETPGID] = process::sys_getpgid;
    table[number::SYS_SETSID] = process::sys_setsid;
    table[number::SYS_GETSID] = process::sys_getsid;
    table[number::SYS_PRLIMIT] = process::sys_prlimit;
    table[number::SYS_GETRUSAGE] = process::sys_getrusage;
    table[number::SYS_ABORT_PROCESS] = process::sys_abort_process;

    table[number::SYS_SIGACTION] = sig::sys_sigaction;
    table[number::SYS_SIGPROCMASK] = sig::sys_sigprocmask;
    table[number::SYS_SIGPENDING] = sig::sys_sigpending;
    table[number::SYS_SIGRETURN] = sig::sys_sigreturn;

    table[number::SYS_READ] = io::sys_read;
    table[number::SYS_WRITE] = io::sys_write;
    table[number::SYS_PREAD] = io::sys_pread;
    table[number::SYS_PWRITE] = io::sys_pwrite;
    table[number::SYS_CLOSE] = io::sys_close;
    table[number::SYS_LSEEK] = io::sys_lseek;
    table[number::SYS_DUP] = io::sys_dup;
    table[number::SYS_DUP2] = io::sys_dup2;
    table[number::SYS_PIPE] = io::sys_pipe;
    table[number::SYS_FCNTL] = io::sys_fcntl;
    table[number::SYS_IOCTL] = io::sys_ioctl;
    table[number::SYS_CLOSEFROM] = io::sys_closefrom;
    table[number::SYS_ACCEPT4] = io::sys_accept4;
    table[number::SYS_PPOLL] = io::sys_ppoll;

    table[number::SYS_OPEN] = vfs_ops::sys_open;
    table[number::SYS_MKDIR] = vfs_ops::sys_mkdir;
    table[number::SYS_RMDIR] = vfs_ops::sys_rmdir;
    table[number::SYS_UNLINK] = vfs_ops::sys_unlink;
    table[number::SYS_LINK] = vfs_ops::sys_link;
    table[number::SYS_SYMLINK] = vfs_ops::sys_symlink;
    table[number::SYS_READLINK] = vfs_ops::sys_readlink;
    table[number::SYS_TRUNCATE] = vfs_ops::sys_truncate;
    table[number::SYS_FTRUNCATE] = vfs_ops::sys_ftruncate;
    table[number::SYS_STAT] = vfs_ops::sys_stat;
    table[number::SYS_FSTAT] = vfs_ops::sys_fstat;
    table[number::SYS_CHMOD] = vfs_ops::sys_chmod;
    table[number::SYS_CHOWN] = vfs_ops::sys_chown;
    table[number::SYS_CHDIR] = vfs_ops::sys_chdir;
    table[number::SYS_FCHDIR] = vfs_ops::sys_fchdir;

    table[number::SYS_MMAP_WRAPPER] = memory::sys_mmap_wrapper;
    table[number::SYS_MPROTECT] = memory::sys_mprotect;
    table[number::SYS_MUNMAP] = memory::sys_munmap;

    table[number::SYS_CLOCK_GETTIME] = time::sys_clock_gettime;
    table[number::SYS_CLOCK_SETTIME] = time::sys_clock_settime;
    table[number::SYS_CLOCK_NANOSLEEP] = time::sys_clock_nanosleep;
    table[number::SYS_ALARMNS] = time::sys_alarmns;
    table[number::SYS_TIMER_CREATE] = time::sys_timer_create;
    table[number::SYS_TIMER_SETTIME] = time::sys_timer_settime;
    table[number::SYS_TIMER_GETTIME] = time::sys_timer_gettime;
    table[number::SYS_TIMER_DELETE] = time::sys_timer_delete;

    table[number::SYS_SETUID] = identity::sys_setuid;
    table[number::SYS_GETUID] = identity::sys_getuid;
    table[number::SYS_SETGID] = identity::sys_setgid;
    table[number::SYS_GETGID] = identity::sys_getgid;
    table[number::SYS_GETEUID] = identity::sys_geteuid;
    table[number::SYS_GETEGID] = identity::sys_getegid;

    table[number::SYS_KERNELINFO] = misc::sys_kernelinfo;
    table[number::SYS_GETENTROPY] = misc::sys_getentropy;
    table
}

/// The dispatch table. Index is the syscall number.
static TABLE: [SyscallFn; SYSCALL_MAX] = build_table();

/// Routes one syscall to its handler.
pub fn dispatch(kernel: &Arc<Kernel>, tid: Tid, nr: usize, args: [usize; 6]) -> SysResult {
    let process = kernel
        .process_of(tid)
        .ok_or(SysError::Errno(ESRCH))?;
    let ctx = SyscallCtx {
        kernel,
        tid,
        process,
    };
    let handler = TABLE.get(nr).copied().unwrap_or(sys_bad as SyscallFn);
    handler(&ctx, args)
}
