//! Single source of truth for the Muon syscall ABI.
//!
//! Everything the kernel and userspace must agree on byte-for-byte lives
//! here: syscall numbers, errno values, `timespec`/`itimerspec`, the wait
//! status word, signal numbers and `sigset_t`, file mode bits, open flags,
//! memory protections, poll events, the ioctl code encoding, and resource
//! limits. The crate is freestanding and dependency-free so both sides can
//! link it.
//!
//! Return convention: syscalls return a negated errno on failure; the
//! userspace library translates that to `-1` plus `errno`.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod auxv;
pub mod errno;
pub mod fcntl;
pub mod ioctl;
pub mod mman;
pub mod number;
pub mod poll;
pub mod resource;
pub mod signal;
pub mod stat;
pub mod time;
pub mod wait;

pub use errno::Errno;
pub use signal::SigSet;
pub use time::{Itimerspec, Timespec};
