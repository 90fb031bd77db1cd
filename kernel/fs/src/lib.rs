//! Virtual filesystem core for the Muon kernel.
//!
//! Everything a descriptor can name goes through the [`Inode`] trait: files,
//! directories, symlinks, devices, pipes, and sockets. Callers never hand an
//! inode a raw user pointer; every buffer crosses through an [`IoCtx`],
//! which validates and copies according to the caller's domain.
//!
//! The crate is pure logic over those abstractions and tests on the host.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod delim;
pub mod descriptor;
pub mod dtable;
pub mod inode;
pub mod ioctx;
pub mod mtable;
pub mod path;
pub mod pipe;
pub mod poll;
pub mod ramfs;
pub mod socket;

mod error;

pub use descriptor::Descriptor;
pub use dtable::DescriptorTable;
pub use error::FsError;
pub use inode::{DirEntry, Inode, InodeType, IoctlArg};
pub use ioctx::{DstBuf, IoCtx, SrcBuf, UserSpace};
pub use mtable::MountTable;
pub use pipe::{PipeEndpoint, PipeInode, PIPE_BUF_SIZE};
pub use poll::{PollChannel, PollNode};
pub use ramfs::RamFs;
