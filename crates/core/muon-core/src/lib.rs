//! Core types and synchronization primitives for the Muon kernel.
//!
//! This crate holds the leaves of the kernel dependency graph: spin-based
//! locks, the interlocked compare-and-swap helpers, manual reference
//! counting, identifier newtypes, and the kernel logging facade. Nothing
//! here knows about processes, inodes, or clocks.
//!
//! By living outside the kernel crate, these types can be tested with
//! `cargo test` on the host without a kernel target.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod id;
pub mod interlock;
pub mod log;
pub mod refcount;
pub mod sync;
