//! Minimal ELF64 parser for the Muon kernel.
//!
//! Parses the file header and program headers from a raw byte slice with
//! safe field extraction; yields `PT_LOAD` segments for mapping and the
//! `PT_TLS` segment for the thread-local-storage auxiliary record. No
//! unsafe code, no allocation.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod header;
pub mod image;

pub use header::{Elf64Header, Elf64ProgramHeader, ElfError, PF_R, PF_W, PF_X, PT_LOAD, PT_TLS};
pub use image::{ElfImage, LoadSegment, TlsSegment};
