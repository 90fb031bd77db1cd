//! Architecture layer.
//!
//! Only the pieces the core contract names live here: interrupt masking,
//! the interrupt frame mapping onto [`RegisterFrame`], the software
//! interrupt vectors, and port I/O. Everything else in the kernel is
//! architecture-neutral.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::interrupts;
