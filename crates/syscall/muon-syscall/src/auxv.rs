//! ELF auxiliary vector keys.
//!
//! The initial process stack ends with `(key, value)` pairs terminated by
//! [`AT_NULL`]. The TLS keys describe the `PT_TLS` template so the
//! userspace runtime can set up each thread's block.

/// End of the auxiliary vector.
pub const AT_NULL: usize = 0;
/// Entry point of the program image.
pub const AT_ENTRY: usize = 9;
/// Page size.
pub const AT_PAGESZ: usize = 6;
/// Address of the initialized TLS template image.
pub const AT_TLS_TEMPLATE_ADDR: usize = 32;
/// Byte length of the initialized TLS template image.
pub const AT_TLS_TEMPLATE_SIZE: usize = 33;
/// Total per-thread TLS block size (template plus zero-fill).
pub const AT_TLS_TOTAL_SIZE: usize = 34;
/// Required alignment of each thread's TLS block.
pub const AT_TLS_ALIGN: usize = 35;
/// Size of the userspace thread descriptor placed after the TLS block.
pub const AT_UTHREAD_SIZE: usize = 36;
