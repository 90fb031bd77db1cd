//! Delimiter-bounded reads over descriptors.
//!
//! The kernel-side engine behind `getdelim`/`getline`: reads byte-wise up
//! to and including the delimiter, growing the caller's buffer.

extern crate alloc;

use alloc::vec::Vec;

use crate::descriptor::Descriptor;
use crate::ioctx::{DstBuf, IoCtx};
use crate::FsError;

/// Reads from `desc` until `delim` (inclusive) or end of file.
///
/// Appends to `out` and returns the number of bytes appended; zero means
/// end of file with nothing read.
pub fn read_until(
    desc: &Descriptor,
    ctx: &IoCtx,
    delim: u8,
    out: &mut Vec<u8>,
) -> Result<usize, FsError> {
    let mut appended = 0;
    loop {
        let mut byte = [0u8; 1];
        let count = desc.read(ctx, &mut DstBuf::Kernel(&mut byte))?;
        if count == 0 {
            return Ok(appended);
        }
        out.push(byte[0]);
        appended += 1;
        if byte[0] == delim {
            return Ok(appended);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;
    use alloc::sync::Arc;
    use muon_core::id::{Dev, Gid, Uid};
    use muon_syscall::fcntl::{O_CREATE, O_READ, O_WRITE};

    fn file_descriptor(content: &[u8]) -> Arc<Descriptor> {
        let fs = RamFs::new(Dev::new(1));
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let inode = fs
            .root()
            .open(&ctx, "f", O_READ | O_WRITE | O_CREATE, 0o644)
            .unwrap();
        inode
            .pwrite(&ctx, &crate::ioctx::SrcBuf::Kernel(content), 0)
            .unwrap();
        Descriptor::new(inode, O_READ)
    }

    #[test]
    fn lines_come_back_one_at_a_time() {
        let desc = file_descriptor(b"a\nb");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);

        let mut line = Vec::new();
        assert_eq!(read_until(&desc, &ctx, b'\n', &mut line).unwrap(), 2);
        assert_eq!(line, b"a\n");

        line.clear();
        assert_eq!(read_until(&desc, &ctx, b'\n', &mut line).unwrap(), 1);
        assert_eq!(line, b"b");

        line.clear();
        assert_eq!(read_until(&desc, &ctx, b'\n', &mut line).unwrap(), 0);
    }

    #[test]
    fn delimiter_at_end_of_file() {
        let desc = file_descriptor(b"x\n");
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let mut line = Vec::new();
        assert_eq!(read_until(&desc, &ctx, b'\n', &mut line).unwrap(), 2);
        assert_eq!(read_until(&desc, &ctx, b'\n', &mut line).unwrap(), 0);
    }
}
