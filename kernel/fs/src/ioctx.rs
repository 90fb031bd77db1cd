//! I/O context: per-call credentials and copy semantics.
//!
//! Every inode operation receives an [`IoCtx`] describing who is calling
//! and how buffers move. Kernel-internal callers use the kernel domain
//! (plain slice copies); syscalls on behalf of userspace use the user
//! domain, where every address is validated against the process's segment
//! table by the [`UserSpace`] implementation before a byte moves.
//!
//! Inode methods never see raw user pointers, only [`SrcBuf`]/[`DstBuf`]
//! values they must route through the context.

extern crate alloc;

use alloc::sync::Arc;

use muon_core::id::{Gid, Uid};

use crate::FsError;

/// Access to one process's user address space.
///
/// Implementations validate `(addr, len)` against the owning process's
/// segment table and fail with [`FsError::BadAddress`] rather than touch
/// an unmapped or foreign range.
pub trait UserSpace: Send + Sync {
    /// Copies `dst.len()` bytes from user memory at `addr`.
    fn copy_in(&self, addr: usize, dst: &mut [u8]) -> Result<(), FsError>;
    /// Copies `src` into user memory at `addr`.
    fn copy_out(&self, addr: usize, src: &[u8]) -> Result<(), FsError>;
    /// Zero-fills `len` bytes of user memory at `addr`.
    fn zero(&self, addr: usize, len: usize) -> Result<(), FsError> {
        // Chunked default so implementations only need copy_out.
        let zeros = [0u8; 64];
        let mut done = 0;
        while done < len {
            let step = zeros.len().min(len - done);
            self.copy_out(addr + done, &zeros[..step])?;
            done += step;
        }
        Ok(())
    }
}

/// Which side of the user/kernel boundary buffers live on.
#[derive(Clone)]
enum CopyDomain {
    Kernel,
    User(Arc<dyn UserSpace>),
}

/// A source buffer handed to an inode operation.
pub enum SrcBuf<'a> {
    /// A kernel slice.
    Kernel(&'a [u8]),
    /// A user range `(addr, len)`; only usable through a user-domain context.
    User(usize, usize),
}

impl SrcBuf<'_> {
    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Kernel(slice) => slice.len(),
            Self::User(_, len) => *len,
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A destination buffer handed to an inode operation.
pub enum DstBuf<'a> {
    /// A kernel slice.
    Kernel(&'a mut [u8]),
    /// A user range `(addr, len)`; only usable through a user-domain context.
    User(usize, usize),
}

impl DstBuf<'_> {
    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Kernel(slice) => slice.len(),
            Self::User(_, len) => *len,
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-call I/O context: credentials plus copy direction functions.
#[derive(Clone)]
pub struct IoCtx {
    /// Effective user id of the caller.
    pub uid: Uid,
    /// Real user id of the caller (for permission auditing).
    pub auth_uid: Uid,
    /// Effective group id of the caller.
    pub gid: Gid,
    /// Real group id of the caller.
    pub auth_gid: Gid,
    /// Descriptor flags for this call (e.g. `O_NONBLOCK` override).
    pub dflags: u32,
    domain: CopyDomain,
}

impl IoCtx {
    /// A kernel-domain context: buffers are kernel slices.
    pub fn kernel(uid: Uid, gid: Gid) -> Self {
        Self {
            uid,
            auth_uid: uid,
            gid,
            auth_gid: gid,
            dflags: 0,
            domain: CopyDomain::Kernel,
        }
    }

    /// A user-domain context backed by the caller's address space.
    pub fn user(uid: Uid, gid: Gid, space: Arc<dyn UserSpace>) -> Self {
        Self {
            uid,
            auth_uid: uid,
            gid,
            auth_gid: gid,
            dflags: 0,
            domain: CopyDomain::User(space),
        }
    }

    /// Returns a copy of the context with different per-call flags.
    #[must_use]
    pub fn with_dflags(&self, dflags: u32) -> Self {
        let mut ctx = self.clone();
        ctx.dflags = dflags;
        ctx
    }

    /// Copies `dst.len()` bytes out of `src` starting at `offset`.
    pub fn copy_from_src(
        &self,
        dst: &mut [u8],
        src: &SrcBuf<'_>,
        offset: usize,
    ) -> Result<(), FsError> {
        match src {
            SrcBuf::Kernel(slice) => {
                let end = offset.checked_add(dst.len()).ok_or(FsError::Overflow)?;
                let window = slice.get(offset..end).ok_or(FsError::BadAddress)?;
                dst.copy_from_slice(window);
                Ok(())
            }
            SrcBuf::User(addr, len) => {
                let space = self.user_space()?;
                let end = offset.checked_add(dst.len()).ok_or(FsError::Overflow)?;
                if end > *len {
                    return Err(FsError::BadAddress);
                }
                space.copy_in(addr + offset, dst)
            }
        }
    }

    /// Copies `src` into `dst` starting at `offset`.
    pub fn copy_to_dest(
        &self,
        dst: &mut DstBuf<'_>,
        offset: usize,
        src: &[u8],
    ) -> Result<(), FsError> {
        match dst {
            DstBuf::Kernel(slice) => {
                let end = offset.checked_add(src.len()).ok_or(FsError::Overflow)?;
                let window = slice.get_mut(offset..end).ok_or(FsError::BadAddress)?;
                window.copy_from_slice(src);
                Ok(())
            }
            DstBuf::User(addr, len) => {
                let space = self.user_space()?;
                let end = offset.checked_add(src.len()).ok_or(FsError::Overflow)?;
                if end > *len {
                    return Err(FsError::BadAddress);
                }
                space.copy_out(*addr + offset, src)
            }
        }
    }

    /// Zero-fills `len` bytes of `dst` starting at `offset`.
    pub fn zero_dest(
        &self,
        dst: &mut DstBuf<'_>,
        offset: usize,
        len: usize,
    ) -> Result<(), FsError> {
        match dst {
            DstBuf::Kernel(slice) => {
                let end = offset.checked_add(len).ok_or(FsError::Overflow)?;
                let window = slice.get_mut(offset..end).ok_or(FsError::BadAddress)?;
                window.fill(0);
                Ok(())
            }
            DstBuf::User(addr, buf_len) => {
                let space = self.user_space()?;
                let end = offset.checked_add(len).ok_or(FsError::Overflow)?;
                if end > *buf_len {
                    return Err(FsError::BadAddress);
                }
                space.zero(*addr + offset, len)
            }
        }
    }

    fn user_space(&self) -> Result<&Arc<dyn UserSpace>, FsError> {
        match &self.domain {
            CopyDomain::User(space) => Ok(space),
            // A user buffer through a kernel context is a kernel bug
            // surfacing as a bad address, never a silent raw copy.
            CopyDomain::Kernel => Err(FsError::BadAddress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use muon_core::sync::SpinLock;

    /// Flat test address space: a single writable range at FAKE_BASE.
    struct FlatSpace {
        base: usize,
        mem: SpinLock<Vec<u8>>,
    }

    impl UserSpace for FlatSpace {
        fn copy_in(&self, addr: usize, dst: &mut [u8]) -> Result<(), FsError> {
            let mem = self.mem.lock();
            let start = addr.checked_sub(self.base).ok_or(FsError::BadAddress)?;
            let window = mem
                .get(start..start + dst.len())
                .ok_or(FsError::BadAddress)?;
            dst.copy_from_slice(window);
            Ok(())
        }

        fn copy_out(&self, addr: usize, src: &[u8]) -> Result<(), FsError> {
            let mut mem = self.mem.lock();
            let start = addr.checked_sub(self.base).ok_or(FsError::BadAddress)?;
            let window = mem
                .get_mut(start..start + src.len())
                .ok_or(FsError::BadAddress)?;
            window.copy_from_slice(src);
            Ok(())
        }
    }

    fn user_ctx() -> (IoCtx, usize) {
        let base = 0x4000;
        let space = Arc::new(FlatSpace {
            base,
            mem: SpinLock::new(vec![0; 256]),
        });
        (IoCtx::user(Uid::ROOT, Gid::ROOT, space), base)
    }

    #[test]
    fn kernel_domain_copies_slices() {
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let src = SrcBuf::Kernel(b"hello");
        let mut out = [0u8; 3];
        ctx.copy_from_src(&mut out, &src, 2).unwrap();
        assert_eq!(&out, b"llo");
    }

    #[test]
    fn kernel_domain_rejects_user_buffers() {
        let ctx = IoCtx::kernel(Uid::ROOT, Gid::ROOT);
        let mut out = [0u8; 4];
        let err = ctx.copy_from_src(&mut out, &SrcBuf::User(0x1000, 4), 0);
        assert_eq!(err, Err(FsError::BadAddress));
    }

    #[test]
    fn user_domain_round_trip() {
        let (ctx, base) = user_ctx();
        let mut dst = DstBuf::User(base + 8, 5);
        ctx.copy_to_dest(&mut dst, 0, b"abcde").unwrap();

        let src = SrcBuf::User(base + 8, 5);
        let mut back = [0u8; 5];
        ctx.copy_from_src(&mut back, &src, 0).unwrap();
        assert_eq!(&back, b"abcde");
    }

    #[test]
    fn out_of_range_user_access_faults() {
        let (ctx, base) = user_ctx();
        let mut dst = DstBuf::User(base + 250, 16);
        assert_eq!(
            ctx.copy_to_dest(&mut dst, 0, &[0u8; 16]),
            Err(FsError::BadAddress)
        );
    }

    #[test]
    fn zero_dest_clears_range() {
        let (ctx, base) = user_ctx();
        let mut dst = DstBuf::User(base, 8);
        ctx.copy_to_dest(&mut dst, 0, &[0xFF; 8]).unwrap();
        ctx.zero_dest(&mut dst, 2, 4).unwrap();
        let mut back = [0u8; 8];
        ctx.copy_from_src(&mut back, &SrcBuf::User(base, 8), 0)
            .unwrap();
        assert_eq!(back, [0xFF, 0xFF, 0, 0, 0, 0, 0xFF, 0xFF]);
    }
}
