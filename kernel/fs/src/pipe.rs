//! Pipes: a bounded byte stream between descriptors.
//!
//! A [`PipeChannel`] owns the ring buffer and the reader/writer endpoint
//! counts; [`PipeEndpoint`]s are the two directed handles. Reads on an
//! empty pipe and writes on a full pipe report [`FsError::WouldBlock`] and
//! expose wake conditions, leaving the block/retry decision to the syscall
//! layer (or EAGAIN under `O_NONBLOCK`). A pipe whose writers are gone
//! reads as end-of-file; a pipe whose readers are gone fails writes with
//! [`FsError::PipeClosed`], upon which the caller delivers `SIGPIPE`.
//!
//! Writes of at most [`PIPE_BUF_SIZE`] bytes are atomic: they either fit
//! entirely or block, never interleave partially.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_core::id::{Dev, Ino};
use muon_core::sync::{SpinLock, WakeCondition};
use muon_syscall::poll::{POLLERR, POLLHUP, POLLIN, POLLOUT};
use muon_syscall::stat::{S_IFIFO, Stat};
use planck_noalloc::ringbuf::RingBuf;

use crate::inode::{Inode, InodeType};
use crate::ioctx::{DstBuf, IoCtx, SrcBuf};
use crate::poll::PollNode;
use crate::FsError;

/// Pipe capacity in bytes; also the atomic-write threshold.
pub const PIPE_BUF_SIZE: usize = 4096;

/// Ring backing-array size (the ring keeps one slot unused).
const PIPE_RING_SIZE: usize = PIPE_BUF_SIZE + 1;

/// Device id for anonymous pipe inodes.
const PIPE_DEV: u64 = 3;

static NEXT_PIPE_INO: AtomicU64 = AtomicU64::new(1);

struct PipeState {
    ring: RingBuf<u8, PIPE_RING_SIZE>,
    readers: usize,
    writers: usize,
}

/// The shared middle of a pipe.
pub struct PipeChannel {
    state: SpinLock<PipeState>,
    read_cond: Arc<WakeCondition>,
    write_cond: Arc<WakeCondition>,
    poll: crate::poll::PollChannel,
}

impl PipeChannel {
    /// Creates a channel with no endpoints yet.
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: SpinLock::new(PipeState {
                ring: RingBuf::new(),
                readers: 0,
                writers: 0,
            }),
            read_cond: Arc::new(WakeCondition::new()),
            write_cond: Arc::new(WakeCondition::new()),
            poll: crate::poll::PollChannel::new(),
        })
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.state.lock().ring.len()
    }

    fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        let chunk = {
            let mut state = self.state.lock();
            if state.ring.is_empty() {
                if state.writers == 0 {
                    return Ok(0);
                }
                // WouldBlock either becomes EAGAIN (O_NONBLOCK) or a
                // parked thread; the syscall layer decides.
                return Err(FsError::WouldBlock);
            }
            let count = buf.len().min(state.ring.len());
            let mut chunk = Vec::with_capacity(count);
            for _ in 0..count {
                // The count was bounded by ring.len() under this lock.
                chunk.push(state.ring.pop().unwrap_or(0));
            }
            chunk
        };
        ctx.copy_to_dest(buf, 0, &chunk)?;
        self.write_cond.signal();
        self.poll.signal(POLLOUT);
        Ok(chunk.len())
    }

    fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        let count = {
            let state = self.state.lock();
            if state.readers == 0 {
                return Err(FsError::PipeClosed);
            }
            let space = state.ring.max_capacity() - state.ring.len();
            if buf.len() <= PIPE_BUF_SIZE && space < buf.len() {
                // Small writes are all-or-nothing.
                return Err(FsError::WouldBlock);
            }
            if space == 0 {
                return Err(FsError::WouldBlock);
            }
            space.min(buf.len())
        };

        let mut chunk = vec![0u8; count];
        ctx.copy_from_src(&mut chunk, buf, 0)?;

        {
            let mut state = self.state.lock();
            // Recheck under the lock; a racing reader may have closed.
            if state.readers == 0 {
                return Err(FsError::PipeClosed);
            }
            for byte in &chunk {
                if state.ring.try_push(*byte).is_err() {
                    break;
                }
            }
        }
        self.read_cond.signal();
        self.poll.signal(POLLIN);
        Ok(count)
    }

    fn poll_events(&self) -> i16 {
        let state = self.state.lock();
        let mut events = 0;
        if !state.ring.is_empty() || state.writers == 0 {
            events |= POLLIN;
        }
        if state.writers == 0 {
            events |= POLLHUP;
        }
        if !state.ring.is_full() && state.readers != 0 {
            events |= POLLOUT;
        }
        if state.readers == 0 {
            events |= POLLERR;
        }
        events
    }
}

/// One directed handle on a pipe channel.
pub struct PipeEndpoint {
    channel: Arc<PipeChannel>,
    reading: bool,
}

impl PipeEndpoint {
    /// Creates a connected read/write endpoint pair.
    pub fn pair() -> (PipeEndpoint, PipeEndpoint) {
        let channel = PipeChannel::new();
        {
            let mut state = channel.state.lock();
            state.readers = 1;
            state.writers = 1;
        }
        (
            PipeEndpoint {
                channel: channel.clone(),
                reading: true,
            },
            PipeEndpoint {
                channel,
                reading: false,
            },
        )
    }

    /// Reads from the pipe. Only valid on the reading endpoint.
    pub fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        if !self.reading {
            return Err(FsError::BadDescriptor);
        }
        self.channel.read(ctx, buf)
    }

    /// Writes to the pipe. Only valid on the writing endpoint.
    pub fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        if self.reading {
            return Err(FsError::BadDescriptor);
        }
        self.channel.write(ctx, buf)
    }

    /// Registers a poll subscription and publishes currently-true events.
    pub fn poll(&self, node: &Arc<PollNode>) {
        self.channel.poll.register(node);
        let now = self.channel.poll_events();
        if now != 0 {
            node.publish(now);
        }
    }

    /// Condition signalled when the pipe becomes readable (or EOF).
    pub fn read_condition(&self) -> Arc<WakeCondition> {
        self.channel.read_cond.clone()
    }

    /// Condition signalled when the pipe gains space (or loses readers).
    pub fn write_condition(&self) -> Arc<WakeCondition> {
        self.channel.write_cond.clone()
    }

    /// The shared channel, for diagnostics.
    pub fn channel(&self) -> &Arc<PipeChannel> {
        &self.channel
    }
}

impl Drop for PipeEndpoint {
    fn drop(&mut self) {
        let mut state = self.channel.state.lock();
        if self.reading {
            state.readers -= 1;
            if state.readers == 0 {
                drop(state);
                // Writers must learn the pipe is dead.
                self.channel.write_cond.signal();
                self.channel.poll.signal(POLLERR);
                return;
            }
        } else {
            state.writers -= 1;
            if state.writers == 0 {
                drop(state);
                // Readers must observe end-of-file.
                self.channel.read_cond.signal();
                self.channel.poll.signal(POLLIN | POLLHUP);
                return;
            }
        }
    }
}

// ── Pipe inodes ─────────────────────────────────────────────────────

/// An anonymous pipe endpoint as an inode, as created by `pipe()`.
pub struct PipeInode {
    endpoint: PipeEndpoint,
    ino: Ino,
}

impl PipeInode {
    /// Creates the `(read, write)` inode pair for `pipe()`.
    pub fn pair() -> (Arc<PipeInode>, Arc<PipeInode>) {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        let read = Arc::new(PipeInode {
            endpoint: read_ep,
            ino: Ino::new(NEXT_PIPE_INO.fetch_add(1, Ordering::Relaxed)),
        });
        let write = Arc::new(PipeInode {
            endpoint: write_ep,
            ino: Ino::new(NEXT_PIPE_INO.fetch_add(1, Ordering::Relaxed)),
        });
        (read, write)
    }
}

impl Inode for PipeInode {
    fn inode_type(&self) -> InodeType {
        InodeType::Pipe
    }

    fn dev(&self) -> Dev {
        Dev::new(PIPE_DEV)
    }

    fn ino(&self) -> Ino {
        self.ino
    }

    fn stat(&self, _ctx: &IoCtx) -> Result<Stat, FsError> {
        Ok(Stat {
            st_dev: PIPE_DEV,
            st_ino: self.ino.get(),
            st_mode: S_IFIFO | 0o600,
            st_nlink: 1,
            st_blksize: PIPE_BUF_SIZE as i64,
            ..Stat::default()
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        self.endpoint.read(ctx, buf)
    }

    fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        self.endpoint.write(ctx, buf)
    }

    fn poll(&self, _ctx: &IoCtx, node: &Arc<PollNode>) -> Result<(), FsError> {
        self.endpoint.poll(node);
        Ok(())
    }

    fn read_condition(&self) -> Option<Arc<WakeCondition>> {
        Some(self.endpoint.read_condition())
    }

    fn write_condition(&self) -> Option<Arc<WakeCondition>> {
        Some(self.endpoint.write_condition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muon_core::id::{Gid, Uid};

    fn ctx() -> IoCtx {
        IoCtx::kernel(Uid::ROOT, Gid::ROOT)
    }

    #[test]
    fn written_bytes_become_readable_then_eof() {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        let ctx = ctx();
        assert_eq!(write_ep.write(&ctx, &SrcBuf::Kernel(b"AB")).unwrap(), 2);
        drop(write_ep);

        let mut buf = [0u8; 4];
        let count = read_ep.read(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(&buf[..2], b"AB");
        // Writer gone, buffer drained: end of file.
        assert_eq!(read_ep.read(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(), 0);
    }

    #[test]
    fn empty_pipe_with_live_writer_would_block() {
        let (read_ep, _write_ep) = PipeEndpoint::pair();
        let mut buf = [0u8; 1];
        assert_eq!(
            read_ep.read(&ctx(), &mut DstBuf::Kernel(&mut buf)),
            Err(FsError::WouldBlock)
        );
    }

    #[test]
    fn write_after_reader_close_is_pipe_closed() {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        drop(read_ep);
        assert_eq!(
            write_ep.write(&ctx(), &SrcBuf::Kernel(b"x")),
            Err(FsError::PipeClosed)
        );
    }

    #[test]
    fn small_writes_are_atomic() {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        let ctx = ctx();
        let fill = vec![0u8; PIPE_BUF_SIZE - 10];
        assert_eq!(
            write_ep.write(&ctx, &SrcBuf::Kernel(&fill)).unwrap(),
            fill.len()
        );
        // 20 bytes do not fit atomically into the 10 remaining.
        assert_eq!(
            write_ep.write(&ctx, &SrcBuf::Kernel(&[1u8; 20])),
            Err(FsError::WouldBlock)
        );
        // Draining makes room.
        let mut sink = vec![0u8; PIPE_BUF_SIZE];
        read_ep
            .read(&ctx, &mut DstBuf::Kernel(&mut sink))
            .unwrap();
        assert_eq!(write_ep.write(&ctx, &SrcBuf::Kernel(&[1u8; 20])).unwrap(), 20);
    }

    #[test]
    fn poll_tracks_readability_and_hangup() {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        let ctx = ctx();
        let cond = Arc::new(WakeCondition::new());
        let node = PollNode::new(POLLIN, cond.clone());
        read_ep.poll(&node);
        assert_eq!(node.revents(), 0);

        write_ep.write(&ctx, &SrcBuf::Kernel(b"x")).unwrap();
        assert!(node.revents() & POLLIN != 0);
        assert!(cond.is_signalled());

        drop(write_ep);
        assert!(node.revents() & POLLHUP != 0);
    }

    #[test]
    fn conditions_fire_on_transitions() {
        let (read_ep, write_ep) = PipeEndpoint::pair();
        let ctx = ctx();
        let read_cond = read_ep.read_condition();
        assert!(!read_cond.is_signalled());
        write_ep.write(&ctx, &SrcBuf::Kernel(b"z")).unwrap();
        assert!(read_cond.is_signalled());
    }
}
