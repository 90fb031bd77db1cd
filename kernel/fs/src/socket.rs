//! In-kernel stream sockets.
//!
//! A [`StreamSocket`] inode is created unbound; `bind` names it, `listen`
//! gives it a backlog, and each `connect` against it produces a pair of
//! connected [`StreamInode`]s built from two pipe channels wired in
//! opposite directions. `accept` pops the server half off the backlog.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_core::id::{Dev, Ino};
use muon_core::sync::{SpinLock, WakeCondition};
use muon_syscall::poll::POLLIN;
use muon_syscall::stat::{S_IFSOCK, Stat};

use crate::inode::{Inode, InodeType};
use crate::ioctx::{DstBuf, IoCtx, SrcBuf};
use crate::pipe::PipeEndpoint;
use crate::poll::{PollChannel, PollNode};
use crate::FsError;

/// Device id for socket inodes.
const SOCK_DEV: u64 = 4;

static NEXT_SOCK_INO: AtomicU64 = AtomicU64::new(1);

fn allocate_ino() -> Ino {
    Ino::new(NEXT_SOCK_INO.fetch_add(1, Ordering::Relaxed))
}

struct ListenState {
    bound: Option<Vec<u8>>,
    backlog: Option<VecDeque<Arc<StreamInode>>>,
    backlog_max: usize,
}

/// A listening stream socket.
pub struct StreamSocket {
    ino: Ino,
    state: SpinLock<ListenState>,
    accept_cond: Arc<WakeCondition>,
    poll: PollChannel,
}

impl StreamSocket {
    /// Creates an unbound socket.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ino: allocate_ino(),
            state: SpinLock::new(ListenState {
                bound: None,
                backlog: None,
                backlog_max: 0,
            }),
            accept_cond: Arc::new(WakeCondition::new()),
            poll: PollChannel::new(),
        })
    }

    /// The address bound earlier, if any.
    pub fn bound_addr(&self) -> Option<Vec<u8>> {
        self.state.lock().bound.clone()
    }
}

impl Inode for StreamSocket {
    fn inode_type(&self) -> InodeType {
        InodeType::Socket
    }

    fn dev(&self) -> Dev {
        Dev::new(SOCK_DEV)
    }

    fn ino(&self) -> Ino {
        self.ino
    }

    fn stat(&self, _ctx: &IoCtx) -> Result<Stat, FsError> {
        Ok(Stat {
            st_dev: SOCK_DEV,
            st_ino: self.ino.get(),
            st_mode: S_IFSOCK | 0o666,
            st_nlink: 1,
            ..Stat::default()
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn bind(&self, _ctx: &IoCtx, addr: &[u8]) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if state.bound.is_some() {
            return Err(FsError::InvalidArgument);
        }
        state.bound = Some(addr.to_vec());
        Ok(())
    }

    fn listen(&self, _ctx: &IoCtx, backlog: usize) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if state.bound.is_none() {
            return Err(FsError::InvalidArgument);
        }
        if state.backlog.is_none() {
            state.backlog = Some(VecDeque::new());
        }
        state.backlog_max = backlog.max(1);
        Ok(())
    }

    fn accept(&self, _ctx: &IoCtx) -> Result<Arc<dyn Inode>, FsError> {
        let mut state = self.state.lock();
        let backlog = state.backlog.as_mut().ok_or(FsError::InvalidArgument)?;
        match backlog.pop_front() {
            Some(stream) => Ok(stream as Arc<dyn Inode>),
            None => Err(FsError::WouldBlock),
        }
    }

    fn connect(&self, _ctx: &IoCtx, _addr: &[u8]) -> Result<Arc<dyn Inode>, FsError> {
        // Two pipes, crosswired: the client reads what the server writes
        // and vice versa.
        let (client_read, server_write) = PipeEndpoint::pair();
        let (server_read, client_write) = PipeEndpoint::pair();
        let client = StreamInode::new(client_read, client_write);
        let server = StreamInode::new(server_read, server_write);

        {
            let mut state = self.state.lock();
            let max = state.backlog_max;
            let backlog = state.backlog.as_mut().ok_or(FsError::Io)?;
            if backlog.len() >= max {
                return Err(FsError::WouldBlock);
            }
            backlog.push_back(server);
        }
        self.accept_cond.signal();
        self.poll.signal(POLLIN);
        Ok(client as Arc<dyn Inode>)
    }

    fn poll(&self, _ctx: &IoCtx, node: &Arc<PollNode>) -> Result<(), FsError> {
        self.poll.register(node);
        let pending = {
            let state = self.state.lock();
            state.backlog.as_ref().is_some_and(|b| !b.is_empty())
        };
        if pending {
            node.publish(POLLIN);
        }
        Ok(())
    }

    fn read_condition(&self) -> Option<Arc<WakeCondition>> {
        // Accepting is the socket's "read": wake on connection arrival.
        Some(self.accept_cond.clone())
    }
}

/// A connected byte stream (one side of an accepted connection).
pub struct StreamInode {
    ino: Ino,
    rx: PipeEndpoint,
    tx: PipeEndpoint,
}

impl StreamInode {
    fn new(rx: PipeEndpoint, tx: PipeEndpoint) -> Arc<Self> {
        Arc::new(Self {
            ino: allocate_ino(),
            rx,
            tx,
        })
    }
}

impl Inode for StreamInode {
    fn inode_type(&self) -> InodeType {
        InodeType::Stream
    }

    fn dev(&self) -> Dev {
        Dev::new(SOCK_DEV)
    }

    fn ino(&self) -> Ino {
        self.ino
    }

    fn stat(&self, _ctx: &IoCtx) -> Result<Stat, FsError> {
        Ok(Stat {
            st_dev: SOCK_DEV,
            st_ino: self.ino.get(),
            st_mode: S_IFSOCK | 0o666,
            st_nlink: 1,
            ..Stat::default()
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn read(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        self.rx.read(ctx, buf)
    }

    fn write(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        self.tx.write(ctx, buf)
    }

    fn send(&self, ctx: &IoCtx, buf: &SrcBuf<'_>) -> Result<usize, FsError> {
        self.tx.write(ctx, buf)
    }

    fn recv(&self, ctx: &IoCtx, buf: &mut DstBuf<'_>) -> Result<usize, FsError> {
        self.rx.read(ctx, buf)
    }

    fn poll(&self, _ctx: &IoCtx, node: &Arc<PollNode>) -> Result<(), FsError> {
        self.rx.poll(node);
        self.tx.poll(node);
        Ok(())
    }

    fn read_condition(&self) -> Option<Arc<WakeCondition>> {
        Some(self.rx.read_condition())
    }

    fn write_condition(&self) -> Option<Arc<WakeCondition>> {
        Some(self.tx.write_condition())
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
    fn connect_accept_and_exchange() {
        let ctx = ctx();
        let listener = StreamSocket::new();
        listener.bind(&ctx, b"/run/demo").unwrap();
        listener.listen(&ctx, 4).unwrap();

        let client = listener.connect(&ctx, b"/run/demo").unwrap();
        let server = listener.accept(&ctx).unwrap();

        assert_eq!(client.send(&ctx, &SrcBuf::Kernel(b"ping")).unwrap(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(
            server.recv(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(),
            4
        );
        assert_eq!(&buf[..4], b"ping");

        server.send(&ctx, &SrcBuf::Kernel(b"pong")).unwrap();
        assert_eq!(
            client.recv(&ctx, &mut DstBuf::Kernel(&mut buf)).unwrap(),
            4
        );
        assert_eq!(&buf[..4], b"pong");
    }

    #[test]
    fn accept_without_pending_would_block() {
        let ctx = ctx();
        let listener = StreamSocket::new();
        listener.bind(&ctx, b"x").unwrap();
        listener.listen(&ctx, 1).unwrap();
        assert!(matches!(listener.accept(&ctx), Err(FsError::WouldBlock)));
    }

    #[test]
    fn connect_wakes_acceptor() {
        let ctx = ctx();
        let listener = StreamSocket::new();
        listener.bind(&ctx, b"x").unwrap();
        listener.listen(&ctx, 1).unwrap();
        let cond = listener.read_condition().unwrap();
        assert!(!cond.is_signalled());
        listener.connect(&ctx, b"x").unwrap();
        assert!(cond.is_signalled());
    }

    #[test]
    fn listen_requires_bind() {
        let ctx = ctx();
        let listener = StreamSocket::new();
        assert_eq!(listener.listen(&ctx, 1), Err(FsError::InvalidArgument));
        assert!(listener.bound_addr().is_none());
    }

    #[test]
    fn file_operations_fail_on_sockets() {
        let ctx = ctx();
        let listener = StreamSocket::new();
        let mut buf = [0u8; 1];
        assert_eq!(
            listener.read(&ctx, &mut DstBuf::Kernel(&mut buf)),
            Err(FsError::NotSupported)
        );
    }
}
