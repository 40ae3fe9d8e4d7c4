use super::addr::MsgFlags;
use super::op::{Io, Op};
use super::socket::{Socket, current_reactor};
use super::transfer::{StreamRecv, StreamSend};
use crate::error::{Error, Result};

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};

/// A connected TCP stream.
///
/// Obtained from [`TcpListener::accept`](super::TcpListener::accept) or by
/// wrapping a connected std stream with [`from_std`](Self::from_std).
pub struct TcpStream {
    socket: Socket,
}

impl TcpStream {
    pub(crate) fn from_socket(socket: Socket) -> Self {
        Self { socket }
    }

    /// Takes over a connected std stream on the reactor of the current
    /// runtime.
    pub fn from_std(stream: std::net::TcpStream) -> Result<Self> {
        let reactor = current_reactor()?;

        Ok(Self {
            socket: Socket::adopt(stream.into_raw_fd(), reactor)?,
        })
    }

    pub fn send<'a>(&'a self, buf: &'a [u8]) -> Op<Io<StreamSend<'a>>> {
        self.send_with_flags(buf, MsgFlags::empty())
    }

    pub fn send_with_flags<'a>(&'a self, buf: &'a [u8], flags: MsgFlags) -> Op<Io<StreamSend<'a>>> {
        self.socket.op(StreamSend { buf, flags })
    }

    /// Receives into `buf`. Resolves to zero once the peer has shut down.
    pub fn recv<'a>(&'a self, buf: &'a mut [u8]) -> Op<Io<StreamRecv<'a>>> {
        self.recv_with_flags(buf, MsgFlags::empty())
    }

    pub fn recv_with_flags<'a>(&'a self, buf: &'a mut [u8], flags: MsgFlags) -> Op<Io<StreamRecv<'a>>> {
        self.socket.op(StreamRecv { buf, flags })
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.send(buf).await?;
            if n == 0 {
                return Err(Error::WriteZero("send"));
            }
            buf = &buf[n..];
        }

        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
