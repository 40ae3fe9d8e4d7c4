//! Datagram sockets.

use super::addr::{MsgFlags, SockAddr};
use super::op::{Io, Op};
use super::socket::{Socket, current_reactor, domain_of};
use super::transfer::{RecvFrom, SendTo, StreamRecv, StreamSend};
use crate::error::Result;
use crate::reactor::ReactorHandle;

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// A non-blocking UDP socket.
///
/// At most one operation per direction may be outstanding at a time: a
/// concurrent send and receive are fine, two concurrent receives are not.
///
/// # Example
/// ```ignore
/// let socket = UdpSocket::bind("127.0.0.1:0".parse()?)?;
/// let mut buf = [0; 1500];
/// let (len, peer) = socket.recv_from(&mut buf).await?;
/// socket.send_to(&buf[..len], peer).await?;
/// ```
pub struct UdpSocket {
    socket: Socket,
}

impl UdpSocket {
    /// Binds a socket on the reactor of the current runtime.
    ///
    /// # Errors
    /// [`Error::NoRuntime`](crate::Error::NoRuntime) outside of `block_on`,
    /// or the failing system call.
    pub fn bind(address: SocketAddr) -> Result<Self> {
        Self::bind_with_reactor(address, current_reactor()?)
    }

    pub fn bind_with_reactor(address: SocketAddr, reactor: ReactorHandle) -> Result<Self> {
        let socket = Socket::new(domain_of(&address), libc::SOCK_DGRAM, reactor)?;
        socket.bind(&SockAddr::from(address))?;

        Ok(Self { socket })
    }

    /// Wraps a std socket, switching it to non-blocking mode.
    pub fn from_std(socket: std::net::UdpSocket) -> Result<Self> {
        use std::os::unix::io::IntoRawFd;

        let reactor = current_reactor()?;
        Ok(Self {
            socket: Socket::adopt(socket.into_raw_fd(), reactor)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Sets the default peer used by [`send`](Self::send) and
    /// [`recv`](Self::recv).
    pub fn connect(&self, address: SocketAddr) -> Result<()> {
        self.socket.connect(&SockAddr::from(address))
    }

    pub fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> Op<Io<SendTo<'a>>> {
        self.send_to_with_flags(buf, target, MsgFlags::empty())
    }

    pub fn send_to_with_flags<'a>(
        &'a self,
        buf: &'a [u8],
        target: SocketAddr,
        flags: MsgFlags,
    ) -> Op<Io<SendTo<'a>>> {
        self.socket.op(SendTo {
            buf,
            addr: SockAddr::from(target),
            flags,
        })
    }

    /// Receives one datagram and reports its sender.
    pub fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> Op<Io<RecvFrom<'a>>> {
        self.recv_from_with_flags(buf, MsgFlags::empty())
    }

    pub fn recv_from_with_flags<'a>(
        &'a self,
        buf: &'a mut [u8],
        flags: MsgFlags,
    ) -> Op<Io<RecvFrom<'a>>> {
        self.socket.op(RecvFrom { buf, flags })
    }

    /// Sends to the connected peer.
    pub fn send<'a>(&'a self, buf: &'a [u8]) -> Op<Io<StreamSend<'a>>> {
        self.socket.op(StreamSend {
            buf,
            flags: MsgFlags::empty(),
        })
    }

    /// Receives from the connected peer.
    pub fn recv<'a>(&'a self, buf: &'a mut [u8]) -> Op<Io<StreamRecv<'a>>> {
        self.socket.op(StreamRecv {
            buf,
            flags: MsgFlags::empty(),
        })
    }

    pub fn reactor(&self) -> &ReactorHandle {
        self.socket.reactor()
    }
}

impl AsRawFd for UdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
