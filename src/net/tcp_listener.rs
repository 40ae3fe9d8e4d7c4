//! TCP listener for accepting incoming connections.
//!
//! # Usage
//!
//! ```ignore
//! use strand::net::TcpListener;
//!
//! async fn server() -> strand::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080".parse().unwrap())?;
//!
//!     loop {
//!         let (stream, peer) = listener.accept().await?;
//!         log::info!("connection from {}", peer);
//!     }
//! }
//! ```

use super::addr::SockAddr;
use super::socket::{Socket, current_reactor, domain_of};
use super::tcp_stream::TcpStream;
use super::transfer::Accept;
use crate::error::Result;
use crate::reactor::ReactorHandle;

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

const BACKLOG: i32 = 128;

/// A TCP socket listening for connections.
pub struct TcpListener {
    socket: Socket,
}

impl TcpListener {
    /// Creates a listener on the reactor of the current runtime.
    ///
    /// The socket is created non-blocking, `SO_REUSEADDR` is set, and it
    /// listens with a backlog of 128.
    pub fn bind(address: SocketAddr) -> Result<Self> {
        Self::bind_with_reactor(address, current_reactor()?)
    }

    pub fn bind_with_reactor(address: SocketAddr, reactor: ReactorHandle) -> Result<Self> {
        let socket = Socket::new(domain_of(&address), libc::SOCK_STREAM, reactor)?;
        socket.set_reuse_address()?;
        socket.bind(&SockAddr::from(address))?;
        socket.listen(BACKLOG)?;

        Ok(Self { socket })
    }

    /// Waits for the next connection and returns it with the peer address.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (fd, peer) = self.socket.op(Accept).await?;
        let stream = TcpStream::from_socket(Socket::from_raw(fd, self.socket.reactor().clone()));

        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
