//! Asynchronous sockets.
//!
//! Sockets register with the reactor of the runtime they were created in and
//! hand out [`Op`] futures, one per system call:
//!
//! - [`SendTo`] / [`RecvFrom`]: address-aware datagram transfer,
//! - [`StreamSend`] / [`StreamRecv`]: transfer on a connected socket.
//!
//! Each future first tries the call without suspending and only registers
//! with the reactor when it would block.
//!
//! # Example
//!
//! ```ignore
//! use strand::net::UdpSocket;
//!
//! async fn echo_once(socket: &UdpSocket) -> strand::Result<()> {
//!     let mut buf = [0; 1500];
//!     let (len, peer) = socket.recv_from(&mut buf).await?;
//!     socket.send_to(&buf[..len], peer).await?;
//!     Ok(())
//! }
//! ```

mod addr;
mod op;
mod socket;
mod tcp_listener;
mod tcp_stream;
mod transfer;
mod udp;

pub use addr::{MsgFlags, SockAddr};
pub use op::{Io, Op, Operation};
pub use tcp_listener::TcpListener;
pub use tcp_stream::TcpStream;
pub use transfer::{Accept, RecvFrom, SendTo, StreamRecv, StreamSend};
pub use udp::UdpSocket;
