//! The system calls behind the socket operations.

use super::addr::{MsgFlags, SockAddr};
use super::op::sealed::Transfer;
use crate::reactor::Interest;

#[cfg(feature = "completion")]
use crate::error::Result;

use libc::c_void;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
const NOSIGNAL: i32 = libc::MSG_NOSIGNAL;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
const NOSIGNAL: i32 = 0;

fn transferred(count: isize) -> io::Result<usize> {
    if count < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(count as usize)
}

fn send_to(fd: RawFd, buf: &[u8], flags: MsgFlags, addr: &SockAddr) -> io::Result<usize> {
    transferred(unsafe {
        libc::sendto(
            fd,
            buf.as_ptr() as *const c_void,
            buf.len(),
            flags.bits() | NOSIGNAL,
            addr.as_ptr(),
            addr.len(),
        )
    })
}

fn recv_from(fd: RawFd, buf: &mut [u8], flags: MsgFlags) -> io::Result<(usize, SockAddr)> {
    let mut addr = SockAddr::empty();
    let (addr_ptr, len_ptr) = addr.as_out();

    let count = transferred(unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            flags.bits(),
            addr_ptr,
            len_ptr,
        )
    })?;

    Ok((count, addr))
}

fn send(fd: RawFd, buf: &[u8], flags: MsgFlags) -> io::Result<usize> {
    transferred(unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const c_void,
            buf.len(),
            flags.bits() | NOSIGNAL,
        )
    })
}

fn recv(fd: RawFd, buf: &mut [u8], flags: MsgFlags) -> io::Result<usize> {
    transferred(unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            flags.bits(),
        )
    })
}

fn peer(addr: SockAddr) -> io::Result<SocketAddr> {
    SocketAddr::try_from(addr)
}

/// Datagram send to an explicit peer.
pub struct SendTo<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) addr: SockAddr,
    pub(crate) flags: MsgFlags,
}

impl Transfer for SendTo<'_> {
    type Output = usize;
    #[cfg(feature = "completion")]
    type Owned = usize;

    const NAME: &'static str = "send_to";
    const INTEREST: Interest = Interest::WRITABLE;

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        send_to(fd, self.buf, self.flags, &self.addr)
    }

    #[cfg(feature = "completion")]
    fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<usize> + Send> {
        let (data, addr, flags) = (self.buf.to_vec(), self.addr, self.flags);
        Box::new(move |fd| send_to(fd, &data, flags, &addr))
    }

    #[cfg(feature = "completion")]
    fn complete(&mut self, sent: usize) -> Result<usize> {
        Ok(sent)
    }
}

/// Datagram receive that reports the sender.
pub struct RecvFrom<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) flags: MsgFlags,
}

impl Transfer for RecvFrom<'_> {
    type Output = (usize, SocketAddr);
    #[cfg(feature = "completion")]
    type Owned = (Vec<u8>, usize, SockAddr);

    const NAME: &'static str = "recv_from";
    const INTEREST: Interest = Interest::READABLE;

    fn attempt(&mut self, fd: RawFd) -> io::Result<(usize, SocketAddr)> {
        let (count, addr) = recv_from(fd, self.buf, self.flags)?;
        Ok((count, peer(addr)?))
    }

    #[cfg(feature = "completion")]
    fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<(Vec<u8>, usize, SockAddr)> + Send> {
        let (len, flags) = (self.buf.len(), self.flags);
        let mut data = vec![0; len];

        Box::new(move |fd| {
            let (count, addr) = recv_from(fd, &mut data, flags)?;
            Ok((std::mem::take(&mut data), count, addr))
        })
    }

    #[cfg(feature = "completion")]
    fn complete(&mut self, (data, count, addr): (Vec<u8>, usize, SockAddr)) -> Result<(usize, SocketAddr)> {
        let copied = count.min(self.buf.len()).min(data.len());
        self.buf[..copied].copy_from_slice(&data[..copied]);

        let addr = peer(addr).map_err(|error| crate::error::Error::os(Self::NAME, error))?;
        Ok((count, addr))
    }
}

/// Stream send on a connected socket.
pub struct StreamSend<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) flags: MsgFlags,
}

impl Transfer for StreamSend<'_> {
    type Output = usize;
    #[cfg(feature = "completion")]
    type Owned = usize;

    const NAME: &'static str = "send";
    const INTEREST: Interest = Interest::WRITABLE;

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        send(fd, self.buf, self.flags)
    }

    #[cfg(feature = "completion")]
    fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<usize> + Send> {
        let (data, flags) = (self.buf.to_vec(), self.flags);
        Box::new(move |fd| send(fd, &data, flags))
    }

    #[cfg(feature = "completion")]
    fn complete(&mut self, sent: usize) -> Result<usize> {
        Ok(sent)
    }
}

/// Stream receive on a connected socket. Zero bytes means the peer closed.
pub struct StreamRecv<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) flags: MsgFlags,
}

impl Transfer for StreamRecv<'_> {
    type Output = usize;
    #[cfg(feature = "completion")]
    type Owned = Vec<u8>;

    const NAME: &'static str = "recv";
    const INTEREST: Interest = Interest::READABLE;

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        recv(fd, self.buf, self.flags)
    }

    #[cfg(feature = "completion")]
    fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<Vec<u8>> + Send> {
        let (len, flags) = (self.buf.len(), self.flags);
        let mut data = vec![0; len];

        Box::new(move |fd| {
            let count = recv(fd, &mut data, flags)?;
            data.truncate(count);
            Ok(std::mem::take(&mut data))
        })
    }

    #[cfg(feature = "completion")]
    fn complete(&mut self, data: Vec<u8>) -> Result<usize> {
        let count = data.len().min(self.buf.len());
        self.buf[..count].copy_from_slice(&data[..count]);
        Ok(count)
    }
}

/// Accepts one connection; the new descriptor is non-blocking.
pub struct Accept;

fn accept(fd: RawFd) -> io::Result<(RawFd, SockAddr)> {
    let mut addr = SockAddr::empty();
    let (addr_ptr, len_ptr) = addr.as_out();

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    let client = unsafe {
        libc::accept4(
            fd,
            addr_ptr,
            len_ptr,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )))]
    let client = {
        let client = unsafe { libc::accept(fd, addr_ptr, len_ptr) };
        if client >= 0
            && let Err(error) = super::socket::set_nonblocking(client)
        {
            unsafe { libc::close(client) };
            return Err(error);
        }
        client
    };

    if client < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((client, addr))
}

impl Transfer for Accept {
    type Output = (RawFd, SocketAddr);
    #[cfg(feature = "completion")]
    type Owned = (RawFd, SockAddr);

    const NAME: &'static str = "accept";
    const INTEREST: Interest = Interest::READABLE;

    fn attempt(&mut self, fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
        let (client, addr) = accept(fd)?;

        match peer(addr) {
            Ok(addr) => Ok((client, addr)),
            Err(error) => {
                unsafe { libc::close(client) };
                Err(error)
            }
        }
    }

    #[cfg(feature = "completion")]
    fn detach(&self) -> Box<dyn FnMut(RawFd) -> io::Result<(RawFd, SockAddr)> + Send> {
        Box::new(accept)
    }

    #[cfg(feature = "completion")]
    fn complete(&mut self, (client, addr): (RawFd, SockAddr)) -> Result<(RawFd, SocketAddr)> {
        match peer(addr) {
            Ok(addr) => Ok((client, addr)),
            Err(error) => {
                unsafe { libc::close(client) };
                Err(crate::error::Error::os(Self::NAME, error))
            }
        }
    }
}
