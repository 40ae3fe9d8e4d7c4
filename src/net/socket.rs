//! Non-blocking socket descriptor shared by the UDP and TCP wrappers.

use super::addr::SockAddr;
use super::op::sealed::Transfer;
use super::op::{Io, Op};
use crate::error::{Error, Result};
use crate::reactor::ReactorHandle;
use crate::runtime::context;

use log::{trace, warn};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// The reactor of the runtime driving this thread.
pub(crate) fn current_reactor() -> Result<ReactorHandle> {
    context::current_reactor().ok_or(Error::NoRuntime)
}

pub(crate) fn domain_of(address: &SocketAddr) -> i32 {
    match address {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}

pub(crate) struct Socket {
    fd: RawFd,
    reactor: ReactorHandle,
}

impl Socket {
    pub(crate) fn new(domain: i32, kind: i32, reactor: ReactorHandle) -> Result<Self> {
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))]
        let fd = {
            let fd = unsafe { libc::socket(domain, kind | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0) };
            if fd < 0 {
                return Err(Error::last_os("socket"));
            }
            fd
        };

        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )))]
        let fd = {
            let fd = unsafe { libc::socket(domain, kind, 0) };
            if fd < 0 {
                return Err(Error::last_os("socket"));
            }

            let one: libc::c_int = 1;
            let configured = set_nonblocking(fd).and_then(|()| {
                let ret = unsafe {
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                    libc::setsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_NOSIGPIPE,
                        &one as *const libc::c_int as *const libc::c_void,
                        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                    )
                };
                if ret < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });

            if let Err(error) = configured {
                unsafe { libc::close(fd) };
                return Err(Error::os("socket", error));
            }
            fd
        };

        trace!("socket: opened fd {}", fd);
        Ok(Self { fd, reactor })
    }

    /// Takes ownership of a descriptor that is already non-blocking.
    pub(crate) fn from_raw(fd: RawFd, reactor: ReactorHandle) -> Self {
        Self { fd, reactor }
    }

    /// Takes ownership of a blocking descriptor and switches it to
    /// non-blocking mode.
    pub(crate) fn adopt(fd: RawFd, reactor: ReactorHandle) -> Result<Self> {
        let socket = Self::from_raw(fd, reactor);
        set_nonblocking(fd).map_err(|error| Error::os("fcntl", error))?;

        Ok(socket)
    }

    pub(crate) fn set_reuse_address(&self) -> Result<()> {
        let one: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };

        if ret < 0 {
            return Err(Error::last_os("setsockopt"));
        }

        Ok(())
    }

    pub(crate) fn bind(&self, address: &SockAddr) -> Result<()> {
        if unsafe { libc::bind(self.fd, address.as_ptr(), address.len()) } < 0 {
            return Err(Error::last_os("bind"));
        }

        Ok(())
    }

    pub(crate) fn listen(&self, backlog: i32) -> Result<()> {
        if unsafe { libc::listen(self.fd, backlog) } < 0 {
            return Err(Error::last_os("listen"));
        }

        Ok(())
    }

    /// Connects a datagram socket; the call does not block.
    pub(crate) fn connect(&self, address: &SockAddr) -> Result<()> {
        if unsafe { libc::connect(self.fd, address.as_ptr(), address.len()) } < 0 {
            return Err(Error::last_os("connect"));
        }

        Ok(())
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        let mut address = SockAddr::empty();
        let (ptr, len) = address.as_out();

        if unsafe { libc::getsockname(self.fd, ptr, len) } < 0 {
            return Err(Error::last_os("getsockname"));
        }

        SocketAddr::try_from(address).map_err(|error| Error::os("getsockname", error))
    }

    pub(crate) fn peer_addr(&self) -> Result<SocketAddr> {
        let mut address = SockAddr::empty();
        let (ptr, len) = address.as_out();

        if unsafe { libc::getpeername(self.fd, ptr, len) } < 0 {
            return Err(Error::last_os("getpeername"));
        }

        SocketAddr::try_from(address).map_err(|error| Error::os("getpeername", error))
    }

    pub(crate) fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    /// Binds `call` to this descriptor as an awaitable operation.
    pub(crate) fn op<T: Transfer>(&self, call: T) -> Op<Io<T>> {
        Io::new(call, self.fd, self.reactor.clone()).into_op()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(error) = self.reactor.remove(self.fd) {
            warn!("socket: deregistering fd {}: {}", self.fd, error);
        }

        if unsafe { libc::close(self.fd) } < 0 {
            warn!(
                "socket: closing fd {}: {}",
                self.fd,
                io::Error::last_os_error()
            );
        }
    }
}
