//! Socket addresses in their kernel representation.

use bitflags::bitflags;
use libc::{sa_family_t, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// An IPv4 or IPv6 address stored in a `sockaddr_storage`, ready to hand to
/// the socket system calls.
#[derive(Clone, Copy)]
pub struct SockAddr {
    storage: sockaddr_storage,
    len: socklen_t,
}

impl SockAddr {
    /// A zeroed address with room for any family, to be filled in by the
    /// kernel.
    pub fn empty() -> Self {
        Self {
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<sockaddr_storage>() as socklen_t,
        }
    }

    pub fn family(&self) -> sa_family_t {
        self.storage.ss_family
    }

    pub fn len(&self) -> socklen_t {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_ptr(&self) -> *const sockaddr {
        &self.storage as *const sockaddr_storage as *const sockaddr
    }

    /// Pointer and length slot for calls that write an address back.
    pub(crate) fn as_out(&mut self) -> (*mut sockaddr, *mut socklen_t) {
        self.len = mem::size_of::<sockaddr_storage>() as socklen_t;

        (
            &mut self.storage as *mut sockaddr_storage as *mut sockaddr,
            &mut self.len,
        )
    }

    /// The address as a std value, `None` for families other than IPv4/IPv6.
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self.storage.ss_family as i32 {
            libc::AF_INET if self.len as usize >= mem::size_of::<sockaddr_in>() => {
                let sin = unsafe { &*(self.as_ptr() as *const sockaddr_in) };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());

                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 if self.len as usize >= mem::size_of::<sockaddr_in6>() => {
                let sin6 = unsafe { &*(self.as_ptr() as *const sockaddr_in6) };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);

                Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(address: SocketAddr) -> Self {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

        let len = match address {
            SocketAddr::V4(v4) => {
                let sin = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
                sin.sin_family = libc::AF_INET as sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                ))]
                {
                    sin.sin_len = mem::size_of::<sockaddr_in>() as u8;
                }

                mem::size_of::<sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                ))]
                {
                    sin6.sin6_len = mem::size_of::<sockaddr_in6>() as u8;
                }

                mem::size_of::<sockaddr_in6>()
            }
        };

        Self {
            storage,
            len: len as socklen_t,
        }
    }
}

impl TryFrom<SockAddr> for SocketAddr {
    type Error = io::Error;

    fn try_from(address: SockAddr) -> io::Result<Self> {
        address.as_socket_addr().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported address family {}", address.family()),
            )
        })
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_socket_addr() {
            Some(address) => write!(f, "SockAddr({})", address),
            None => write!(f, "SockAddr(family {}, {} bytes)", self.family(), self.len),
        }
    }
}

bitflags! {
    /// Protocol-level flags passed through to `send`/`recv` untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: i32 {
        const OOB = libc::MSG_OOB;
        const PEEK = libc::MSG_PEEK;
        const DONTROUTE = libc::MSG_DONTROUTE;
        const WAITALL = libc::MSG_WAITALL;
        const TRUNC = libc::MSG_TRUNC;

        const _ = !0;
    }
}
