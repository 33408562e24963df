//! Socket introspection and creation on raw descriptors.
//!
//! The supervisor holds sockets it did not create (stolen via `pidfd_getfd`)
//! and has to recreate them with the same `socket(2)` arguments.

use std::net::SocketAddrV4;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use rustix::io::Errno;

use crate::last_errno;

/// The `(domain, type, protocol)` triple a socket was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketArgs {
    pub domain: i32,
    /// Type without `SOCK_NONBLOCK`/`SOCK_CLOEXEC` (as reported by `SO_TYPE`).
    pub ty: i32,
    pub protocol: i32,
}

impl SocketArgs {
    pub const fn tcp4() -> Self {
        Self {
            domain: libc::AF_INET,
            ty: libc::SOCK_STREAM,
            protocol: libc::IPPROTO_TCP,
        }
    }
}

fn getsockopt_int(fd: BorrowedFd<'_>, opt: libc::c_int) -> Result<i32, Errno> {
    let mut value: libc::c_int = 0;
    let mut len = size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            opt,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(value) }
}

/// Query `SO_DOMAIN`, `SO_TYPE` and `SO_PROTOCOL`.
///
/// # Errors
///
/// `ENOTSOCK` if `fd` is not a socket.
pub fn socket_args(fd: BorrowedFd<'_>) -> Result<SocketArgs, Errno> {
    Ok(SocketArgs {
        domain: getsockopt_int(fd, libc::SO_DOMAIN)?,
        ty: getsockopt_int(fd, libc::SO_TYPE)?,
        protocol: getsockopt_int(fd, libc::SO_PROTOCOL)?,
    })
}

/// Whether the open file description behind `fd` has `O_NONBLOCK` set.
///
/// # Errors
///
/// `EBADF` if `fd` is not open.
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> Result<bool, Errno> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        Err(last_errno())
    } else {
        Ok(flags & libc::O_NONBLOCK != 0)
    }
}

/// Create a close-on-exec socket with the given arguments.
///
/// # Errors
///
/// Returns `Errno` from `socket(2)`.
pub fn new_socket(args: SocketArgs, nonblocking: bool) -> Result<OwnedFd, Errno> {
    let mut ty = args.ty | libc::SOCK_CLOEXEC;
    if nonblocking {
        ty |= libc::SOCK_NONBLOCK;
    }
    let fd = unsafe { libc::socket(args.domain, ty, args.protocol) };
    if fd < 0 {
        Err(last_errno())
    } else {
        // SAFETY: socket() returned a fresh descriptor we now own.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

/// Encode an IPv4 socket address in kernel layout (network byte order).
pub fn sockaddr_in(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        },
        sin_zero: [0; 8],
    }
}

/// `connect(2)` an IPv4 socket.
///
/// # Errors
///
/// Returns the errno `connect` failed with (`ECONNREFUSED`, `EINPROGRESS`
/// for non-blocking sockets, ...).
pub fn connect_v4(fd: impl AsFd, addr: &SocketAddrV4) -> Result<(), Errno> {
    let raw = sockaddr_in(addr);
    let ret = unsafe {
        libc::connect(
            fd.as_fd().as_raw_fd(),
            (&raw as *const libc::sockaddr_in).cast(),
            size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}
