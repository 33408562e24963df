//! `connect()` interception.
//!
//! For a `connect(fd, addr, addrlen)` made inside the sandbox:
//!
//! 1. Copy `addrlen` bytes at `addr` out of the tracee
//! 2. Anything but `AF_INET` → continue
//! 3. Loopback, sandbox ranges and ignored subnets → continue
//! 4. Notification no longer pending (tracee died, pid may be reused) → continue
//! 5. Steal `fd` from the tracee with `pidfd_getfd`
//! 6. Stolen socket not `AF_INET` → continue; not `SOCK_STREAM` → `ENOTSUP`
//! 7. Create a fresh socket with the same `(domain, type, protocol)` on the host
//! 8. Graft it over `fd` in the tracee (`SECCOMP_IOCTL_NOTIF_ADDFD` + `SETFD`)
//! 9. `connect()` it on the host and answer with that result
//!
//! Every failure before step 9 answers "continue", so the kernel runs the
//! original call inside the sandbox. Steps 1-4 perform no descriptor
//! operations. Local descriptors (stolen duplicate, substitute socket) are
//! owned values and are closed on every path when they go out of scope; the
//! tracee keeps its own reference to the substitute once grafted.
//!
//! The address is read once. A tracee that rewrites the buffer after the read
//! can still steer the original call elsewhere on the continue paths; the
//! policy is a heuristic, not a boundary.

use std::net::SocketAddrV4;
use std::os::fd::{AsFd, RawFd};

use netbypass_sys::StealError;
use netbypass_sys::socket;
use rustix::io::Errno;

use super::ops::SyscallOps;
use super::{Decision, Notification};
use crate::policy::{Policy, SkipReason, Verdict};
use crate::sockaddr::{Destination, SOCKADDR_MAX_LEN, SockaddrError};

/// What happened while handling one `connect()` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Negative descriptor or address length beyond `sockaddr_storage`;
    /// the kernel rejects these itself.
    InvalidArgs { fd: i32, addrlen: u32 },
    ReadFailed(Errno),
    Malformed(SockaddrError),
    /// Not `AF_INET`.
    OtherFamily(u16),
    Skipped {
        dest: SocketAddrV4,
        reason: SkipReason,
    },
    /// The notification went stale after the address was read.
    Stale { dest: SocketAddrV4 },
    StealFailed {
        dest: SocketAddrV4,
        error: StealError,
    },
    QueryFailed {
        dest: SocketAddrV4,
        error: Errno,
    },
    /// The live socket is not `AF_INET` although the address was.
    WrongDomain { dest: SocketAddrV4, domain: i32 },
    /// `AF_INET` but not `SOCK_STREAM`.
    WrongType { dest: SocketAddrV4, ty: i32 },
    SocketFailed {
        dest: SocketAddrV4,
        error: Errno,
    },
    GraftFailed {
        dest: SocketAddrV4,
        error: Errno,
    },
    Connected { dest: SocketAddrV4 },
    /// The host-side `connect()` failed; the tracee sees this errno.
    ConnectFailed {
        dest: SocketAddrV4,
        error: Errno,
    },
}

impl Outcome {
    pub fn decision(&self) -> Decision {
        match self {
            Self::Connected { .. } => Decision::Emulated { val: 0, error: 0 },
            Self::ConnectFailed { error, .. } => Decision::Emulated {
                val: -1,
                error: -error.raw_os_error(),
            },
            Self::WrongType { .. } => Decision::Unsupported,
            _ => Decision::Continue,
        }
    }

    /// Whether the tracee's descriptor was replaced.
    pub fn grafted(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::ConnectFailed { .. })
    }

    pub(crate) fn log(&self, notif: &Notification) {
        let pid = notif.pid;
        let fd = notif.args[0] as i32;
        match self {
            Self::InvalidArgs { fd, addrlen } => {
                tracing::debug!(pid, fd, addrlen, "invalid connect arguments, continuing");
            }
            Self::ReadFailed(e) => {
                tracing::warn!(pid, fd, error = %e, "cannot read sockaddr from tracee, continuing");
            }
            Self::Malformed(e) => tracing::debug!(pid, fd, error = %e, "malformed sockaddr, continuing"),
            Self::OtherFamily(family) => {
                tracing::trace!(pid, fd, family, "not AF_INET, continuing");
            }
            Self::Skipped { dest, reason } => {
                tracing::info!(pid, fd, %dest, %reason, "skipping");
            }
            Self::Stale { dest } => {
                tracing::debug!(pid, fd, %dest, id = notif.id, "notification went stale");
            }
            Self::StealFailed { dest, error } => {
                tracing::warn!(pid, fd, %dest, %error, "cannot steal socket, continuing");
            }
            Self::QueryFailed { dest, error } => {
                tracing::warn!(pid, fd, %dest, %error, "cannot query socket, continuing");
            }
            Self::WrongDomain { dest, domain } => {
                tracing::warn!(pid, fd, %dest, domain, "expected AF_INET socket, continuing");
            }
            Self::WrongType { dest, ty } => {
                tracing::warn!(pid, fd, %dest, ty, "expected SOCK_STREAM, returning ENOTSUP");
            }
            Self::SocketFailed { dest, error } => {
                tracing::error!(pid, fd, %dest, %error, "cannot create host socket, continuing");
            }
            Self::GraftFailed { dest, error } => {
                tracing::warn!(pid, fd, %dest, %error, "cannot inject socket, continuing");
            }
            Self::Connected { dest } => tracing::info!(pid, fd, %dest, "connected on host"),
            Self::ConnectFailed { dest, error } => {
                tracing::info!(pid, fd, %dest, %error, "host connect failed");
            }
        }
    }
}

/// Handle one intercepted `connect(fd, addr, addrlen)`.
pub fn handle_connect<O: SyscallOps>(ops: &O, policy: &Policy, notif: &Notification) -> Outcome {
    // int sockfd, const struct sockaddr *addr, socklen_t addrlen
    let fd = notif.args[0] as u32 as i32;
    let addr = notif.args[1];
    let addrlen = notif.args[2] as u32;

    if fd < 0 || addrlen as usize > SOCKADDR_MAX_LEN {
        return Outcome::InvalidArgs { fd, addrlen };
    }

    let buf = match ops.read_memory(notif.pid, addr, addrlen as usize) {
        Ok(buf) => buf,
        Err(e) => return Outcome::ReadFailed(e),
    };

    let dest = match Destination::parse(&buf) {
        Ok(Destination::Inet(dest)) => dest,
        Ok(Destination::Other(family)) => return Outcome::OtherFamily(family),
        Err(e) => return Outcome::Malformed(e),
    };

    if let Verdict::PassThrough(reason) = policy.classify(*dest.ip()) {
        return Outcome::Skipped { dest, reason };
    }

    bypass(ops, notif, fd, dest)
}

fn bypass<O: SyscallOps>(ops: &O, notif: &Notification, fd: RawFd, dest: SocketAddrV4) -> Outcome {
    // The pid is only trustworthy while the notification is pending.
    if ops.still_pending(notif.id).is_err() {
        return Outcome::Stale { dest };
    }

    let stolen = match ops.steal_fd(notif.pid, fd) {
        Ok(stolen) => stolen,
        Err(error) => return Outcome::StealFailed { dest, error },
    };

    let args = match socket::socket_args(stolen.as_fd()) {
        Ok(args) => args,
        Err(error) => return Outcome::QueryFailed { dest, error },
    };
    if args.domain != libc::AF_INET {
        return Outcome::WrongDomain {
            dest,
            domain: args.domain,
        };
    }
    if args.ty != libc::SOCK_STREAM {
        return Outcome::WrongType { dest, ty: args.ty };
    }

    // A non-blocking tracee socket expects EINPROGRESS, not a blocked call.
    let nonblocking = socket::is_nonblocking(stolen.as_fd()).unwrap_or(false);
    drop(stolen);

    let substitute = match socket::new_socket(args, nonblocking) {
        Ok(substitute) => substitute,
        Err(error) => return Outcome::SocketFailed { dest, error },
    };

    if let Err(error) = ops.graft_fd(notif.id, substitute.as_fd(), fd) {
        return Outcome::GraftFailed { dest, error };
    }

    match socket::connect_v4(&substitute, &dest) {
        Ok(()) => Outcome::Connected { dest },
        Err(error) => Outcome::ConnectFailed { dest, error },
    }
}
