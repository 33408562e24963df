//! Unix socket fd passing via `SCM_RIGHTS`.
//!
//! A launcher installs its seccomp notify filter, connects to the acceptor
//! socket and sends the listener fd as the only ancillary payload of a
//! one-byte message. The acceptor child receives it here.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("peer closed the connection without sending a descriptor")]
    Closed,

    #[error("message carried no control data")]
    NoControlMessage,

    #[error("unexpected control message (level {level}, type {ty})")]
    UnexpectedMessage { level: i32, ty: i32 },

    #[error("control data truncated")]
    Truncated,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Send a file descriptor over a unix socket using `SCM_RIGHTS`.
pub fn send_fd(socket: &UnixStream, fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw: RawFd = fd.as_raw_fd();
    let data = [0u8; 1];
    let iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: 1,
    };

    // cmsg buffer: header + one fd
    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &iov as *const _ as *mut _;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_space;

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg.is_null() {
        return Err(io::Error::other("CMSG_FIRSTHDR null"));
    }
    unsafe {
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as usize;
        std::ptr::copy_nonoverlapping(
            (&raw as *const RawFd).cast::<u8>(),
            libc::CMSG_DATA(cmsg),
            size_of::<RawFd>(),
        );
    }

    let ret = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Receive exactly one file descriptor from a unix socket.
///
/// The received descriptor is close-on-exec.
///
/// # Errors
///
/// See [`HandoffError`]. A descriptor that did arrive alongside an error
/// (wrong message type, truncation) is closed.
pub fn recv_fd(socket: &UnixStream) -> Result<OwnedFd, HandoffError> {
    let mut data = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: 1,
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_space;

    let ret = loop {
        let ret = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if ret >= 0 {
            break ret;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err.into());
        }
    };

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg.is_null() {
        return Err(if ret == 0 {
            HandoffError::Closed
        } else {
            HandoffError::NoControlMessage
        });
    }

    let (level, ty, len) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type, (*cmsg).cmsg_len) };
    if level != libc::SOL_SOCKET || ty != libc::SCM_RIGHTS {
        return Err(HandoffError::UnexpectedMessage { level, ty });
    }
    if len < unsafe { libc::CMSG_LEN(size_of::<RawFd>() as u32) } as usize {
        return Err(HandoffError::Truncated);
    }

    let mut fd: RawFd = -1;
    unsafe {
        std::ptr::copy_nonoverlapping(
            libc::CMSG_DATA(cmsg),
            (&mut fd as *mut RawFd).cast::<u8>(),
            size_of::<RawFd>(),
        );
    }
    // SAFETY: SCM_RIGHTS installed a fresh descriptor in our table.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    // More descriptors than fit were sent; the extras were discarded.
    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(HandoffError::Truncated);
    }
    Ok(fd)
}
