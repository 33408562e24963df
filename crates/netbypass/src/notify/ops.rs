//! Kernel operations used by the connect handler.
//!
//! The handler never touches the tracee directly; it goes through
//! [`SyscallOps`]. [`KernelOps`] is the real implementation. The trait
//! boundary lets tests count descriptor operations without a tracee.

use std::os::fd::{BorrowedFd, OwnedFd, RawFd};

use netbypass_sys::seccomp_notify::{SeccompNotifAddfd, notif_addfd, notif_id_valid};
use netbypass_sys::{StealError, read_remote, steal_fd};
use rustix::io::Errno;

/// Operations on another process performed while handling a notification.
pub trait SyscallOps {
    /// Copy `len` bytes at `addr` out of `pid`.
    fn read_memory(&self, pid: u32, addr: u64, len: usize) -> Result<Vec<u8>, Errno>;

    /// Fails once notification `id` is no longer pending, i.e. `pid` may
    /// now name a different process.
    fn still_pending(&self, id: u64) -> Result<(), Errno>;

    /// Duplicate descriptor `fd` of `pid` into this process.
    fn steal_fd(&self, pid: u32, fd: RawFd) -> Result<OwnedFd, StealError>;

    /// Replace descriptor `target` in the notifying process with `src`,
    /// tied to the pending notification `id`.
    fn graft_fd(&self, id: u64, src: BorrowedFd<'_>, target: RawFd) -> Result<(), Errno>;
}

/// [`SyscallOps`] backed by real syscalls and one seccomp listener.
#[derive(Debug, Clone, Copy)]
pub struct KernelOps<'a> {
    listener: BorrowedFd<'a>,
}

impl<'a> KernelOps<'a> {
    pub fn new(listener: BorrowedFd<'a>) -> Self {
        Self { listener }
    }
}

impl SyscallOps for KernelOps<'_> {
    fn read_memory(&self, pid: u32, addr: u64, len: usize) -> Result<Vec<u8>, Errno> {
        read_remote(pid, addr, len)
    }

    fn still_pending(&self, id: u64) -> Result<(), Errno> {
        notif_id_valid(self.listener, id)
    }

    fn steal_fd(&self, pid: u32, fd: RawFd) -> Result<OwnedFd, StealError> {
        steal_fd(pid, fd)
    }

    fn graft_fd(&self, id: u64, src: BorrowedFd<'_>, target: RawFd) -> Result<(), Errno> {
        let target = u32::try_from(target).map_err(|_| Errno::BADF)?;
        let addfd = SeccompNotifAddfd::replace(id, src, target);
        notif_addfd(self.listener, &addfd).map(|_| ())
    }
}
