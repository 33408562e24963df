//! Process handles and cross-process descriptor duplication.
//!
//! `pidfd_open(2)` (kernel 5.3) returns a stable handle to a process that
//! cannot be confused with a recycled PID. `pidfd_getfd(2)` (kernel 5.6)
//! duplicates one of that process's descriptors into ours; it needs
//! `PTRACE_MODE_ATTACH_REALCREDS` over the target.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

use rustix::io::Errno;
use rustix::process::{Pid, PidfdFlags, PidfdGetfdFlags, pidfd_getfd, pidfd_open};
use thiserror::Error;

/// Failure while stealing a descriptor from another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StealError {
    /// The process handle could not be obtained (the process exited, or the
    /// kernel lacks `pidfd_open`).
    #[error("pidfd_open: {0}")]
    ProcessHandle(Errno),

    /// The descriptor is not open in the target (closed or never existed), or
    /// the kernel lacks `pidfd_getfd`.
    #[error("pidfd_getfd: {0}")]
    Descriptor(Errno),
}

/// An owned process handle.
#[derive(Debug)]
pub struct PidFd(OwnedFd);

impl PidFd {
    /// Open a handle to `pid`.
    ///
    /// # Errors
    ///
    /// `ESRCH` if no such process, `EINVAL` for a non-positive pid, `ENOSYS`
    /// on kernels older than 5.3.
    pub fn open(pid: u32) -> Result<Self, Errno> {
        let raw = i32::try_from(pid).map_err(|_| Errno::INVAL)?;
        let pid = Pid::from_raw(raw).ok_or(Errno::INVAL)?;
        pidfd_open(pid, PidfdFlags::empty()).map(Self)
    }

    /// Duplicate descriptor `target` from the process into the caller.
    ///
    /// The duplicate refers to the same open file description and is created
    /// with `O_CLOEXEC`.
    ///
    /// # Errors
    ///
    /// `EBADF` if `target` is not open in the process, `EPERM` without ptrace
    /// rights, `ENOSYS` on kernels older than 5.6.
    pub fn get_fd(&self, target: RawFd) -> Result<OwnedFd, Errno> {
        pidfd_getfd(&self.0, target, PidfdGetfdFlags::empty())
    }
}

impl AsFd for PidFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Steal descriptor `target` out of process `pid`.
///
/// The process handle lives only for the duration of this call.
///
/// # Errors
///
/// See [`StealError`].
pub fn steal_fd(pid: u32, target: RawFd) -> Result<OwnedFd, StealError> {
    let pidfd = PidFd::open(pid).map_err(StealError::ProcessHandle)?;
    pidfd.get_fd(target).map_err(StealError::Descriptor)
}
