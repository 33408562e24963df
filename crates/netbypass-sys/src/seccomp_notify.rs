//! Seccomp user notification (`SECCOMP_RET_USER_NOTIF`) support.
//!
//! A launcher installs a filter with `SECCOMP_FILTER_FLAG_NEW_LISTENER` and
//! hands the resulting listener fd to the supervisor. The supervisor then:
//!
//! 1. Blocks in `SECCOMP_IOCTL_NOTIF_RECV` until a filtered syscall arrives
//! 2. Confirms the notification is still live with `SECCOMP_IOCTL_NOTIF_ID_VALID`
//! 3. Optionally grafts a descriptor into the target with `SECCOMP_IOCTL_NOTIF_ADDFD`
//! 4. Answers with `SECCOMP_IOCTL_NOTIF_SEND`, either an emulated result or
//!    `SECCOMP_USER_NOTIF_FLAG_CONTINUE`
//!
//! ## TOCTOU
//!
//! The target's memory and descriptor table can change between syscall entry
//! and the response. `ID_VALID` only proves the target thread is still waiting;
//! it says nothing about the memory behind pointer arguments.

use std::os::fd::{AsRawFd, BorrowedFd};

use rustix::io::Errno;

use crate::last_errno;

const SECCOMP_GET_NOTIF_SIZES: u32 = 3;

/// Let the syscall proceed as-is (supervisor declines to intervene).
pub const SECCOMP_USER_NOTIF_FLAG_CONTINUE: u32 = 1;

/// Install the new fd at exactly `newfd`, replacing whatever is there.
pub const SECCOMP_ADDFD_FLAG_SETFD: u32 = 1 << 0;
/// Atomically inject the fd and respond to the notification.
pub const SECCOMP_ADDFD_FLAG_SEND: u32 = 1 << 1;

// ioctl numbers (from <linux/seccomp.h>, identical on x86_64 and aarch64)
// SECCOMP_IOCTL_NOTIF_RECV = SECCOMP_IOWR(0, struct seccomp_notif)
// SECCOMP_IOCTL_NOTIF_SEND = SECCOMP_IOWR(1, struct seccomp_notif_resp)
// SECCOMP_IOCTL_NOTIF_ID_VALID = SECCOMP_IOW(2, __u64)
// SECCOMP_IOCTL_NOTIF_ADDFD = SECCOMP_IOW(3, struct seccomp_notif_addfd)

pub const SECCOMP_IOCTL_NOTIF_RECV: u64 = 0xc050_2100;
pub const SECCOMP_IOCTL_NOTIF_SEND: u64 = 0xc018_2101;
pub const SECCOMP_IOCTL_NOTIF_ID_VALID: u64 = 0x4008_2102;
pub const SECCOMP_IOCTL_NOTIF_ADDFD: u64 = 0x4018_2103;

/// Mirrors kernel `struct seccomp_data`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompData {
    /// Syscall number.
    pub nr: i32,
    /// Architecture (`AUDIT_ARCH_*`).
    pub arch: u32,
    pub instruction_pointer: u64,
    /// Raw syscall argument words.
    pub args: [u64; 6],
}

/// Mirrors kernel `struct seccomp_notif`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotif {
    /// Unique notification ID.
    pub id: u64,
    /// PID of the notifying thread (in the supervisor's PID namespace).
    pub pid: u32,
    /// Must be zero on receive.
    pub flags: u32,
    pub data: SeccompData,
}

/// Mirrors kernel `struct seccomp_notif_resp`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeccompNotifResp {
    /// Must match the notification ID.
    pub id: u64,
    /// Return value of the emulated syscall.
    pub val: i64,
    /// Zero or a negated errno.
    pub error: i32,
    /// `SECCOMP_USER_NOTIF_FLAG_CONTINUE` or zero.
    pub flags: u32,
}

impl SeccompNotifResp {
    /// Let the kernel run the original syscall unmodified.
    pub const fn continue_syscall(id: u64) -> Self {
        Self {
            id,
            val: 0,
            error: 0,
            flags: SECCOMP_USER_NOTIF_FLAG_CONTINUE,
        }
    }

    /// Fail the syscall with `errno` (positive errno, negated here).
    pub const fn error(id: u64, errno: i32) -> Self {
        Self {
            id,
            val: 0,
            error: -errno,
            flags: 0,
        }
    }

    /// Complete the syscall with an emulated return value and error.
    pub const fn emulated(id: u64, val: i64, error: i32) -> Self {
        Self {
            id,
            val,
            error,
            flags: 0,
        }
    }

    pub const fn is_continue(&self) -> bool {
        self.flags & SECCOMP_USER_NOTIF_FLAG_CONTINUE != 0
    }
}

/// Mirrors kernel `struct seccomp_notif_addfd`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotifAddfd {
    /// Must match the notification ID.
    pub id: u64,
    /// `SECCOMP_ADDFD_FLAG_SETFD` and/or `SECCOMP_ADDFD_FLAG_SEND`.
    pub flags: u32,
    /// The fd in the supervisor to duplicate.
    pub srcfd: u32,
    /// Target fd number (only honoured with `SETFD`).
    pub newfd: u32,
    /// `O_CLOEXEC` or zero.
    pub newfd_flags: u32,
}

impl SeccompNotifAddfd {
    /// Replace descriptor `newfd` in the target with a duplicate of `srcfd`.
    pub fn replace(id: u64, srcfd: BorrowedFd<'_>, newfd: u32) -> Self {
        Self {
            id,
            flags: SECCOMP_ADDFD_FLAG_SETFD,
            srcfd: srcfd.as_raw_fd() as u32,
            newfd,
            newfd_flags: 0,
        }
    }
}

/// Mirrors kernel `struct seccomp_notif_sizes`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeccompNotifSizes {
    pub seccomp_notif: u16,
    pub seccomp_notif_resp: u16,
    pub seccomp_data: u16,
}

/// What `poll(2)` reported for a listener fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// A notification is pending.
    Pending,
    /// Every task using the filter has exited; nothing will ever arrive.
    Hangup,
    /// Timed out with nothing pending.
    Idle,
}

/// Wait until the listener has a pending notification or its filter is gone.
///
/// `timeout_ms < 0` waits forever. A blocking `NOTIF_RECV` does not return
/// when the last filter user exits, so callers poll first.
///
/// # Errors
///
/// `EINTR` on a signal; other errors mean the fd is unusable.
pub fn wait_listener(listener: BorrowedFd<'_>, timeout_ms: i32) -> Result<ListenerState, Errno> {
    let mut pfd = libc::pollfd {
        fd: listener.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        return Err(last_errno());
    }
    if ret == 0 {
        return Ok(ListenerState::Idle);
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(Errno::BADF);
    }
    if pfd.revents & libc::POLLIN != 0 {
        Ok(ListenerState::Pending)
    } else {
        Ok(ListenerState::Hangup)
    }
}

/// Receive the next notification from the listener fd.
///
/// Blocks until one is pending.
///
/// # Errors
///
/// `ENOENT` if the target died between wake-up and receive, `EINTR` on a
/// signal, anything else means the listener is unusable.
pub fn notif_recv(listener: BorrowedFd<'_>, notif: &mut SeccompNotif) -> Result<(), Errno> {
    // The kernel rejects a receive buffer that is not zeroed.
    *notif = SeccompNotif::default();
    let ret = unsafe {
        libc::ioctl(
            listener.as_raw_fd(),
            SECCOMP_IOCTL_NOTIF_RECV as libc::Ioctl,
            notif as *mut SeccompNotif,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Send a response to a notification.
///
/// # Errors
///
/// `ENOENT` if the target is gone; other errors mean the listener is unusable.
pub fn notif_send(listener: BorrowedFd<'_>, resp: &SeccompNotifResp) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener.as_raw_fd(),
            SECCOMP_IOCTL_NOTIF_SEND as libc::Ioctl,
            resp as *const SeccompNotifResp,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Check that a notification ID is still pending.
///
/// # Errors
///
/// Returns `Errno::NOENT` if the notification is stale.
pub fn notif_id_valid(listener: BorrowedFd<'_>, id: u64) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener.as_raw_fd(),
            SECCOMP_IOCTL_NOTIF_ID_VALID as libc::Ioctl,
            &id as *const u64,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Inject a file descriptor into the notifying process.
///
/// Without `SECCOMP_ADDFD_FLAG_SEND` the notification stays pending and must
/// still be answered with [`notif_send`]. Returns the fd number in the target.
///
/// # Errors
///
/// Returns `Errno` on failure (`ENOENT` if the notification went stale).
pub fn notif_addfd(listener: BorrowedFd<'_>, addfd: &SeccompNotifAddfd) -> Result<i32, Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener.as_raw_fd(),
            SECCOMP_IOCTL_NOTIF_ADDFD as libc::Ioctl,
            addfd as *const SeccompNotifAddfd,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(ret) }
}

/// Ask the kernel for the sizes of its notification records.
///
/// # Errors
///
/// Returns `Errno` if seccomp is unavailable.
pub fn notif_sizes() -> Result<SeccompNotifSizes, Errno> {
    let mut sizes = SeccompNotifSizes::default();
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_GET_NOTIF_SIZES,
            0u32,
            &mut sizes as *mut SeccompNotifSizes,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(sizes) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes() {
        assert_eq!(size_of::<SeccompData>(), 64);
        assert_eq!(size_of::<SeccompNotif>(), 80);
        assert_eq!(size_of::<SeccompNotifResp>(), 24);
        assert_eq!(size_of::<SeccompNotifAddfd>(), 24);
        assert_eq!(size_of::<SeccompNotifSizes>(), 6);
    }

    #[test]
    fn default_notif_is_zeroed() {
        let notif = SeccompNotif::default();
        assert_eq!(notif.id, 0);
        assert_eq!(notif.pid, 0);
        assert_eq!(notif.data.nr, 0);
        assert_eq!(notif.data.args, [0; 6]);
    }

    #[test]
    fn response_constructors() {
        let cont = SeccompNotifResp::continue_syscall(7);
        assert!(cont.is_continue());
        assert_eq!(cont.error, 0);

        let err = SeccompNotifResp::error(7, libc::ENOTSUP);
        assert!(!err.is_continue());
        assert_eq!(err.error, -libc::ENOTSUP);

        let emu = SeccompNotifResp::emulated(7, -1, -libc::ECONNREFUSED);
        assert_eq!(emu.val, -1);
        assert_eq!(emu.flags, 0);
    }

    #[test]
    fn addfd_replace_sets_flag() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let fd = std::os::fd::AsFd::as_fd(&file);
        let addfd = SeccompNotifAddfd::replace(42, fd, 5);
        assert_eq!(addfd.flags, SECCOMP_ADDFD_FLAG_SETFD);
        assert_eq!(addfd.newfd, 5);
        assert_eq!(addfd.srcfd, fd.as_raw_fd() as u32);
    }

    #[test]
    fn kernel_records_fit() {
        // Skipped silently on kernels without seccomp.
        if let Ok(sizes) = notif_sizes() {
            assert!(usize::from(sizes.seccomp_notif) >= size_of::<SeccompNotif>());
            assert!(usize::from(sizes.seccomp_data) >= size_of::<SeccompData>());
        }
    }
}
