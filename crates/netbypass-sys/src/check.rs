//! System capability checking.
//!
//! Verifies at runtime that the kernel supports everything the supervisor
//! needs. The check is performed once and cached in a static `OnceLock`.
//!
//! ## Required Features
//!
//! | Feature | Kernel | Check Method |
//! |---------|--------|--------------|
//! | `pidfd_open` | 5.3 | implied by version |
//! | `pidfd_getfd` | 5.6 | implied by version |
//! | `SECCOMP_IOCTL_NOTIF_ADDFD` | 5.9 | `uname` syscall |
//! | Seccomp | enabled | `prctl(PR_GET_SECCOMP)` |
//! | Notification layout | - | `seccomp(SECCOMP_GET_NOTIF_SIZES)` |

use std::sync::OnceLock;

use rustix::system::uname;
use thiserror::Error;

use crate::seccomp;
use crate::seccomp_notify::{self, SeccompNotif, SeccompNotifResp};

/// Information about the system's supervisor capabilities.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub kernel_version: (u32, u32, u32),
    pub notif_size: u16,
    pub notif_resp_size: u16,
}

/// Errors that can occur during system capability checking.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("kernel version {}.{}.{} is too old, need at least {}.{}.{}", .found.0, .found.1, .found.2, .required.0, .required.1, .required.2)]
    KernelTooOld {
        required: (u32, u32, u32),
        found: (u32, u32, u32),
    },

    #[error("seccomp is not available")]
    SeccompNotAvailable,

    #[error("kernel notification records ({found} bytes) are larger than supported ({supported} bytes)")]
    NotifLayout { found: u16, supported: usize },

    #[error("failed to read kernel version")]
    KernelVersionReadFailed,
}

// SECCOMP_IOCTL_NOTIF_ADDFD landed in 5.9.
const MIN_KERNEL_VERSION: (u32, u32, u32) = (5, 9, 0);

static SYSTEM_INFO: OnceLock<Result<SystemInfo, CheckError>> = OnceLock::new();

/// Check system capabilities and cache the result.
pub fn check() -> Result<&'static SystemInfo, &'static CheckError> {
    SYSTEM_INFO.get_or_init(check_impl).as_ref()
}

fn check_impl() -> Result<SystemInfo, CheckError> {
    let kernel_version = get_kernel_version()?;
    if kernel_version < MIN_KERNEL_VERSION {
        return Err(CheckError::KernelTooOld {
            required: MIN_KERNEL_VERSION,
            found: kernel_version,
        });
    }

    if !seccomp::seccomp_available() {
        return Err(CheckError::SeccompNotAvailable);
    }

    let sizes = seccomp_notify::notif_sizes().map_err(|_| CheckError::SeccompNotAvailable)?;
    if usize::from(sizes.seccomp_notif) > size_of::<SeccompNotif>() {
        return Err(CheckError::NotifLayout {
            found: sizes.seccomp_notif,
            supported: size_of::<SeccompNotif>(),
        });
    }
    if usize::from(sizes.seccomp_notif_resp) > size_of::<SeccompNotifResp>() {
        return Err(CheckError::NotifLayout {
            found: sizes.seccomp_notif_resp,
            supported: size_of::<SeccompNotifResp>(),
        });
    }

    Ok(SystemInfo {
        kernel_version,
        notif_size: sizes.seccomp_notif,
        notif_resp_size: sizes.seccomp_notif_resp,
    })
}

fn get_kernel_version() -> Result<(u32, u32, u32), CheckError> {
    let uts = uname();
    let release = uts
        .release()
        .to_str()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;
    parse_kernel_version(release)
}

fn parse_kernel_version(release: &str) -> Result<(u32, u32, u32), CheckError> {
    let mut parts = release.split('.');

    let major = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or(CheckError::KernelVersionReadFailed)?;

    let minor = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or(CheckError::KernelVersionReadFailed)?;

    // Patch might carry a suffix like "0-generic" or "44-fc-v139"
    let patch = parts
        .next()
        .and_then(|p| p.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    Ok((major, minor, patch))
}
