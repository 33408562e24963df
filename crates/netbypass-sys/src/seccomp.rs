//! Minimal seccomp-BPF notify filter.
//!
//! The supervisor itself never installs filters; a launcher does that for the
//! sandboxed process and hands over the listener fd. This module is the
//! smallest launcher-side piece needed to produce such a listener, used by the
//! integration tests and by launchers linking this crate.
//!
//! ## Filter Structure
//!
//! 1. Foreign architecture → allow (the supervisor only decodes native records)
//! 2. Load syscall number
//! 3. Listed syscalls → `SECCOMP_RET_USER_NOTIF`
//! 4. Everything else → allow

use std::os::fd::{FromRawFd, OwnedFd};

use rustix::io::Errno;

use crate::last_errno;

const SECCOMP_SET_MODE_FILTER: u32 = 1;
const SECCOMP_FILTER_FLAG_NEW_LISTENER: u32 = 1 << 3;
const SECCOMP_RET_USER_NOTIF: u32 = 0x7fc0_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_003e;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_00b7;

// Offsets into struct seccomp_data
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

/// BPF jump offsets are u8.
const MAX_NOTIFY_SYSCALLS: usize = 200;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

impl SockFprog {
    pub fn new(filter: &[SockFilter]) -> Self {
        Self {
            len: filter.len() as u16,
            filter: filter.as_ptr(),
        }
    }
}

/// Builds a filter that returns `SECCOMP_RET_USER_NOTIF` for the listed
/// syscalls and `SECCOMP_RET_ALLOW` for everything else.
///
/// # Panics
///
/// Panics if `syscalls.len()` > 200 (BPF jump offsets are u8).
pub fn build_notify_filter(syscalls: &[i64]) -> Vec<SockFilter> {
    assert!(
        syscalls.len() <= MAX_NOTIFY_SYSCALLS,
        "notify syscall list too large: {} > {}",
        syscalls.len(),
        MAX_NOTIFY_SYSCALLS
    );

    let n = syscalls.len();
    let mut filter = Vec::with_capacity(n + 6);

    filter.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
    filter.push(SockFilter::jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        AUDIT_ARCH_NATIVE,
        1,
        0,
    ));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    filter.push(SockFilter::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        OFFSET_SYSCALL_NR,
    ));

    for (i, &nr) in syscalls.iter().enumerate() {
        let notify_offset = (n - i) as u8;
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            notify_offset,
            0,
        ));
    }

    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_USER_NOTIF));

    filter
}

/// Install a notify filter on the calling thread and return its listener fd.
///
/// Sets `PR_SET_NO_NEW_PRIVS` first, so no privilege is required.
///
/// # Safety
///
/// The filter is permanent for this thread and its future children. If the
/// caller itself performs a notified syscall before handing the listener to a
/// supervisor, it blocks forever.
///
/// # Errors
///
/// Returns `Errno` if the filter cannot be installed.
pub unsafe fn install_notify_filter(filter: &[SockFilter]) -> Result<OwnedFd, Errno> {
    let fprog = SockFprog::new(filter);
    unsafe {
        if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
            return Err(last_errno());
        }

        let ret = libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            SECCOMP_FILTER_FLAG_NEW_LISTENER,
            &fprog as *const SockFprog,
        );
        if ret < 0 {
            Err(last_errno())
        } else {
            // SAFETY: On success, ret is a valid listener file descriptor.
            Ok(OwnedFd::from_raw_fd(ret as i32))
        }
    }
}

/// Returns true if seccomp is available.
pub fn seccomp_available() -> bool {
    unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) >= 0 }
}
