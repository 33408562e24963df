//! Low-level Linux syscall wrappers for the netbypass supervisor.
//!
//! This crate provides thin wrappers around the kernel interfaces the
//! supervisor needs to emulate a sandboxed `connect()` on the host network.
//! Syscalls that rustix already exposes (`pidfd_open`, `pidfd_getfd`, `uname`)
//! go through rustix; the rest are raw `libc` calls.
//!
//! ## Modules
//!
//! - **`seccomp_notify`** - `SECCOMP_RET_USER_NOTIF` records and ioctls (kernel 5.0+, `ADDFD` 5.9+)
//! - **pidfd** - Process handles and descriptor theft (kernel 5.3 / 5.6)
//! - **`remote_mem`** - Bounded copies out of another process via `process_vm_readv`
//! - **socket** - Socket introspection and creation on raw descriptors
//! - **seccomp** - Minimal notify filter used by launchers and tests
//! - **check** - Runtime kernel capability detection
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod check;
pub mod pidfd;
pub mod remote_mem;
pub mod seccomp;
pub mod seccomp_notify;
pub mod socket;

pub use check::{CheckError, SystemInfo, check};
pub use pidfd::{PidFd, StealError, steal_fd};
pub use remote_mem::read_remote;

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
