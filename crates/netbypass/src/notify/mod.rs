//! Seccomp user notification handling.
//!
//! This module is the supervisor side of the bypass: it receives `connect()`
//! notifications for one sandboxed process and either lets them run in the
//! sandbox's network namespace or re-issues them on the host.
//!
//! ## Modules
//!
//! - **session** - Receive / validate / dispatch / respond loop over one listener fd
//! - **connect** - Policy and syscall emulation for an intercepted `connect()`
//! - **ops** - The kernel operations the handler performs, behind a trait
//! - **`scm_rights`** - Unix socket fd passing (launcher → supervisor listener fd transfer)

pub mod connect;
pub mod ops;
pub mod scm_rights;
pub mod session;

pub use connect::{Outcome, handle_connect};
pub use ops::{KernelOps, SyscallOps};
pub use session::{Session, SessionError, SessionStats};

use netbypass_sys::seccomp_notify::{SeccompNotif, SeccompNotifResp};

/// Syscalls the supervisor knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Connect,
    /// Anything else the launcher's filter routed to us.
    Other(i32),
}

impl Syscall {
    pub fn from_nr(nr: i32) -> Self {
        if i64::from(nr) == libc::SYS_connect {
            Self::Connect
        } else {
            Self::Other(nr)
        }
    }
}

/// A notification received from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    /// Thread that made the syscall, in our PID namespace.
    pub pid: u32,
    pub syscall: Syscall,
    pub args: [u64; 6],
}

impl From<&SeccompNotif> for Notification {
    fn from(raw: &SeccompNotif) -> Self {
        Self {
            id: raw.id,
            pid: raw.pid,
            syscall: Syscall::from_nr(raw.data.nr),
            args: raw.data.args,
        }
    }
}

/// How a notification is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the kernel run the original syscall unmodified.
    Continue,
    /// Complete the syscall with this result. `error` is zero or a negated errno.
    Emulated { val: i64, error: i32 },
    /// Fail the syscall with `ENOTSUP`.
    Unsupported,
}

impl Decision {
    pub fn into_response(self, id: u64) -> SeccompNotifResp {
        match self {
            Self::Continue => SeccompNotifResp::continue_syscall(id),
            Self::Emulated { val, error } => SeccompNotifResp::emulated(id, val, error),
            Self::Unsupported => SeccompNotifResp::error(id, libc::ENOTSUP),
        }
    }
}

/// Decide a notification. Only `connect` is emulated.
pub fn dispatch<O: SyscallOps>(
    ops: &O,
    policy: &crate::policy::Policy,
    notif: &Notification,
) -> Decision {
    match notif.syscall {
        Syscall::Connect => {
            let outcome = handle_connect(ops, policy, notif);
            outcome.log(notif);
            outcome.decision()
        }
        Syscall::Other(nr) => {
            tracing::warn!(pid = notif.pid, nr, "unexpected syscall, returning ENOTSUP");
            Decision::Unsupported
        }
    }
}
