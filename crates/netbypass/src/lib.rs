//! netbypass: host network access for rootless sandboxes
//!
//! A sandbox in its own network namespace reaches the outside world through a
//! slow userspace network stack. This crate runs next to it as a seccomp
//! user-notification supervisor: when the sandboxed process calls
//! `connect()` on a TCP/IPv4 socket, the supervisor creates an equivalent
//! socket on the host, puts it in place of the sandbox's descriptor and
//! connects it there. Traffic then flows through the host kernel directly.
//!
//! - **acceptor** - Unix socket daemon, one forked session per sandbox
//! - **notify** - Notification session and the `connect()` handler
//! - **policy** - Which destinations stay inside the sandbox
//! - **sockaddr** - Decoding addresses copied from the sandbox
//! - **config** - Socket path and policy settings
//!
//! ## Quick Start
//!
//! ```ignore
//! use netbypass::{Acceptor, Config};
//!
//! let config = Config::from_runtime_dir(std::env::var_os("XDG_RUNTIME_DIR"))?;
//! Acceptor::bind(&config)?.run()?;
//! ```
//!
//! ## Caveats
//!
//! The destination is read from the sandbox's memory once, before acting on
//! it. Another thread in the sandbox can change the buffer in between, so the
//! destination policy is a convenience filter, not an access control.
//!
//! ## Requirements
//!
//! - Linux kernel 5.9+ (`SECCOMP_IOCTL_NOTIF_ADDFD`)
//! - `PTRACE_MODE_ATTACH` over the sandboxed processes (same user, Yama
//!   `ptrace_scope` ≤ 1 with the supervisor as an ancestor, or `CAP_SYS_PTRACE`)

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod acceptor;
pub mod config;
pub mod notify;
pub mod policy;
pub mod sockaddr;

pub use acceptor::{Acceptor, AcceptorError};
pub use config::{Config, ConfigError};
pub use notify::scm_rights::HandoffError;
pub use notify::{Decision, Session, SessionError, SessionStats};
pub use policy::{Ipv4Subnet, Policy, SkipReason, Verdict};
