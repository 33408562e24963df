//! Daemon configuration.
//!
//! ## Example
//!
//! ```ignore
//! use netbypass::Config;
//!
//! let config = Config::from_runtime_dir(std::env::var_os("XDG_RUNTIME_DIR"))?
//!     .ignore("192.168.0.0/16".parse()?)
//!     .pid_file("/run/user/1000/netbypass.pid");
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `socket_path` | `$XDG_RUNTIME_DIR/netbypass.sock` |
//! | `ignored_subnets` | none |
//! | `pid_file` | none |

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::policy::{Ipv4Subnet, Policy};

/// File name of the acceptor socket inside the runtime directory.
pub const SOCKET_NAME: &str = "netbypass.sock";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("XDG_RUNTIME_DIR is not set; pass an explicit socket path")]
    RuntimeDirUnset,

    #[error("runtime directory {0:?} is not absolute")]
    RelativeRuntimeDir(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Where the acceptor listens.
    pub socket_path: PathBuf,
    /// Destinations left to the sandbox in addition to the built-in ranges.
    pub ignored_subnets: Vec<Ipv4Subnet>,
    /// Written with the daemon's PID once the socket is bound.
    pub pid_file: Option<PathBuf>,
}

impl Config {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ignored_subnets: Vec::new(),
            pid_file: None,
        }
    }

    /// Socket at [`SOCKET_NAME`] inside `runtime_dir`, usually the value of
    /// `XDG_RUNTIME_DIR`.
    ///
    /// # Errors
    ///
    /// Fails if `runtime_dir` is unset, empty or relative.
    pub fn from_runtime_dir(runtime_dir: Option<OsString>) -> Result<Self, ConfigError> {
        let dir = runtime_dir
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::RuntimeDirUnset)?;
        if !dir.is_absolute() {
            return Err(ConfigError::RelativeRuntimeDir(dir));
        }
        Ok(Self::new(dir.join(SOCKET_NAME)))
    }

    /// Leave `subnet` to the sandbox's own network.
    pub fn ignore(mut self, subnet: Ipv4Subnet) -> Self {
        if !self.ignored_subnets.contains(&subnet) {
            self.ignored_subnets.push(subnet);
        }
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn policy(&self) -> Policy {
        Policy::new(self.ignored_subnets.iter().copied())
    }
}
