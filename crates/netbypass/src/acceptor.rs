//! Session acceptor.
//!
//! Listens on a Unix socket for launchers handing over a seccomp listener.
//! Every connection is served by a forked child that receives the listener
//! fd, runs one [`Session`] and exits; the parent never touches the
//! descriptor. A crashing session therefore cannot take the daemon down.

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use thiserror::Error;

use crate::config::Config;
use crate::notify::Session;
use crate::notify::scm_rights::recv_fd;
use crate::policy::Policy;

const BACKLOG: i32 = 128;

#[derive(Debug, Error)]
pub enum AcceptorError {
    #[error("removing stale socket {path}: {source}")]
    StaleSocket { path: PathBuf, source: io::Error },

    #[error("binding {path}: {source}")]
    Bind { path: PathBuf, source: Errno },

    #[error("accept: {0}")]
    Accept(io::Error),

    #[error("fork: {0}")]
    Fork(Errno),
}

/// Bound acceptor socket.
#[derive(Debug)]
pub struct Acceptor {
    listener: UnixListener,
    path: PathBuf,
    policy: Policy,
}

impl Acceptor {
    /// Bind the configured socket, replacing a stale one left by a previous run.
    ///
    /// # Errors
    ///
    /// See [`AcceptorError`].
    pub fn bind(config: &Config) -> Result<Self, AcceptorError> {
        let path = config.socket_path().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(AcceptorError::StaleSocket { path, source }),
        }

        let listener = listen_unix(&path).map_err(|source| AcceptorError::Bind {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "listening");

        Ok(Self {
            listener,
            path,
            policy: config.policy(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept and fork until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns on a non-transient accept error or a failed fork.
    pub fn run(&self) -> Result<(), AcceptorError> {
        loop {
            reap_children();
            self.serve_one()?;
        }
    }

    /// Accept one connection and fork a session for it.
    ///
    /// Returns the child's PID, or `None` if a transient accept error was
    /// swallowed.
    ///
    /// # Errors
    ///
    /// See [`Acceptor::run`].
    pub fn serve_one(&self) -> Result<Option<Pid>, AcceptorError> {
        let conn = match self.listener.accept() {
            Ok((conn, _)) => conn,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(AcceptorError::Accept(e)),
        };

        // SAFETY: the child only runs the session and exits with _exit.
        match unsafe { fork() }.map_err(AcceptorError::Fork)? {
            ForkResult::Parent { child } => {
                tracing::debug!(pid = child.as_raw(), "forked session");
                drop(conn);
                Ok(Some(child))
            }
            ForkResult::Child => {
                let code = self.session_child(&conn);
                unsafe { libc::_exit(code) }
            }
        }
    }

    /// Body of a forked session. Only called in the child, which leaves
    /// through `_exit` without running destructors.
    fn session_child(&self, conn: &UnixStream) -> i32 {
        // SAFETY: `self.listener` is never dropped in the child, so this is
        // the only close of its descriptor in this process. Keeping it open
        // would let the socket outlive the daemon and accept connections
        // nobody serves.
        unsafe { libc::close(self.listener.as_raw_fd()) };

        let fd = match recv_fd(conn) {
            Ok(fd) => fd,
            Err(e) => {
                tracing::warn!(error = %e, "no listener fd received");
                return 1;
            }
        };

        match Session::new(fd, self.policy.clone()).run() {
            Ok(_) => 0,
            Err(_) => 1,
        }
    }
}

fn listen_unix(path: &Path) -> Result<UnixListener, Errno> {
    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    bind(fd.as_raw_fd(), &UnixAddr::new(path)?)?;
    listen(&fd, Backlog::new(BACKLOG)?)?;
    Ok(UnixListener::from(fd))
}

/// Collect every exited session child without blocking.
pub fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(WaitStatus::Exited(pid, code)) => {
                tracing::debug!(pid = pid.as_raw(), code, "session exited");
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                tracing::warn!(pid = pid.as_raw(), %signal, "session killed");
            }
            Ok(_) => {}
        }
    }
}
