//! Notification session over one seccomp listener.
//!
//! Runs in a forked acceptor child, handling intercepted syscalls from one
//! sandboxed process tree until every task using the filter has exited.
//!
//! ## Loop
//!
//! 1. Poll the listener; `POLLHUP` ends the session
//! 2. `NOTIF_RECV`
//! 3. `NOTIF_ID_VALID`; a stale id is dropped without a response
//! 4. [`dispatch`](super::dispatch) to a [`Decision`]
//! 5. `NOTIF_SEND`

use std::fmt;
use std::os::fd::{AsFd, OwnedFd};

use netbypass_sys::seccomp_notify::{
    ListenerState, SeccompNotif, notif_id_valid, notif_recv, notif_send, wait_listener,
};
use rustix::io::Errno;
use thiserror::Error;

use super::{Decision, KernelOps, Notification, dispatch};
use crate::policy::Policy;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("waiting on listener: {0}")]
    Poll(Errno),

    #[error("receiving notification: {0}")]
    Receive(Errno),

    #[error("responding to notification {id}: {error}")]
    Respond { id: u64, error: Errno },
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    /// Dropped because the id was no longer pending.
    pub stale: u64,
    pub continued: u64,
    pub emulated: u64,
    pub unsupported: u64,
}

impl SessionStats {
    fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Continue => self.continued += 1,
            Decision::Emulated { .. } => self.emulated += 1,
            Decision::Unsupported => self.unsupported += 1,
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} stale, {} continued, {} emulated, {} unsupported",
            self.received, self.stale, self.continued, self.emulated, self.unsupported
        )
    }
}

/// One supervised sandbox.
#[derive(Debug)]
pub struct Session {
    listener: OwnedFd,
    policy: Policy,
    stats: SessionStats,
}

impl Session {
    pub fn new(listener: OwnedFd, policy: Policy) -> Self {
        Self {
            listener,
            policy,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Handle notifications until the filter has no users left.
    ///
    /// # Errors
    ///
    /// Fails when the listener becomes unusable. Counters up to that point
    /// remain available through [`Session::stats`].
    pub fn run(&mut self) -> Result<SessionStats, SessionError> {
        tracing::debug!(policy = ?self.policy.ignored(), "session started");
        let result = self.serve();
        match &result {
            Ok(stats) => tracing::info!(%stats, "session ended"),
            Err(e) => tracing::error!(stats = %self.stats, error = %e, "session failed"),
        }
        result
    }

    fn serve(&mut self) -> Result<SessionStats, SessionError> {
        let mut raw = SeccompNotif::default();
        loop {
            match wait_listener(self.listener.as_fd(), -1) {
                Ok(ListenerState::Pending) => {}
                Ok(ListenerState::Hangup) => return Ok(self.stats),
                Ok(ListenerState::Idle) | Err(Errno::INTR) => continue,
                Err(e) => return Err(SessionError::Poll(e)),
            }

            match notif_recv(self.listener.as_fd(), &mut raw) {
                Ok(()) => {}
                // The tracee died between poll and receive.
                Err(Errno::NOENT | Errno::INTR) => continue,
                Err(e) => return Err(SessionError::Receive(e)),
            }
            self.stats.received += 1;
            self.handle(&Notification::from(&raw))?;
        }
    }

    fn handle(&mut self, notif: &Notification) -> Result<(), SessionError> {
        if notif_id_valid(self.listener.as_fd(), notif.id).is_err() {
            tracing::debug!(id = notif.id, pid = notif.pid, "notification went stale");
            self.stats.stale += 1;
            return Ok(());
        }

        let ops = KernelOps::new(self.listener.as_fd());
        let decision = dispatch(&ops, &self.policy, notif);
        self.stats.record(decision);

        match notif_send(self.listener.as_fd(), &decision.into_response(notif.id)) {
            Ok(()) => Ok(()),
            // Killed after we decided; nothing is waiting for the answer.
            Err(Errno::NOENT) => {
                tracing::debug!(id = notif.id, pid = notif.pid, "tracee gone before response");
                Ok(())
            }
            Err(error) => Err(SessionError::Respond {
                id: notif.id,
                error,
            }),
        }
    }
}
