//! Helpers for tests that need a second process.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, UdpSocket};
use std::os::unix::net::UnixStream;

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

/// Fork a child that runs `body` and `_exit`s with its return value.
///
/// The child gets one end of a socketpair, the caller the other.
pub fn spawn_child(body: impl FnOnce(UnixStream) -> i32) -> (Pid, UnixStream) {
    let (parent, child) = UnixStream::pair().expect("socketpair");
    match unsafe { fork() }.expect("fork") {
        ForkResult::Parent { child: pid } => {
            drop(child);
            (pid, parent)
        }
        ForkResult::Child => {
            drop(parent);
            let code = body(child);
            unsafe { libc::_exit(code) }
        }
    }
}

/// Wait for `pid` and return its exit code.
///
/// # Panics
///
/// Panics if the child was killed by a signal.
pub fn wait_exit(pid: Pid) -> i32 {
    match waitpid(pid, None).expect("waitpid") {
        WaitStatus::Exited(_, code) => code,
        other => panic!("child did not exit normally: {other:?}"),
    }
}

/// Block until the peer writes one byte.
pub fn wait_signal(sock: &mut UnixStream) -> bool {
    let mut byte = [0u8; 1];
    sock.read_exact(&mut byte).is_ok()
}

pub fn signal(sock: &mut UnixStream) {
    sock.write_all(&[1]).expect("signal peer");
}

/// Whether `pidfd_open`/`pidfd_getfd` work here.
pub fn pidfd_supported() -> bool {
    netbypass_sys::PidFd::open(std::process::id())
        .and_then(|p| {
            let stdin = p.get_fd(0)?;
            drop(stdin);
            Ok(())
        })
        .is_ok()
}

/// The address this host would use to reach the outside world, if it is one
/// the bypass intercepts.
///
/// A UDP `connect()` only selects a route; nothing is sent.
pub fn interceptable_host_ip() -> Option<Ipv4Addr> {
    let sock = UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect("192.0.2.1:9").ok()?;
    match sock.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !matches!(ip.octets()[0], 0 | 10 | 127 | 172) => Some(ip),
        _ => None,
    }
}
