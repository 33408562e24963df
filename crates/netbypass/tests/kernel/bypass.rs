//! A filtered child whose `connect()` calls are supervised.
//!
//! The child installs a notify filter for `connect` and hands the listener to
//! the test, which runs a [`Session`] on it. Child and supervisor share a
//! network namespace here, so pass-through and bypass both reach the same
//! listeners; the session counters tell which path was taken.

use std::io::{Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};

use netbypass::notify::scm_rights::{recv_fd, send_fd};
use netbypass::{Ipv4Subnet, Policy, Session, SessionStats};
use netbypass_sys::seccomp::{build_notify_filter, install_notify_filter};

use crate::common::{interceptable_host_ip, spawn_child, wait_exit};

/// Run `body` in a child under a `connect` notify filter supervised with
/// `policy`. Returns the child's exit code and the session counters.
fn supervised(policy: Policy, body: impl FnOnce() -> i32) -> (i32, SessionStats) {
    supervised_on(&[libc::SYS_connect], policy, body)
}

/// Like [`supervised`], with `syscalls` routed to the session.
fn supervised_on(
    syscalls: &'static [i64],
    policy: Policy,
    body: impl FnOnce() -> i32,
) -> (i32, SessionStats) {
    let (pid, sock) = spawn_child(move |sock| {
        let filter = build_notify_filter(syscalls);
        let Ok(listener) = (unsafe { install_notify_filter(&filter) }) else {
            return 90;
        };
        if send_fd(&sock, listener.as_fd()).is_err() {
            return 91;
        }
        drop(listener);
        drop(sock);
        body()
    });

    let listener = match recv_fd(&sock) {
        Ok(fd) => fd,
        Err(e) => panic!("no listener (child exited {}): {e}", wait_exit(pid)),
    };
    let session = std::thread::spawn(move || Session::new(listener, policy).run());

    let code = wait_exit(pid);
    let stats = session.join().unwrap().expect("session");
    (code, stats)
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => unreachable!("bound an IPv4 listener"),
    }
}

#[test]
#[ignore]
fn unix_connect_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peer.sock");
    let _peer = UnixListener::bind(&path).unwrap();

    let (code, stats) = supervised(Policy::default(), move || {
        i32::from(UnixStream::connect(&path).is_err())
    });

    assert_eq!(code, 0);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.continued, 1);
    assert_eq!(stats.emulated, 0);
}

#[test]
#[ignore]
fn loopback_passes_through() {
    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = peer.local_addr().unwrap();

    let (code, stats) = supervised(Policy::default(), move || {
        i32::from(TcpStream::connect(addr).is_err())
    });

    assert_eq!(code, 0);
    assert_eq!(stats.continued, 1);
    assert_eq!(stats.emulated, 0);
    peer.accept().unwrap();
}

#[test]
#[ignore]
fn datagram_connect_is_unsupported() {
    let (code, stats) = supervised(Policy::default(), || {
        let Ok(sock) = UdpSocket::bind("0.0.0.0:0") else {
            return 2;
        };
        match sock.connect("192.0.2.1:9") {
            Err(e) if e.raw_os_error() == Some(libc::ENOTSUP) => 0,
            _ => 1,
        }
    });

    assert_eq!(code, 0);
    assert_eq!(stats.unsupported, 1);
}

#[test]
#[ignore]
fn public_destination_is_connected_on_host() {
    let Some(ip) = interceptable_host_ip() else {
        return; // no route off this host
    };
    let peer = TcpListener::bind((ip, 0)).unwrap();
    let addr = peer.local_addr().unwrap();

    let (code, stats) = supervised(Policy::default(), move || {
        let Ok(mut stream) = TcpStream::connect(addr) else {
            return 1;
        };
        if stream.peer_addr().ok() != Some(addr) {
            return 2;
        }
        i32::from(stream.write_all(b"via host").is_err())
    });

    assert_eq!(code, 0);
    assert_eq!(stats.emulated, 1);
    assert_eq!(stats.continued, 0);

    let (mut conn, _) = peer.accept().unwrap();
    let mut buf = Vec::new();
    conn.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"via host");
}

#[test]
#[ignore]
fn refused_connect_reports_host_errno() {
    let Some(ip) = interceptable_host_ip() else {
        return;
    };
    let addr = {
        let peer = TcpListener::bind((ip, 0)).unwrap();
        peer.local_addr().unwrap()
    };

    let (code, stats) = supervised(Policy::default(), move || {
        match TcpStream::connect(addr) {
            Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => 0,
            _ => 1,
        }
    });

    assert_eq!(code, 0);
    assert_eq!(stats.emulated, 1);
}

#[test]
#[ignore]
fn ignored_subnet_passes_through() {
    let Some(ip) = interceptable_host_ip() else {
        return;
    };
    let peer = TcpListener::bind((ip, 0)).unwrap();
    let addr = peer.local_addr().unwrap();
    let policy = Policy::new([Ipv4Subnet::new(*v4(addr).ip(), 32)]);

    let (code, stats) = supervised(policy, move || i32::from(TcpStream::connect(addr).is_err()));

    assert_eq!(code, 0);
    assert_eq!(stats.continued, 1);
    assert_eq!(stats.emulated, 0);
}

#[test]
#[ignore]
fn unhandled_syscall_fails_with_enotsup() {
    let (code, stats) = supervised_on(&[libc::SYS_connect, libc::SYS_bind], Policy::default(), || {
        match UdpSocket::bind("0.0.0.0:0") {
            Err(e) if e.raw_os_error() == Some(libc::ENOTSUP) => 0,
            _ => 1,
        }
    });

    assert_eq!(code, 0);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.unsupported, 1);
    assert_eq!(stats.continued, 0);
}
