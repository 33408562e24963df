//! Stealing descriptors from another process.

use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use netbypass_sys::socket::{SocketArgs, new_socket, socket_args};
use netbypass_sys::{StealError, steal_fd};
use rustix::io::Errno;

use crate::common::{pidfd_supported, spawn_child, wait_exit, wait_signal};

/// Child opens `make()`, sends its descriptor number and waits for release.
fn child_holding(make: fn() -> OwnedFd) -> (nix::unistd::Pid, UnixStream, RawFd) {
    let (pid, mut sock) = spawn_child(move |mut sock| {
        let fd = make();
        if sock.write_all(&fd.as_raw_fd().to_ne_bytes()).is_err() {
            return 2;
        }
        wait_signal(&mut sock);
        0
    });
    let mut raw = [0u8; 4];
    sock.read_exact(&mut raw).unwrap();
    (pid, sock, RawFd::from_ne_bytes(raw))
}

#[test]
fn steals_child_socket() {
    if !pidfd_supported() {
        return;
    }
    let (pid, mut sock, fd) = child_holding(|| new_socket(SocketArgs::tcp4(), true).unwrap());

    let stolen = steal_fd(pid.as_raw() as u32, fd);
    sock.write_all(&[1]).unwrap();
    assert_eq!(wait_exit(pid), 0);

    let stolen = match stolen {
        Ok(fd) => fd,
        Err(StealError::Descriptor(Errno::PERM)) => return,
        Err(e) => panic!("steal: {e}"),
    };
    assert_eq!(socket_args(stolen.as_fd()).unwrap(), SocketArgs::tcp4());
    assert!(netbypass_sys::socket::is_nonblocking(stolen.as_fd()).unwrap());
}

#[test]
fn stolen_stream_outlives_child() {
    if !pidfd_supported() {
        return;
    }
    let (pid, mut sock, fd) = child_holding(|| {
        let (a, b) = UnixStream::pair().unwrap();
        (&a).write_all(b"hello").unwrap();
        std::mem::forget(a);
        b.into()
    });

    let stolen = steal_fd(pid.as_raw() as u32, fd);
    sock.write_all(&[1]).unwrap();
    assert_eq!(wait_exit(pid), 0);

    let Ok(stolen) = stolen else {
        return;
    };
    let mut stream = UnixStream::from(stolen);
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn closed_descriptor_is_descriptor_error() {
    if !pidfd_supported() {
        return;
    }
    let (pid, mut sock) = spawn_child(|mut sock| {
        wait_signal(&mut sock);
        0
    });

    let result = steal_fd(pid.as_raw() as u32, 999);
    sock.write_all(&[1]).unwrap();
    assert_eq!(wait_exit(pid), 0);

    match result {
        Err(StealError::Descriptor(e)) => assert!(e == Errno::BADF || e == Errno::PERM, "{e}"),
        other => panic!("expected descriptor error, got {other:?}"),
    }
}

#[test]
fn reaped_process_has_no_handle() {
    let (pid, _sock) = spawn_child(|_| 0);
    assert_eq!(wait_exit(pid), 0);

    match steal_fd(pid.as_raw() as u32, 0) {
        Err(StealError::ProcessHandle(e)) => assert!(e == Errno::SRCH || e == Errno::NOSYS, "{e}"),
        // Recycled PID.
        _ => {}
    }
}
