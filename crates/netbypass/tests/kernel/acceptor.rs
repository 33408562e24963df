//! Socket handoff and forked sessions.

use std::io;
use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use netbypass::notify::scm_rights::send_fd;
use netbypass::{Acceptor, Config};

use crate::common::wait_exit;

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

#[test]
fn session_child_exits_cleanly_on_hangup() {
    let dir = tempfile::tempdir().unwrap();
    let acceptor = Acceptor::bind(&Config::new(dir.path().join("nb.sock"))).unwrap();

    let launcher = UnixStream::connect(acceptor.path()).unwrap();
    // A descriptor that reports POLLHUP, like a listener whose tracee exited.
    let (read, write) = pipe();
    drop(write);
    send_fd(&launcher, read.as_fd()).unwrap();
    drop(read);

    let child = acceptor.serve_one().unwrap().expect("forked");
    assert_eq!(wait_exit(child), 0);
}

#[test]
fn missing_handoff_fails_the_child_only() {
    let dir = tempfile::tempdir().unwrap();
    let acceptor = Acceptor::bind(&Config::new(dir.path().join("nb.sock"))).unwrap();

    drop(UnixStream::connect(acceptor.path()).unwrap());
    let child = acceptor.serve_one().unwrap().expect("forked");
    assert_eq!(wait_exit(child), 1);

    // The acceptor keeps serving.
    let launcher = UnixStream::connect(acceptor.path()).unwrap();
    let (read, write) = pipe();
    drop(write);
    send_fd(&launcher, read.as_fd()).unwrap();
    let child = acceptor.serve_one().unwrap().expect("forked");
    assert_eq!(wait_exit(child), 0);
}

#[test]
fn session_child_drops_the_accept_socket() {
    let dir = tempfile::tempdir().unwrap();
    let acceptor = Acceptor::bind(&Config::new(dir.path().join("nb.sock"))).unwrap();
    let path = acceptor.path().to_path_buf();

    let launcher = UnixStream::connect(&path).unwrap();
    let child = acceptor.serve_one().unwrap().expect("forked");

    // Created after the fork so only the parent holds the write end; the
    // session stays up until it is dropped.
    let (read, write) = pipe();
    send_fd(&launcher, read.as_fd()).unwrap();
    drop(read);

    drop(acceptor);
    let err = UnixStream::connect(&path).expect_err("socket still accepting");
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

    drop(write);
    assert_eq!(wait_exit(child), 0);
}
