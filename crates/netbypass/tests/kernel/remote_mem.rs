//! Reading another process's memory.

use netbypass_sys::read_remote;
use rustix::io::Errno;

use crate::common::{signal, spawn_child, wait_exit, wait_signal};

const PARENT: &[u8; 16] = b"parent-copy-----";
const CHILD: &[u8; 16] = b"written-by-child";

#[test]
fn reads_child_copy_not_ours() {
    let buf = Box::new(*PARENT);
    let addr = buf.as_ptr() as usize;

    let (pid, mut sock) = spawn_child(move |mut sock| {
        // Same address after fork, but now our private copy.
        unsafe { std::ptr::copy_nonoverlapping(CHILD.as_ptr(), addr as *mut u8, CHILD.len()) };
        signal(&mut sock);
        wait_signal(&mut sock);
        0
    });

    assert!(wait_signal(&mut sock));
    let result = read_remote(pid.as_raw() as u32, addr as u64, CHILD.len());
    signal(&mut sock);
    assert_eq!(wait_exit(pid), 0);

    match result {
        Ok(bytes) => assert_eq!(bytes, CHILD),
        // Restricted by Yama or a container profile.
        Err(Errno::PERM | Errno::NOSYS) => {}
        Err(e) => panic!("read_remote: {e}"),
    }
    assert_eq!(&*buf, PARENT);
}

#[test]
fn declared_length_is_upper_bound() {
    let buf = Box::new(*CHILD);
    let addr = buf.as_ptr() as u64;
    match read_remote(std::process::id(), addr, 4) {
        Ok(bytes) => assert_eq!(bytes, b"writ"),
        Err(Errno::PERM | Errno::NOSYS) => {}
        Err(e) => panic!("read_remote: {e}"),
    }
}

#[test]
fn unmapped_address_faults() {
    match read_remote(std::process::id(), 0, 16) {
        Err(e) => assert!(e == Errno::FAULT || e == Errno::PERM || e == Errno::NOSYS, "{e}"),
        Ok(bytes) => panic!("read {} bytes from address 0", bytes.len()),
    }
}

#[test]
fn exited_process_is_gone() {
    let (pid, _sock) = spawn_child(|_| 0);
    assert_eq!(wait_exit(pid), 0);

    let buf = [0u8; 16];
    match read_remote(pid.as_raw() as u32, buf.as_ptr() as u64, 16) {
        Err(e) => assert!(e == Errno::SRCH || e == Errno::PERM || e == Errno::NOSYS, "{e}"),
        // The PID was recycled by an unrelated process.
        Ok(_) => {}
    }
}
