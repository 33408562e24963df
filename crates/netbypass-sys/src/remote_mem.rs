//! Bounded reads from another process's address space.
//!
//! Uses `process_vm_readv(2)` rather than `/proc/pid/mem`: one syscall, no
//! file to open, and the same ptrace access check.

use rustix::io::Errno;

use crate::last_errno;

/// Copy `len` bytes at `addr` out of process `pid`.
///
/// The returned buffer is truncated to the number of bytes the kernel
/// actually transferred; a partial read is never padded back to `len`.
///
/// # Errors
///
/// `ESRCH` if the process is gone, `EFAULT` for an unmapped range, `EPERM`
/// without ptrace rights over the target.
pub fn read_remote(pid: u32, addr: u64, len: usize) -> Result<Vec<u8>, Errno> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let pid = libc::pid_t::try_from(pid).map_err(|_| Errno::INVAL)?;

    let mut buf = vec![0u8; len];
    let local = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: len,
    };
    let remote = libc::iovec {
        iov_base: addr as usize as *mut libc::c_void,
        iov_len: len,
    };

    let ret = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
    if ret < 0 {
        return Err(last_errno());
    }
    buf.truncate(ret as usize);
    Ok(buf)
}
