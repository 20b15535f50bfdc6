use std::io;

use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::Pid;
use crate::Result;

/// The maximum number of bytes a single read will transfer. Guards
/// against degenerate region sizes blowing up our allocation.
const MAX_READ_SIZE: usize = 16 * 1024 * 1024;


/// A reader for the address space of another process, using the
/// `process_vm_readv` system call.
///
/// Reading requires ptrace-style permission on the target, i.e., the
/// caller typically has to be the target's owner or privileged.
#[derive(Clone, Copy, Debug)]
pub struct RemoteMemory {
    pid: Pid,
}

impl RemoteMemory {
    /// Create a reader for the process identified by `pid`.
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Read `len` bytes starting at `addr` in the target's address
    /// space.
    ///
    /// The read is all-or-nothing: a transfer shorter than requested,
    /// which the kernel reports when the tail of the range is unmapped,
    /// is an error.
    pub fn read(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        if len > MAX_READ_SIZE {
            return Err(Error::with_invalid_input(format!(
                "read of {len} bytes exceeds the {MAX_READ_SIZE} byte limit"
            )))
        }

        let mut buf = vec![0u8; len];
        if len == 0 {
            return Ok(buf)
        }

        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: addr as *mut libc::c_void,
            iov_len: len,
        };
        // SAFETY: Both iovecs describe valid buffers for the duration
        //         of the call; the remote one is validated by the
        //         kernel.
        let rc = unsafe {
            libc::process_vm_readv(
                self.pid.resolve() as libc::pid_t,
                &local,
                1,
                &remote,
                1,
                0,
            )
        };
        if rc < 0 {
            return Err(Error::from(io::Error::last_os_error())
                .with_context(|| {
                    format!(
                        "failed to read {len} bytes at {addr:#x} from process {}",
                        self.pid
                    )
                }))
        }

        let read = rc as usize;
        if read != len {
            return Err(Error::with_unexpected_eof(format!(
                "short read at {addr:#x} from process {}: {read} of {len} bytes",
                self.pid
            )))
        }
        Ok(buf)
    }
}
