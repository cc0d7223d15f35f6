//! Fatal error reporting.
//!
//! Nothing here allocates: by the time an invalid free is detected the heap
//! may be corrupt, and the guard may be running inside the allocator itself.

use core::fmt::{self, Write};

use crate::error::PhcError;

/// Abort with a diagnostic message to stderr.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

/// Report an invalid free of a guarded allocation and abort.
#[cold]
#[inline(never)]
pub fn fatal_invalid_free(err: &PhcError) -> ! {
    let mut buf = StackBuf::<512>::new();
    let _ = writeln!(buf, "phcguard: {err}");
    abort_with_message(buf.as_str())
}

/// Fixed-capacity formatting buffer. Output past the end is dropped.
pub struct StackBuf<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> StackBuf<N> {
    pub const fn new() -> Self {
        StackBuf {
            bytes: [0; N],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // Truncation happens on char boundaries, see write_str.
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("phcguard: fatal error\n")
    }
}

impl<const N: usize> Default for StackBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}
