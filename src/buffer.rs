//! Growable byte buffer with prepend/readable/writable regions, and
//! fd-aware vectored read/write helpers.
//!
//! Layout, as in the original `tudou::Buffer`:
//!
//! ```text
//! [ prepend (readIdx bytes) | readable (writeIdx-readIdx) | writable (capacity-writeIdx) ]
//! ```

use std::io::{self, IoSlice};
use std::os::fd::RawFd;

/// Bytes reserved at the front for cheap header prepending. Unused by the
/// HTTP layer today but kept so future wire framing doesn't need to move
/// data around.
const K_PREPEND: usize = 8;
const K_INITIAL_SIZE: usize = 1024;
/// Size of the stack-resident spill buffer used by `read_from_fd`.
const K_EXTRA_BUF_SIZE: usize = 65536;

#[derive(Debug)]
pub struct Buffer {
    buf: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::with_capacity(K_INITIAL_SIZE)
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn with_capacity(initial_size: usize) -> Buffer {
        Buffer {
            buf: vec![0u8; K_PREPEND + initial_size],
            read_idx: K_PREPEND,
            write_idx: K_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_idx - self.read_idx
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_idx
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_idx
    }

    fn readable_slice(&self) -> &[u8] {
        &self.buf[self.read_idx..self.write_idx]
    }

    /// Looks at the readable region without consuming it.
    pub fn peek(&self) -> &[u8] {
        self.readable_slice()
    }

    /// Appends `data` to the writable region, growing if necessary.
    pub fn write(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.write_idx;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.write_idx += data.len();
    }

    /// Reads (and consumes) up to `n` bytes from the front of the readable
    /// region.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.readable_bytes());
        let out = self.buf[self.read_idx..self.read_idx + n].to_vec();
        self.advance_read(n);
        out
    }

    /// Reads (and consumes) every readable byte.
    pub fn read_all(&mut self) -> Vec<u8> {
        self.read(self.readable_bytes())
    }

    fn advance_read(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.read_idx += len;
        } else {
            self.reset_indices();
        }
    }

    fn reset_indices(&mut self) {
        self.read_idx = K_PREPEND;
        self.write_idx = K_PREPEND;
    }

    /// Ensures at least `len` writable bytes, either by sliding the
    /// readable region back to `K_PREPEND` or by growing the backing
    /// allocation.
    fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        if self.writable_bytes() + self.prependable_bytes() < len + K_PREPEND {
            self.buf.resize(self.write_idx + len, 0);
            return;
        }
        let readable = self.readable_bytes();
        self.buf.copy_within(self.read_idx..self.write_idx, K_PREPEND);
        self.read_idx = K_PREPEND;
        self.write_idx = self.read_idx + readable;
    }

    /// Scatter-reads from `fd` into the writable region plus a stack
    /// spill buffer, so a single syscall can absorb bursts larger than the
    /// current writable capacity without truncation. Returns the raw
    /// `read`/`readv` count, or the saved errno on failure; the caller
    /// decides retry-vs-close, matching the original's `(count, errno)`
    /// contract.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra_buf = [0u8; K_EXTRA_BUF_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.buf[self.write_idx..].as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extra_buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: extra_buf.len(),
            },
        ];
        let iov_cnt = if writable < extra_buf.len() { 2 } else { 1 };

        let n = syscall!(readv(fd, iov.as_mut_ptr(), iov_cnt as libc::c_int))?;
        let n = n as usize;

        if n <= writable {
            self.write_idx += n;
        } else {
            self.write_idx = self.buf.len();
            self.write(&extra_buf[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `fd` with a single `write(2)`,
    /// advancing `read_idx` on success.
    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let slice = IoSlice::new(self.readable_slice());
        let n = syscall!(write(fd, slice.as_ptr() as *const libc::c_void, slice.len()))?;
        let n = n as usize;
        self.advance_read(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut buf = Buffer::new();
        buf.write(b"hello world");
        assert_eq!(buf.readable_bytes(), 11);
        assert_eq!(buf.read(5), b"hello");
        assert_eq!(buf.readable_bytes(), 6);
        assert_eq!(buf.read(6), b" world");
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.read_idx, K_PREPEND);
        assert_eq!(buf.write_idx, K_PREPEND);
    }

    #[test]
    fn write_then_read_all_matches_single_write() {
        let mut buf = Buffer::new();
        buf.write(b"hello world");
        assert_eq!(buf.read_all(), b"hello world");
    }

    #[test]
    fn two_writes_concatenate() {
        let mut buf = Buffer::new();
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.read_all(), b"hello world");
    }

    #[test]
    fn growth_beyond_initial_capacity_preserves_bytes() {
        let mut buf = Buffer::with_capacity(4);
        let big = vec![7u8; 10_000];
        buf.write(&big);
        assert_eq!(buf.readable_bytes(), big.len());
        assert_eq!(buf.read_all(), big);
    }

    #[test]
    fn partial_read_then_more_writes_slide_correctly() {
        let mut buf = Buffer::new();
        buf.write(b"abc");
        assert_eq!(buf.read(1), b"a");
        buf.write(b"def");
        assert_eq!(buf.read_all(), b"bcdef");
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = Buffer::new();
        buf.write(b"xyz");
        assert_eq!(buf.peek(), b"xyz");
        assert_eq!(buf.readable_bytes(), 3);
    }
}
