// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Linux host side of the Trundle P2P link.
//!
//! Provides [`FdByteStream`], the byte-transport implementation the packet streams run over
//! on the host: a non-blocking serial file descriptor driven through raw `read(2)`/`write(2)`
//! calls. The burst parameters describe what the MCU end of the link can ingest.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use tracing::warn;
use trundle::p2p::P2pByteStream;

/// Bytes the MCU can take in one burst before it needs time to drain its receive FIFO.
const BURST_MAX_LENGTH: usize = 42;
/// Nanoseconds the MCU needs to ingest one byte of a burst.
const BURST_INGESTION_NS_PER_BYTE: u64 = 250_000;
/// Largest write the kernel performs atomically on the serial fd.
const ATOMIC_SEND_MAX_LENGTH: usize = 4;

/// A P2P byte transport over a non-blocking Linux file descriptor.
///
/// Clones share the same descriptor, so the input stream can own the read side and the
/// output stream the write side of one serial port. The descriptor is not closed on drop;
/// it belongs to the caller.
#[derive(Debug, Clone)]
pub struct FdByteStream {
    fd: RawFd,
}

impl FdByteStream {
    /// Wraps an already configured non-blocking descriptor.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Opens a serial device in raw, non-blocking mode at the given baud rate constant
    /// (e.g. `libc::B115200`).
    pub fn open(path: &Path, baud_rate: libc::speed_t) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut termios = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(error);
        }
        unsafe {
            libc::cfmakeraw(&mut termios);
            libc::cfsetispeed(&mut termios, baud_rate);
            libc::cfsetospeed(&mut termios, baud_rate);
        }
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(error);
        }
        Ok(Self { fd })
    }

    /// The wrapped descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl P2pByteStream for FdByteStream {
    fn read(&mut self, buffer: &mut [u8]) -> usize {
        let result = unsafe {
            libc::read(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if result < 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(libc::EAGAIN) {
                warn!(fd = self.fd, %error, "serial read failed");
            }
            return 0;
        }
        result as usize
    }

    fn write(&mut self, buffer: &[u8]) -> usize {
        let result = unsafe {
            libc::write(
                self.fd,
                buffer.as_ptr() as *const libc::c_void,
                buffer.len(),
            )
        };
        if result < 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(libc::EAGAIN) {
                warn!(fd = self.fd, %error, "serial write failed");
            }
            return 0;
        }
        result as usize
    }

    fn burst_max_length(&self) -> usize {
        BURST_MAX_LENGTH
    }

    fn burst_ns_per_byte(&self) -> u64 {
        BURST_INGESTION_NS_PER_BYTE
    }

    fn atomic_send_max_length(&self) -> usize {
        ATOMIC_SEND_MAX_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonblocking_pipe() -> (FdByteStream, FdByteStream) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        for fd in fds {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            assert!(flags >= 0);
            assert!(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } >= 0);
        }
        (FdByteStream::new(fds[0]), FdByteStream::new(fds[1]))
    }

    #[test]
    fn moves_bytes_through_a_pipe() {
        let (mut reader, mut writer) = nonblocking_pipe();
        assert_eq!(writer.write(&[1, 2, 3]), 3);
        let mut buffer = [0u8; 8];
        assert_eq!(reader.read(&mut buffer), 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
    }

    #[test]
    fn empty_pipe_reads_zero() {
        let (mut reader, _writer) = nonblocking_pipe();
        let mut buffer = [0u8; 8];
        assert_eq!(reader.read(&mut buffer), 0);
    }

    #[test]
    fn burst_parameters_match_the_link() {
        let (reader, _writer) = nonblocking_pipe();
        assert_eq!(reader.burst_max_length(), 42);
        assert_eq!(reader.burst_ns_per_byte(), 250_000);
        assert_eq!(reader.atomic_send_max_length(), 4);
    }
}
