//! Transport drivers
//!
//! Every backend moves whole blocks. Producers hand blocks to a
//! [`BlockSink`]; consumers pull them from a [`BlockSource`], which learns
//! the stream parameters from the first block it sees.

pub mod file;
pub mod framing;
pub mod net;
pub mod ring;

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use crate::codec::{Block, StreamParams};
use crate::error::Result;

pub use file::{FileSink, FileSource};
pub use framing::Framer;
pub use net::{NetSink, NetSource};
pub use ring::{RingBuffer, RingSink, RingSource, SlotIndex};

/// Write side of a transport
pub trait BlockSink: Send {
    /// Deliver one complete block
    fn write_block(&mut self, block: &Block) -> Result<()>;

    /// Flush and release the underlying resource
    fn close(&mut self) -> Result<()>;
}

/// Read side of a transport
pub trait BlockSource: Send {
    /// Advance to the next block
    ///
    /// `Ok(None)` marks the end of the stream. Recoverable conditions
    /// (resync, reconnects, waiting on the ring buffer) are handled inside.
    fn read_block(&mut self) -> Result<Option<&Block>>;

    /// The block most recently returned by [`BlockSource::read_block`]
    fn current(&self) -> Option<&Block>;

    /// Stream parameters, once the first block has been seen
    fn params(&self) -> Option<StreamParams>;

    /// Wait up to `timeout` for the next block to be readable
    fn poll(&mut self, timeout: Duration) -> Result<bool>;
}

/// How a ring buffer consumer waits for the producer
pub trait WaitStrategy: Send {
    /// Called each time the next slot is not ready yet; `interval` is the
    /// nominal duration of one block
    fn wait(&mut self, interval: Duration);
}

/// Sleep for one block interval between checks
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWait;

impl WaitStrategy for SleepWait {
    fn wait(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Wait for `fd` to become readable, up to `timeout`
pub fn poll_fd(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
        if rc >= 0 {
            return Ok(rc > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_fd() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!poll_fd(b.as_fd(), Duration::from_millis(10)).unwrap());
        a.write_all(b"x").unwrap();
        assert!(poll_fd(b.as_fd(), Duration::from_millis(1000)).unwrap());
    }
}
