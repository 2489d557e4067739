//! File and FIFO transport
//!
//! `-` names stdin or stdout. When the path is a FIFO the opposite end is
//! opened as well and held, so the pipe does not see end-of-file while the
//! peer process comes and goes.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;
use std::time::Duration;

use super::{poll_fd, BlockSink, BlockSource, Framer};
use crate::codec::{Block, StreamParams};
use crate::error::{Result, StreamError};

fn is_fifo(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

fn open_error(name: &str) -> impl FnOnce(io::Error) -> StreamError + '_ {
    move |source| StreamError::Open {
        name: name.to_string(),
        source,
    }
}

/// Producer side of a file, FIFO or stdout
#[derive(Debug)]
pub struct FileSink {
    name: String,
    file: Option<File>,
    _hold: Option<File>,
}

impl FileSink {
    pub fn create(name: &str) -> Result<Self> {
        if name == "-" {
            let fd = io::stdout().as_fd().try_clone_to_owned().map_err(open_error(name))?;
            return Ok(Self {
                name: name.to_string(),
                file: Some(File::from(fd)),
                _hold: None,
            });
        }

        let path = Path::new(name);
        let hold = if is_fifo(path) {
            let reader = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .map_err(open_error(name))?;
            Some(reader)
        } else {
            None
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(hold.is_none())
            .mode(0o644)
            .open(path)
            .map_err(open_error(name))?;

        tracing::debug!("{}: opened for output{}", name, if hold.is_some() { " (fifo)" } else { "" });

        Ok(Self {
            name: name.to_string(),
            file: Some(file),
            _hold: hold,
        })
    }
}

impl BlockSink for FileSink {
    fn write_block(&mut self, block: &Block) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| StreamError::WriteFailed {
            name: self.name.clone(),
            source: io::Error::new(io::ErrorKind::NotConnected, "stream closed"),
        })?;

        tracing::trace!("{}: write block, {} bytes", self.name, block.as_bytes().len());
        file.write_all(block.as_bytes())
            .map_err(|source| StreamError::WriteFailed {
                name: self.name.clone(),
                source,
            })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self._hold = None;
        Ok(())
    }
}

/// Consumer side of a file, FIFO or stdin
#[derive(Debug)]
pub struct FileSource {
    file: File,
    framer: Framer,
    _hold: Option<File>,
}

impl FileSource {
    pub fn open(name: &str) -> Result<Self> {
        if name == "-" {
            let fd = io::stdin().as_fd().try_clone_to_owned().map_err(open_error(name))?;
            return Ok(Self {
                file: File::from(fd),
                framer: Framer::new(name),
                _hold: None,
            });
        }

        let path = Path::new(name);
        if !is_fifo(path) {
            let file = File::open(path).map_err(open_error(name))?;
            return Ok(Self {
                file,
                framer: Framer::new(name),
                _hold: None,
            });
        }

        // Open the read end without blocking, then hold a write end so the
        // FIFO never reports end-of-file between producers.
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(open_error(name))?;
        let hold = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(open_error(name))?;
        set_blocking(&file).map_err(open_error(name))?;

        tracing::debug!("{}: opened fifo for input", name);
        Ok(Self {
            file,
            framer: Framer::new(name),
            _hold: Some(hold),
        })
    }

    /// Bytes discarded while resynchronising
    pub fn skipped_bytes(&self) -> u64 {
        self.framer.skipped_bytes()
    }
}

fn set_blocking(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl BlockSource for FileSource {
    fn read_block(&mut self) -> Result<Option<&Block>> {
        if self.framer.read_block(&mut self.file)? {
            Ok(self.framer.current())
        } else {
            Ok(None)
        }
    }

    fn current(&self) -> Option<&Block> {
        self.framer.current()
    }

    fn params(&self) -> Option<StreamParams> {
        self.framer.params()
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if self.framer.has_buffered() {
            return Ok(true);
        }
        Ok(poll_fd(self.file.as_fd(), timeout)?)
    }
}
