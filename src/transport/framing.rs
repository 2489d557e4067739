//! Block framing over byte streams
//!
//! Files, FIFOs and TCP connections carry blocks back to back with no
//! other delimiting. A [`Framer`] finds block boundaries, learns the
//! stream parameters from the first header, and recovers from corruption
//! by scanning byte by byte for the next block magic.

use std::io::{self, Read};

use crate::codec::{Block, BlockHeader, StreamParams, BLOCK_MAGIC, HEADER_SIZE};
use crate::error::Result;

/// Incremental block reader, independent of the byte source
///
/// The framer outlives any single reader, so a persistent listener can
/// swap in a fresh connection and keep the parameters it already knows.
#[derive(Debug)]
pub struct Framer {
    name: String,
    params: Option<StreamParams>,
    block: Option<Block>,
    /// Bytes pushed back by a resync, consumed before the reader
    carry: Vec<u8>,
    skipped: u64,
}

impl Framer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            block: None,
            carry: Vec::new(),
            skipped: 0,
        }
    }

    pub fn params(&self) -> Option<StreamParams> {
        self.params
    }

    pub fn current(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// Total bytes discarded while resynchronising
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Whether bytes are already buffered for the next read
    pub fn has_buffered(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Forget buffered bytes, e.g. after the connection they came from died
    pub fn discard_buffered(&mut self) {
        self.carry.clear();
    }

    /// Read the next block from `reader`
    ///
    /// Returns `Ok(false)` at end of stream, including a stream that ends
    /// part way through a block.
    pub fn read_block<R: Read>(&mut self, reader: &mut R) -> Result<bool> {
        let mut head = [0u8; HEADER_SIZE];

        loop {
            if !self.fill(reader, &mut head)? {
                return Ok(false);
            }

            let header = BlockHeader::decode(&head);
            if !header.has_magic() {
                if !self.resync(reader, &head)? {
                    return Ok(false);
                }
                continue;
            }

            let params = match self.params {
                Some(params) => {
                    params.check(&header, &self.name)?;
                    params
                }
                None => {
                    let params = StreamParams::from_header(&header)?;
                    tracing::info!(
                        "{}: {} channels, {} Hz, {}, {} frames per block",
                        self.name,
                        params.channels,
                        params.sample_rate,
                        params.encoding,
                        params.frames_per_block
                    );
                    self.params = Some(params);
                    params
                }
            };

            let mut block = self.block.take().unwrap_or_else(|| Block::new(params));
            let bytes = block.as_bytes_mut();
            bytes[..HEADER_SIZE].copy_from_slice(&head);
            let complete = self.fill(reader, &mut bytes[HEADER_SIZE..])?;
            self.block = Some(block);

            if !complete {
                tracing::debug!("{}: truncated final block", self.name);
                return Ok(false);
            }
            return Ok(true);
        }
    }

    /// Fill `buf` from the carry buffer then the reader; false on EOF
    fn fill<R: Read>(&mut self, reader: &mut R, buf: &mut [u8]) -> Result<bool> {
        let n = self.carry.len().min(buf.len());
        buf[..n].copy_from_slice(&self.carry[..n]);
        self.carry.drain(..n);

        match reader.read_exact(&mut buf[n..]) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Scan for the block magic, starting inside the header already read
    ///
    /// On success the magic and everything after it is pushed back, so the
    /// next header read starts exactly at the recovered block.
    fn resync<R: Read>(&mut self, reader: &mut R, head: &[u8]) -> Result<bool> {
        let magic = BLOCK_MAGIC.to_ne_bytes();
        tracing::warn!("{}: lost block sync, scanning for next header", self.name);

        if let Some(pos) = head[1..].windows(4).position(|w| w == magic) {
            let start = pos + 1;
            self.push_back(&head[start..]);
            self.skipped += start as u64;
            tracing::info!("{}: resync after {} bytes", self.name, start);
            return Ok(true);
        }

        let mut window = head[head.len() - 3..].to_vec();
        let mut skipped = (head.len() - 3) as u64;
        let mut byte = [0u8; 1];

        loop {
            if !self.fill(reader, &mut byte)? {
                self.skipped += skipped + window.len() as u64;
                return Ok(false);
            }
            window.push(byte[0]);
            if window[..] == magic[..] {
                break;
            }
            window.remove(0);
            skipped += 1;
        }

        self.push_back(&window);
        self.skipped += skipped;
        tracing::info!("{}: resync after {} bytes", self.name, skipped);
        Ok(true)
    }

    fn push_back(&mut self, bytes: &[u8]) {
        let mut carry = bytes.to_vec();
        carry.extend_from_slice(&self.carry);
        self.carry = carry;
    }
}
