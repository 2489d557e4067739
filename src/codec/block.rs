//! Block header and block buffer
//!
//! Wire layout of the 48-byte header, host byte order:
//!
//! ```text
//!  0  magic            u32
//!  4  encoding flags   u32
//!  8  frames/block     u32
//! 12  channels         u32
//! 16  sample rate      u32
//! 20  seconds          u32
//! 24  nanoseconds      u32
//! 28  valid            u32
//! 32  frames used      u32
//! 36  reserved         u32
//! 40  srcal            f64
//! ```

use bytes::{Buf, BufMut};

use super::Encoding;
use crate::error::{CodecError, StreamError};
use crate::time::Timestamp;

/// Magic value opening every block header
pub const BLOCK_MAGIC: u32 = 27859;

/// Size of the encoded block header in bytes
pub const HEADER_SIZE: usize = 48;

/// Byte offset of the magic field
pub const MAGIC_OFFSET: usize = 0;
/// Byte offset of the timestamp seconds field
pub const SECS_OFFSET: usize = 20;
/// Byte offset of the timestamp nanoseconds field
pub const NSEC_OFFSET: usize = 24;
/// Byte offset of the valid flag
pub const VALID_OFFSET: usize = 28;

pub const DEFAULT_FRAMES_PER_BLOCK: u32 = 8192;
pub const MAX_FRAMES_PER_BLOCK: u32 = 262_144;

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHeader {
    pub magic: u32,
    pub flags: u32,
    pub frames_per_block: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub secs: u32,
    pub nsec: u32,
    pub valid: u32,
    pub frames: u32,
    pub srcal: f64,
}

impl BlockHeader {
    /// Fresh header for `params`, not yet valid and holding no frames
    pub fn new(params: &StreamParams) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            flags: params.encoding.flags(),
            frames_per_block: params.frames_per_block,
            channels: params.channels,
            sample_rate: params.sample_rate,
            secs: 0,
            nsec: 0,
            valid: 0,
            frames: 0,
            srcal: 1.0,
        }
    }

    /// Decode from the first [`HEADER_SIZE`] bytes of `src`
    pub fn decode(src: &[u8]) -> Self {
        let mut buf = &src[..HEADER_SIZE];
        let magic = buf.get_u32_ne();
        let flags = buf.get_u32_ne();
        let frames_per_block = buf.get_u32_ne();
        let channels = buf.get_u32_ne();
        let sample_rate = buf.get_u32_ne();
        let secs = buf.get_u32_ne();
        let nsec = buf.get_u32_ne();
        let valid = buf.get_u32_ne();
        let frames = buf.get_u32_ne();
        let _reserved = buf.get_u32_ne();
        let srcal = buf.get_f64_ne();

        Self {
            magic,
            flags,
            frames_per_block,
            channels,
            sample_rate,
            secs,
            nsec,
            valid,
            frames,
            srcal,
        }
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `dst`
    pub fn encode(&self, dst: &mut [u8]) {
        let mut buf = &mut dst[..HEADER_SIZE];
        buf.put_u32_ne(self.magic);
        buf.put_u32_ne(self.flags);
        buf.put_u32_ne(self.frames_per_block);
        buf.put_u32_ne(self.channels);
        buf.put_u32_ne(self.sample_rate);
        buf.put_u32_ne(self.secs);
        buf.put_u32_ne(self.nsec);
        buf.put_u32_ne(self.valid);
        buf.put_u32_ne(self.frames);
        buf.put_u32_ne(0);
        buf.put_f64_ne(self.srcal);
    }

    pub fn has_magic(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::from_wire(self.secs, self.nsec)
    }

    pub fn set_timestamp(&mut self, t: Timestamp) {
        (self.secs, self.nsec) = t.to_wire();
    }
}

/// Parameters fixed for the life of one producer or consumer attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub channels: u32,
    pub sample_rate: u32,
    pub encoding: Encoding,
    pub frames_per_block: u32,
}

impl StreamParams {
    /// Producer-side parameters, frames per block chosen from the rate
    pub fn new(channels: u32, sample_rate: u32, encoding: Encoding) -> Self {
        Self {
            channels,
            sample_rate,
            encoding,
            frames_per_block: Self::choose_frames_per_block(sample_rate),
        }
    }

    /// Block length giving a handful of blocks per second
    ///
    /// 8192 frames by default; halved at low rates while fewer than three
    /// blocks per second would result, doubled at high rates while more
    /// than 25 would.
    pub fn choose_frames_per_block(sample_rate: u32) -> u32 {
        let mut bsize = DEFAULT_FRAMES_PER_BLOCK;

        if sample_rate < 16_000 {
            while bsize > 1 && sample_rate / bsize < 3 {
                bsize /= 2;
            }
        }

        if sample_rate > 192_000 {
            while bsize < MAX_FRAMES_PER_BLOCK && sample_rate / bsize > 25 {
                bsize *= 2;
            }
        }

        bsize
    }

    /// Consumer-side parameters learned from a block header
    pub fn from_header(header: &BlockHeader) -> Result<Self, CodecError> {
        if !header.has_magic() {
            return Err(CodecError::InvalidHeader(format!(
                "bad magic {:08x}",
                header.magic
            )));
        }
        if header.channels == 0 || header.frames_per_block == 0 || header.sample_rate == 0 {
            return Err(CodecError::InvalidHeader(format!(
                "{} channels, {} frames per block, rate {}",
                header.channels, header.frames_per_block, header.sample_rate
            )));
        }

        Ok(Self {
            channels: header.channels,
            sample_rate: header.sample_rate,
            encoding: Encoding::from_flags(header.flags)?,
            frames_per_block: header.frames_per_block,
        })
    }

    /// Whether a header describes the same stream layout
    pub fn matches(&self, header: &BlockHeader) -> bool {
        header.channels == self.channels
            && header.sample_rate == self.sample_rate
            && header.flags == self.encoding.flags()
            && header.frames_per_block == self.frames_per_block
    }

    /// Check a mid-stream header against these parameters
    pub fn check(&self, header: &BlockHeader, name: &str) -> Result<(), StreamError> {
        if self.matches(header) {
            Ok(())
        } else {
            Err(StreamError::ParametersChanged(name.to_string()))
        }
    }

    /// Bytes per frame
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.encoding.sample_size()
    }

    /// Bytes per full block, header included
    pub fn block_size(&self) -> usize {
        HEADER_SIZE + self.frames_per_block as usize * self.frame_size()
    }

    /// Nominal duration of one block in seconds
    pub fn block_duration(&self) -> f64 {
        self.frames_per_block as f64 / self.sample_rate as f64
    }
}

/// One block: header plus a full-size payload, as it appears on the wire
#[derive(Debug, Clone)]
pub struct Block {
    params: StreamParams,
    data: Vec<u8>,
}

impl Block {
    pub fn new(params: StreamParams) -> Self {
        let mut block = Self {
            params,
            data: vec![0u8; params.block_size()],
        };
        block.set_header(&BlockHeader::new(&params));
        block
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader::decode(&self.data)
    }

    pub fn set_header(&mut self, header: &BlockHeader) {
        header.encode(&mut self.data);
    }

    /// Frames actually used
    pub fn frames(&self) -> u32 {
        self.header().frames
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header().timestamp()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn frame_range(&self, index: usize) -> std::ops::Range<usize> {
        let size = self.params.frame_size();
        let start = HEADER_SIZE + index * size;
        start..start + size
    }

    /// Encode `samples` as frame `index`
    pub fn write_frame(&mut self, index: usize, samples: &[f64]) -> Result<(), CodecError> {
        let channels = self.params.channels as usize;
        if samples.len() != channels {
            return Err(CodecError::FrameLength {
                expected: channels,
                got: samples.len(),
            });
        }

        let range = self.frame_range(index);
        self.params.encoding.encode_frame(samples, &mut self.data[range]);
        Ok(())
    }

    /// Decode frame `index` into `out`, which holds one sample per channel
    pub fn read_frame(&self, index: usize, out: &mut [f64]) {
        let range = self.frame_range(index);
        self.params.encoding.decode_frame(&self.data[range], out);
    }

    /// Copy raw interleaved i2 samples in, starting at frame `start`
    pub fn write_frames_i2(&mut self, start: usize, samples: &[i16]) {
        let offset = self.frame_range(start).start;
        let mut buf = &mut self.data[offset..offset + samples.len() * 2];
        for s in samples {
            buf.put_i16_ne(*s);
        }
    }

    /// Copy raw interleaved i2 samples out, starting at frame `start`
    pub fn read_frames_i2(&self, start: usize, out: &mut [i16]) {
        let offset = self.frame_range(start).start;
        let mut buf = &self.data[offset..offset + out.len() * 2];
        for s in out.iter_mut() {
            *s = buf.get_i16_ne();
        }
    }
}
