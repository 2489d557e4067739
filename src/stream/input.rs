//! Consumer handle

use std::io;
use std::time::Duration;

use super::chanspec::{ChannelMap, ChannelSpec};
use super::name::{parse_input, Target};
use crate::codec::{Encoding, StreamParams};
use crate::config::TransportConfig;
use crate::error::{CodecError, Result, StreamError};
use crate::time::{Timebase, Timestamp};
use crate::transport::{BlockSource, FileSource, NetSource, RingSource};

/// Timing of the block being read
#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    timestamp: Timestamp,
    frames: u32,
    srcal: f64,
}

/// Input stream: pulls blocks from a transport and hands out frames
///
/// Between consecutive blocks the stream checks that the new timestamp
/// continues the previous block to within one sample. When it does not,
/// the reader-break flag is raised; consumers should then reset any
/// accumulated state, as the data that follows has an unrelated timebase.
pub struct InputStream {
    name: String,
    source: Box<dyn BlockSource>,
    params: StreamParams,
    map: ChannelMap,
    /// Decoded frame, all channels
    scratch: Vec<f64>,
    /// Selected channels of `scratch`
    frame: Vec<f64>,
    scratch_i2: Vec<i16>,
    info: BlockInfo,
    /// Next frame within the current block
    ulp: u32,
    rbreak: bool,
    blocks_read: u64,
    eof: bool,
}

impl InputStream {
    /// Open an input stream and wait for its first block
    pub fn open(name: &str, config: &TransportConfig) -> Result<Self> {
        let (base, spec) = ChannelSpec::split(name)?;

        let source: Box<dyn BlockSource> = match parse_input(base)? {
            Target::File { path } => Box::new(FileSource::open(&path)?),
            Target::Ring { name: ring, .. } => {
                Box::new(RingSource::attach(base, &config.buffer_path(&ring))?)
            }
            Target::Listen { port, persistent } => {
                Box::new(NetSource::listen(base, port, persistent, config)?)
            }
            Target::Client { .. } => return Err(StreamError::InvalidName(name.to_string()).into()),
        };

        Self::with_source(name, spec, source)
    }

    /// Input stream over an already constructed transport
    pub fn with_source(
        name: &str,
        spec: ChannelSpec,
        mut source: Box<dyn BlockSource>,
    ) -> Result<Self> {
        let header = match source.read_block()? {
            Some(block) => block.header(),
            None => {
                return Err(StreamError::Open {
                    name: name.to_string(),
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "no data"),
                }
                .into())
            }
        };
        let params = source.params().ok_or_else(|| StreamError::Open {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, "no stream parameters"),
        })?;
        let map = spec.resolve(params.channels, name)?;

        tracing::info!(
            "{}: input {} channels, {} Hz, {}, selecting {}",
            name,
            params.channels,
            params.sample_rate,
            params.encoding,
            map.len()
        );

        Ok(Self {
            name: name.to_string(),
            source,
            params,
            scratch: vec![0.0; params.channels as usize],
            frame: vec![0.0; map.len()],
            scratch_i2: vec![0; params.channels as usize],
            map,
            info: BlockInfo {
                timestamp: header.timestamp(),
                frames: header.frames.min(params.frames_per_block),
                srcal: header.srcal,
            },
            ulp: 0,
            rbreak: false,
            blocks_read: 1,
            eof: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Channels delivered per frame, after selection
    pub fn channels(&self) -> usize {
        self.map.len()
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Rate calibration of the block holding the next frame
    ///
    /// Reads ahead when the current block is used up; `None` at end of
    /// stream.
    pub fn srcal(&mut self) -> Result<Option<f64>> {
        Ok(self.fill()?.then_some(self.info.srcal))
    }

    /// Timestamp of the next frame to be returned, reading ahead if needed
    pub fn timestamp(&mut self) -> Result<Option<Timestamp>> {
        if !self.fill()? {
            return Ok(None);
        }
        Ok(Some(self.timebase().at_frame(self.ulp as u64)))
    }

    /// Whether the next frame is the first of its block, reading ahead if needed
    pub fn is_block_start(&mut self) -> Result<Option<bool>> {
        Ok(self.fill()?.then_some(self.ulp == 0))
    }

    fn timebase(&self) -> Timebase {
        Timebase::new(self.info.timestamp, self.info.srcal, self.params.sample_rate)
    }

    /// Read the next block, checking it continues the previous one
    ///
    /// Returns false at end of stream.
    pub fn read_next(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let header = match self.source.read_block()? {
            Some(block) => block.header(),
            None => {
                tracing::debug!("{}: end of stream", self.name);
                self.eof = true;
                return Ok(false);
            }
        };

        let t = header.timestamp();
        let previous = self.timebase();
        if !self.rbreak && !previous.is_continuous(t, self.info.frames as u64) {
            tracing::info!(
                "{}: break detected: {:.9}",
                self.name,
                previous.shift(t, self.info.frames as u64)
            );
            self.rbreak = true;
        }

        self.info = BlockInfo {
            timestamp: t,
            frames: header.frames.min(self.params.frames_per_block),
            srcal: header.srcal,
        };
        self.ulp = 0;
        self.blocks_read += 1;
        Ok(true)
    }

    /// Make sure a frame is available; false at end of stream
    fn fill(&mut self) -> Result<bool> {
        while self.ulp >= self.info.frames {
            if !self.read_next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Next frame of selected channels, `None` at end of stream
    ///
    /// Clears the reader-break flag.
    pub fn get_frame(&mut self) -> Result<Option<&[f64]>> {
        if !self.fill()? {
            return Ok(None);
        }

        let Some(block) = self.source.current() else {
            return Ok(None);
        };
        block.read_frame(self.ulp as usize, &mut self.scratch);
        self.map.select(&self.scratch, &mut self.frame);
        self.ulp += 1;
        self.rbreak = false;
        Ok(Some(self.frame.as_slice()))
    }

    /// Fill `out` with raw interleaved frames from an `i2` stream
    ///
    /// `out` holds whole frames of selected channels. Returns the number of
    /// frames delivered, short only at end of stream.
    pub fn get_frames_i2(&mut self, out: &mut [i16]) -> Result<usize> {
        if self.params.encoding != Encoding::I2 {
            return Err(CodecError::RequiresI2(self.name.clone()).into());
        }
        let width = self.map.len();
        if width == 0 || out.len() % width != 0 {
            return Err(CodecError::FrameLength {
                expected: width,
                got: out.len(),
            }
            .into());
        }

        let mut delivered = 0;
        for dst in out.chunks_exact_mut(width) {
            if !self.fill()? {
                break;
            }
            let Some(block) = self.source.current() else {
                break;
            };
            block.read_frames_i2(self.ulp as usize, &mut self.scratch_i2);
            self.map.select(&self.scratch_i2, dst);
            self.ulp += 1;
            delivered += 1;
        }
        self.rbreak = false;
        Ok(delivered)
    }

    /// Return and clear the reader-break flag, reading ahead if needed
    ///
    /// `None` at end of stream.
    pub fn take_break(&mut self) -> Result<Option<bool>> {
        if !self.fill()? {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.rbreak)))
    }

    /// Wait up to `timeout` for a frame to be available
    pub fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if self.ulp < self.info.frames {
            return Ok(true);
        }
        self.source.poll(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Block;
    use std::collections::VecDeque;

    /// Source replaying prepared blocks
    struct Replay {
        params: StreamParams,
        pending: VecDeque<Block>,
        current: Option<Block>,
    }

    impl BlockSource for Replay {
        fn read_block(&mut self) -> Result<Option<&Block>> {
            self.current = self.pending.pop_front();
            Ok(self.current.as_ref())
        }

        fn current(&self) -> Option<&Block> {
            self.current.as_ref()
        }

        fn params(&self) -> Option<StreamParams> {
            Some(self.params)
        }

        fn poll(&mut self, _timeout: Duration) -> Result<bool> {
            Ok(!self.pending.is_empty())
        }
    }

    fn block(params: StreamParams, t: Timestamp, frames: u32, first: f64) -> Block {
        let mut block = Block::new(params);
        for i in 0..frames as usize {
            let v = first + i as f64 / 1000.0;
            block.write_frame(i, &[v, -v]).unwrap();
        }
        let mut header = block.header();
        header.set_timestamp(t);
        header.frames = frames;
        header.valid = 1;
        block.set_header(&header);
        block
    }

    fn replay(spec: &str, blocks: Vec<Block>) -> Result<InputStream> {
        let params = *blocks[0].params();
        let source = Replay {
            params,
            pending: blocks.into(),
            current: None,
        };
        InputStream::with_source("replay", ChannelSpec::parse(spec)?, Box::new(source))
    }

    fn params() -> StreamParams {
        StreamParams::new(2, 100, Encoding::F8)
    }

    #[test]
    fn test_frames_across_blocks() {
        let t0 = Timestamp::compose(500, 0.0);
        let mut input = replay(
            "x",
            vec![block(params(), t0, 3, 0.1), block(params(), t0 + 0.03, 2, 0.2)],
        )
        .unwrap();

        assert_eq!(input.is_block_start().unwrap(), Some(true));
        assert_eq!(input.timestamp().unwrap(), Some(t0));
        let mut seen = Vec::new();
        while let Some(frame) = input.get_frame().unwrap() {
            seen.push(frame[0]);
        }
        assert_eq!(seen.len(), 5);
        assert!((seen[2] - 0.102).abs() < 1e-12);
        assert!((seen[3] - 0.2).abs() < 1e-12);
        assert_eq!(input.blocks_read(), 2);
        assert_eq!(input.take_break().unwrap(), None);
    }

    #[test]
    fn test_channel_swap() {
        let t0 = Timestamp::compose(500, 0.0);
        let mut input = replay("x:2,1", vec![block(params(), t0, 2, 0.5)]).unwrap();
        assert_eq!(input.channel_map().indices(), &[1, 0]);
        let frame = input.get_frame().unwrap().unwrap();
        assert_eq!(frame, &[-0.5, 0.5]);
    }

    #[test]
    fn test_channel_not_present() {
        let t0 = Timestamp::compose(500, 0.0);
        let err = replay("x:3", vec![block(params(), t0, 2, 0.5)])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::Error::Stream(StreamError::ChannelNotPresent { channel: 3, .. })
        ));
    }

    #[test]
    fn test_break_flag() {
        let t0 = Timestamp::compose(500, 0.0);
        let mut input = replay(
            "x",
            vec![
                block(params(), t0, 4, 0.0),
                block(params(), t0 + 0.04, 4, 0.0),
                block(params(), t0 + 10.0, 4, 0.0),
            ],
        )
        .unwrap();

        assert_eq!(input.take_break().unwrap(), Some(false));
        for _ in 0..4 {
            input.get_frame().unwrap().unwrap();
        }
        assert_eq!(input.take_break().unwrap(), Some(false));
        for _ in 0..4 {
            input.get_frame().unwrap().unwrap();
        }
        assert_eq!(input.take_break().unwrap(), Some(true));
        assert_eq!(input.take_break().unwrap(), Some(false));
        assert_eq!(input.timestamp().unwrap(), Some(t0 + 10.0));
    }

    #[test]
    fn test_accessors_read_ahead_across_jump() {
        let t0 = Timestamp::compose(1000, 0.0);
        let mut later = block(params(), t0 + 60.0, 4, 0.0);
        let mut header = later.header();
        header.srcal = 1.0001;
        later.set_header(&header);
        let mut input = replay("x", vec![block(params(), t0, 4, 0.0), later]).unwrap();

        for _ in 0..4 {
            input.get_frame().unwrap().unwrap();
        }
        assert_eq!(input.timestamp().unwrap(), Some(t0 + 60.0));
        assert_eq!(input.is_block_start().unwrap(), Some(true));
        assert_eq!(input.srcal().unwrap(), Some(1.0001));
        assert_eq!(input.blocks_read(), 2);
        assert_eq!(input.take_break().unwrap(), Some(true));

        for _ in 0..4 {
            input.get_frame().unwrap().unwrap();
        }
        assert_eq!(input.timestamp().unwrap(), None);
        assert_eq!(input.is_block_start().unwrap(), None);
        assert_eq!(input.srcal().unwrap(), None);
    }

    #[test]
    fn test_break_cleared_by_get_frame() {
        let t0 = Timestamp::compose(500, 0.0);
        let mut input = replay(
            "x",
            vec![block(params(), t0, 1, 0.0), block(params(), t0 + 3.0, 1, 0.0)],
        )
        .unwrap();

        input.get_frame().unwrap().unwrap();
        input.get_frame().unwrap().unwrap();
        assert_eq!(input.take_break().unwrap(), None);
    }

    #[test]
    fn test_raw_i2_frames() {
        let params = StreamParams::new(2, 100, Encoding::I2);
        let mut b = Block::new(params);
        b.write_frames_i2(0, &[1, 2, 3, 4, 5, 6]);
        let mut header = b.header();
        header.frames = 3;
        header.valid = 1;
        b.set_header(&header);

        let mut input = replay("x:2", vec![b]).unwrap();
        let mut out = [0i16; 4];
        assert_eq!(input.get_frames_i2(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], &[2, 4, 6]);
    }

    #[test]
    fn test_empty_source() {
        let source = Replay {
            params: params(),
            pending: VecDeque::new(),
            current: None,
        };
        assert!(InputStream::with_source("x", ChannelSpec::default(), Box::new(source)).is_err());
    }
}
