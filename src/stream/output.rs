//! Producer handle

use std::time::Duration;

use super::name::{parse_output, Target};
use crate::codec::{Block, Encoding, StreamParams};
use crate::config::TransportConfig;
use crate::error::{CodecError, ConfigError, Result, StreamError};
use crate::time::{Timebase, Timestamp};
use crate::transport::{BlockSink, FileSink, NetSink, RingSink};

/// Output stream: buffers frames into blocks and hands them to a transport
///
/// Block timestamps come from the timebase: frame `n` counted since the
/// last [`OutputStream::set_timebase`] is stamped
/// `timebase + n / (srcal * sample_rate)`. A producer that never sets a
/// timebase counts from the epoch.
pub struct OutputStream {
    name: String,
    params: StreamParams,
    sink: Box<dyn BlockSink>,
    block: Block,
    timebase: Timebase,
    /// Frames in the current block
    nfb: u32,
    /// Frames since the timebase
    nft: u64,
    blocks_written: u64,
    closed: bool,
}

impl OutputStream {
    /// Open an output stream, choosing transport and encoding from `name`
    pub fn open(
        name: &str,
        channels: u32,
        locked: bool,
        sample_rate: u32,
        config: &TransportConfig,
    ) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidParams {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if channels == 0 {
            return Err(invalid("no channels").into());
        }
        if sample_rate == 0 {
            return Err(invalid("zero sample rate").into());
        }

        let parsed = parse_output(name)?;
        let params = StreamParams::new(channels, sample_rate, parsed.encoding);

        let sink: Box<dyn BlockSink> = match &parsed.target {
            Target::File { path } => Box::new(FileSink::create(path)?),
            Target::Ring { name: ring, secs } => Box::new(RingSink::create(
                name,
                &config.buffer_path(ring),
                params,
                *secs,
                locked,
            )?),
            Target::Client {
                host,
                port,
                persistent,
            } => Box::new(NetSink::connect(name, host, *port, *persistent, config)?),
            Target::Listen { .. } => return Err(StreamError::InvalidName(name.to_string()).into()),
        };

        tracing::info!(
            "{}: output {} channels, {} Hz, {}, {} frames per block",
            name,
            channels,
            sample_rate,
            params.encoding,
            params.frames_per_block
        );
        Ok(Self::with_sink(name, params, sink))
    }

    /// Output stream over an already constructed transport
    pub fn with_sink(name: &str, params: StreamParams, sink: Box<dyn BlockSink>) -> Self {
        Self {
            name: name.to_string(),
            params,
            sink,
            block: Block::new(params),
            timebase: Timebase::new(Timestamp::ZERO, 1.0, params.sample_rate),
            nfb: 0,
            nft: 0,
            blocks_written: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Frames waiting in the current block
    pub fn frames_buffered(&self) -> u32 {
        self.nfb
    }

    /// Timestamp the next inserted frame will carry
    pub fn next_timestamp(&self) -> Timestamp {
        self.timebase.at_frame(self.nft)
    }

    /// Nominal duration of one block
    pub fn block_interval(&self) -> Duration {
        Duration::from_secs_f64(self.params.block_duration())
    }

    /// Anchor subsequent frames to `t`, with rate calibration `srcal`
    ///
    /// If `t` disagrees by more than one sample with where the current
    /// frame count says the stream has got to, the partial block is
    /// released first, so consumers see a break rather than a restamp.
    pub fn set_timebase(&mut self, t: Timestamp, srcal: f64) -> Result<()> {
        if !self.timebase.start.is_zero() && self.nfb > 0 {
            let shift = self.timebase.shift(t, self.nft);
            if shift.abs() > self.timebase.frame_period() {
                tracing::debug!("{}: timebase shift {:.9}, releasing early", self.name, shift);
                self.release()?;
            }
        }

        self.timebase = Timebase::new(t, srcal, self.params.sample_rate);
        self.nft = 0;
        Ok(())
    }

    /// Stamp the block header before the block collects frames
    fn prepare(&mut self) {
        let mut header = self.block.header();
        header.set_timestamp(self.timebase.at_frame(self.nft));
        header.srcal = self.timebase.srcal;
        header.valid = 0;
        header.frames = 0;
        self.block.set_header(&header);
    }

    /// Append one frame, one sample per channel
    pub fn insert_frame(&mut self, samples: &[f64]) -> Result<()> {
        let channels = self.params.channels as usize;
        if samples.len() != channels {
            return Err(CodecError::FrameLength {
                expected: channels,
                got: samples.len(),
            }
            .into());
        }

        if self.nfb == 0 {
            self.prepare();
        }
        self.block.write_frame(self.nfb as usize, samples)?;
        self.nfb += 1;
        self.nft += 1;

        if self.nfb == self.params.frames_per_block {
            self.release()?;
        }
        Ok(())
    }

    /// Append raw interleaved frames to an `i2` stream
    pub fn insert_frames_i2(&mut self, samples: &[i16]) -> Result<()> {
        if self.params.encoding != Encoding::I2 {
            return Err(CodecError::RequiresI2(self.name.clone()).into());
        }
        let channels = self.params.channels as usize;
        if channels == 0 || samples.len() % channels != 0 {
            return Err(CodecError::FrameLength {
                expected: channels,
                got: samples.len(),
            }
            .into());
        }

        let mut rest = samples;
        while !rest.is_empty() {
            if self.nfb == 0 {
                self.prepare();
            }
            let room = (self.params.frames_per_block - self.nfb) as usize;
            let n = room.min(rest.len() / channels);
            let (chunk, tail) = rest.split_at(n * channels);
            self.block.write_frames_i2(self.nfb as usize, chunk);
            self.nfb += n as u32;
            self.nft += n as u64;
            rest = tail;

            if self.nfb == self.params.frames_per_block {
                self.release()?;
            }
        }
        Ok(())
    }

    /// Finalise the current block and hand it to the transport
    ///
    /// Does nothing if the block holds no frames.
    pub fn release(&mut self) -> Result<()> {
        if self.nfb == 0 {
            return Ok(());
        }

        let mut header = self.block.header();
        header.frames = self.nfb;
        header.valid = 1;
        self.block.set_header(&header);

        self.sink.write_block(&self.block)?;
        self.blocks_written += 1;
        self.nfb = 0;
        Ok(())
    }

    /// Release any partial block and close the transport
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.release()?;
        self.sink.close()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("{}: close failed: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Sink recording every block it is given
    #[derive(Clone, Default)]
    struct Capture {
        blocks: Arc<Mutex<Vec<Block>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl BlockSink for Capture {
        fn write_block(&mut self, block: &Block) -> Result<()> {
            self.blocks.lock().push(block.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    fn stream(channels: u32, rate: u32, encoding: Encoding) -> (OutputStream, Capture) {
        let capture = Capture::default();
        let params = StreamParams::new(channels, rate, encoding);
        let out = OutputStream::with_sink("test", params, Box::new(capture.clone()));
        (out, capture)
    }

    #[test]
    fn test_open_rejects_empty_params() {
        let dir = std::env::temp_dir().join(format!("vlf-output-params-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out");
        let name = path.to_str().unwrap();
        let config = TransportConfig::default();

        let err = OutputStream::open(name, 0, false, 100, &config).err().unwrap();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::InvalidParams { .. })
        ));
        let err = OutputStream::open(name, 2, false, 0, &config).err().unwrap();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::InvalidParams { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_raw_i2_insert_without_channels() {
        let (mut out, capture) = stream(0, 100, Encoding::I2);
        assert!(out.insert_frames_i2(&[1, 2]).is_err());
        assert!(capture.blocks.lock().is_empty());
    }

    #[test]
    fn test_full_block_released() {
        let (mut out, capture) = stream(1, 100, Encoding::F8);
        assert_eq!(out.params().frames_per_block, 32);

        for i in 0..40 {
            out.insert_frame(&[i as f64 / 100.0]).unwrap();
        }
        assert_eq!(capture.blocks.lock().len(), 1);
        assert_eq!(out.frames_buffered(), 8);

        out.close().unwrap();
        let blocks = capture.blocks.lock();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].frames(), 32);
        assert_eq!(blocks[1].frames(), 8);
        assert!(*capture.closed.lock());

        // Epoch-based timestamps without a timebase
        assert!(blocks[0].timestamp().is_zero());
        assert!((blocks[1].timestamp().as_f64() - 0.32).abs() < 1e-9);
    }

    #[test]
    fn test_release_empty_is_noop() {
        let (mut out, capture) = stream(2, 1000, Encoding::I2);
        out.release().unwrap();
        drop(out);
        assert!(capture.blocks.lock().is_empty());
        assert!(*capture.closed.lock());
    }

    #[test]
    fn test_frame_length_checked() {
        let (mut out, _capture) = stream(2, 1000, Encoding::F4);
        assert!(out.insert_frame(&[0.0]).is_err());
        assert!(out.insert_frame(&[0.0, 0.0, 0.0]).is_err());
        assert_eq!(out.frames_buffered(), 0);
    }

    #[test]
    fn test_timestamps_follow_timebase() {
        let (mut out, capture) = stream(1, 100, Encoding::F8);
        let t0 = Timestamp::compose(1_700_000_000, 0.0);
        out.set_timebase(t0, 1.0).unwrap();
        for _ in 0..64 {
            out.insert_frame(&[0.0]).unwrap();
        }

        let blocks = capture.blocks.lock();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].timestamp(), t0);
        assert!((blocks[1].timestamp().diff(t0) - 0.32).abs() < 1e-9);
        assert_eq!(blocks[1].header().srcal, 1.0);
    }

    #[test]
    fn test_continuous_timebase_keeps_block() {
        let (mut out, capture) = stream(1, 100, Encoding::F8);
        let t0 = Timestamp::compose(1000, 0.0);
        out.set_timebase(t0, 1.0).unwrap();
        for _ in 0..10 {
            out.insert_frame(&[0.0]).unwrap();
        }
        // 10 frames at 100 Hz, re-anchored 2 ms off: within one sample
        out.set_timebase(t0 + 0.102, 1.0).unwrap();
        assert!(capture.blocks.lock().is_empty());
        assert_eq!(out.frames_buffered(), 10);
    }

    #[test]
    fn test_discontinuous_timebase_releases_early() {
        let (mut out, capture) = stream(1, 100, Encoding::F8);
        let t0 = Timestamp::compose(1000, 0.0);
        out.set_timebase(t0, 1.0).unwrap();
        for _ in 0..10 {
            out.insert_frame(&[0.0]).unwrap();
        }
        out.set_timebase(t0 + 5.0, 1.0).unwrap();
        out.insert_frame(&[0.0]).unwrap();
        out.close().unwrap();

        let blocks = capture.blocks.lock();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].frames(), 10);
        assert_eq!(blocks[0].timestamp(), t0);
        assert_eq!(blocks[1].frames(), 1);
        assert_eq!(blocks[1].timestamp(), t0 + 5.0);
    }

    #[test]
    fn test_srcal_recorded() {
        let (mut out, capture) = stream(1, 100, Encoding::F8);
        out.set_timebase(Timestamp::compose(10, 0.0), 1.0001).unwrap();
        out.insert_frame(&[0.0]).unwrap();
        out.close().unwrap();
        assert_eq!(capture.blocks.lock()[0].header().srcal, 1.0001);
    }

    #[test]
    fn test_raw_i2_insert() {
        let (mut out, capture) = stream(2, 100, Encoding::I2);
        let samples: Vec<i16> = (0..100).collect();
        out.insert_frames_i2(&samples).unwrap();
        assert_eq!(capture.blocks.lock().len(), 1);
        assert_eq!(out.frames_buffered(), 18);
        out.close().unwrap();

        let blocks = capture.blocks.lock();
        let mut raw = [0i16; 4];
        blocks[1].read_frames_i2(0, &mut raw);
        assert_eq!(raw, [64, 65, 66, 67]);

        let (mut out, _) = stream(2, 100, Encoding::F8);
        assert!(matches!(
            out.insert_frames_i2(&[1, 2]),
            Err(crate::Error::Codec(CodecError::RequiresI2(_)))
        ));
        let (mut out, _) = stream(2, 100, Encoding::I2);
        assert!(out.insert_frames_i2(&[1, 2, 3]).is_err());
    }
}
