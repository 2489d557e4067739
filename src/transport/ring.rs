//! Shared-memory ring buffer
//!
//! One producer publishes blocks into a fixed array of slots inside a
//! memory-mapped file; any number of consumers map the same file read-only
//! and follow along. Layout:
//!
//! ```text
//! +--------------------------+
//! | ring header (32 bytes)   |  magic flags slots bsize chans key load rate
//! +--------------------------+
//! | slot 0: block, padded    |
//! | slot 1                   |
//! | ...                      |
//! | slot n-1                 |
//! +--------------------------+
//! ```
//!
//! Publication order for a block: invalidate the following slot, copy the
//! block into the current slot, set its `valid` flag (release), then
//! advance `load`. Consumers never block the producer; one that falls more
//! than a full ring behind silently skips to newer data.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use super::{BlockSink, BlockSource, SleepWait, WaitStrategy};
use crate::codec::block::{MAGIC_OFFSET, NSEC_OFFSET, SECS_OFFSET, VALID_OFFSET};
use crate::codec::{Block, BlockHeader, Encoding, StreamParams, BLOCK_MAGIC, HEADER_SIZE};
use crate::error::{BufferError, Result, StreamError};
use crate::time::Timestamp;

/// Magic value opening the ring header
pub const RING_MAGIC: u32 = 26374;

/// Size of the ring header in bytes
pub const RING_HEADER_SIZE: usize = 32;

const R_MAGIC: usize = 0;
const R_FLAGS: usize = 4;
const R_SLOTS: usize = 8;
const R_BSIZE: usize = 12;
const R_CHANS: usize = 16;
const R_KEY: usize = 20;
const R_LOAD: usize = 24;
const R_RATE: usize = 28;

#[cfg(target_os = "linux")]
const MAP_LOCK: libc::c_int = libc::MAP_LOCKED;
#[cfg(not(target_os = "linux"))]
const MAP_LOCK: libc::c_int = 0;

pub const DEFAULT_BUFFER_SECS: u32 = 10;
pub const MIN_BUFFER_SECS: u32 = 2;
pub const MAX_BUFFER_SECS: u32 = 120;

/// Index of a slot, always below the slot count of its ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndex(u32);

impl SlotIndex {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Geometry of a ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub params: StreamParams,
    pub slot_count: u32,
    /// Bytes between slot starts, a multiple of 8
    pub stride: usize,
}

impl RingLayout {
    pub fn new(params: StreamParams, slot_count: u32) -> Self {
        Self {
            params,
            slot_count,
            stride: params.block_size().next_multiple_of(8),
        }
    }

    /// Layout for `secs` seconds of data, at least two slots
    pub fn for_duration(params: StreamParams, secs: u32) -> Self {
        let slots = params.sample_rate as u64 * secs as u64 / params.frames_per_block as u64;
        Self::new(params, slots.clamp(2, u32::MAX as u64) as u32)
    }

    pub fn total_size(&self) -> usize {
        RING_HEADER_SIZE + self.slot_count as usize * self.stride
    }

    /// Validated slot index
    pub fn slot(&self, raw: u32) -> Option<SlotIndex> {
        (raw < self.slot_count).then_some(SlotIndex(raw))
    }

    pub fn next(&self, slot: SlotIndex) -> SlotIndex {
        SlotIndex((slot.0 + 1) % self.slot_count)
    }

    pub fn prev(&self, slot: SlotIndex) -> SlotIndex {
        SlotIndex((slot.0 + self.slot_count - 1) % self.slot_count)
    }

    fn slot_offset(&self, slot: SlotIndex) -> usize {
        RING_HEADER_SIZE + slot.0 as usize * self.stride
    }
}

/// A shared file mapping, unmapped on drop
#[derive(Debug)]
struct Mapping {
    addr: *mut u8,
    len: usize,
    writable: bool,
}

// The mapping is plain shared memory; every access goes through atomics or
// bounds-checked copies.
unsafe impl Send for Mapping {}

impl Mapping {
    fn map(file: &File, len: usize, writable: bool, locked: bool, path: &Path) -> Result<Self> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };

        let flags = if locked {
            libc::MAP_SHARED | MAP_LOCK
        } else {
            libc::MAP_SHARED
        };

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut::<libc::c_void>(),
                len,
                prot,
                flags,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(BufferError::Map {
                path: path.display().to_string(),
                reason: std::io::Error::last_os_error().to_string(),
            }
            .into());
        }

        Ok(Self {
            addr: addr.cast::<u8>(),
            len,
            writable,
        })
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "ring access out of bounds: {}+{} > {}",
            offset,
            len,
            self.len
        );
    }

    fn word(&self, offset: usize) -> &AtomicU32 {
        self.check(offset, 4);
        assert!(offset % 4 == 0, "misaligned ring word at {}", offset);
        unsafe { &*self.addr.add(offset).cast::<AtomicU32>() }
    }

    fn load(&self, offset: usize) -> u32 {
        self.word(offset).load(Ordering::Relaxed)
    }

    fn store(&self, offset: usize, value: u32) {
        debug_assert!(self.writable);
        self.word(offset).store(value, Ordering::Relaxed);
    }

    fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.addr.add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    fn copy_in(&self, offset: usize, src: &[u8]) {
        assert!(self.writable, "ring mapping is read-only");
        self.check(offset, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.addr.add(offset), src.len()) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr.cast::<libc::c_void>(), self.len);
        }
    }
}

/// Per-slot state as seen by a consumer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotState {
    pub valid: bool,
    pub timestamp: Timestamp,
}

/// An attached ring buffer, producer or consumer side
#[derive(Debug)]
pub struct RingBuffer {
    name: String,
    path: PathBuf,
    map: Mapping,
    layout: RingLayout,
}

impl RingBuffer {
    /// Create or re-create the ring at `path` for `secs` seconds of data
    ///
    /// A ring left behind by an earlier producer keeps its load index,
    /// reduced modulo the new slot count.
    pub fn create(
        name: &str,
        path: &Path,
        params: StreamParams,
        secs: u32,
        locked: bool,
    ) -> Result<Self> {
        let layout = RingLayout::for_duration(params, secs);
        let previous_load = read_ring_header(path).ok().map(|h| h.load);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)
            .map_err(|source| StreamError::Open {
                name: name.to_string(),
                source,
            })?;
        // Never shrink: readers may still map the old, longer layout
        let existing = file.metadata()?.len();
        file.set_len(existing.max(layout.total_size() as u64))?;

        let map = Mapping::map(&file, layout.total_size(), true, locked, path)?;
        let ring = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            map,
            layout,
        };
        ring.initialise(previous_load.unwrap_or(0));

        tracing::info!(
            "{}: ring buffer of {} blocks, {:.3} seconds",
            name,
            layout.slot_count,
            layout.slot_count as f64 * params.block_duration()
        );
        Ok(ring)
    }

    fn initialise(&self, previous_load: u32) {
        let params = &self.layout.params;
        let header = BlockHeader::new(params);
        let mut bytes = [0u8; HEADER_SIZE];
        header.encode(&mut bytes);

        self.map.store(R_MAGIC, 0);
        fence(Ordering::Release);

        for raw in 0..self.layout.slot_count {
            let offset = self.layout.slot_offset(SlotIndex(raw));
            self.map.store(offset + VALID_OFFSET, 0);
            self.map.copy_in(offset, &bytes);
        }

        self.map.store(R_FLAGS, params.encoding.flags());
        self.map.store(R_SLOTS, self.layout.slot_count);
        self.map.store(R_BSIZE, params.frames_per_block);
        self.map.store(R_CHANS, params.channels);
        self.map.store(R_KEY, name_key(&self.name));
        self.map.store(R_LOAD, previous_load % self.layout.slot_count);
        self.map.store(R_RATE, params.sample_rate);
        self.map.word(R_MAGIC).store(RING_MAGIC, Ordering::Release);
    }

    /// Attach read-only to an existing ring
    pub fn attach(name: &str, path: &Path) -> Result<Self> {
        let header = read_ring_header(path)?;
        let params = StreamParams {
            channels: header.channels,
            sample_rate: header.sample_rate,
            encoding: Encoding::from_flags(header.flags)?,
            frames_per_block: header.frames_per_block,
        };
        if params.channels == 0 || params.sample_rate == 0 || params.frames_per_block == 0 {
            return Err(BufferError::Corrupt(name.to_string()).into());
        }
        if header.slot_count == 0 || header.load >= header.slot_count {
            return Err(BufferError::Corrupt(name.to_string()).into());
        }

        let layout = RingLayout::new(params, header.slot_count);
        let file = File::open(path).map_err(|source| StreamError::Open {
            name: name.to_string(),
            source,
        })?;
        if file.metadata()?.len() < layout.total_size() as u64 {
            return Err(BufferError::TooSmall(name.to_string()).into());
        }

        let map = Mapping::map(&file, layout.total_size(), false, false, path)?;
        tracing::info!(
            "{}: attached to ring of {} blocks, {} channels, {} Hz, {}",
            name,
            layout.slot_count,
            params.channels,
            params.sample_rate,
            params.encoding
        );
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            map,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn params(&self) -> StreamParams {
        self.layout.params
    }

    /// Slot the producer will publish next
    pub fn load_index(&self) -> Result<SlotIndex> {
        let raw = self.map.word(R_LOAD).load(Ordering::Acquire);
        self.layout
            .slot(raw)
            .ok_or_else(|| BufferError::Corrupt(self.name.clone()).into())
    }

    /// Publish a complete block into the current slot and advance
    pub fn publish(&self, block: &Block) -> Result<()> {
        let bytes = block.as_bytes();
        if bytes.len() != self.layout.params.block_size() {
            return Err(StreamError::ParametersChanged(self.name.clone()).into());
        }

        let load = self.load_index()?;
        let next = self.layout.next(load);

        self.map.store(self.layout.slot_offset(next) + VALID_OFFSET, 0);
        let offset = self.layout.slot_offset(load);
        self.map.store(offset + VALID_OFFSET, 0);
        fence(Ordering::Release);

        self.map.copy_in(offset, &bytes[..VALID_OFFSET]);
        self.map
            .copy_in(offset + VALID_OFFSET + 4, &bytes[VALID_OFFSET + 4..]);

        self.map
            .word(offset + VALID_OFFSET)
            .store(1, Ordering::Release);
        self.map.word(R_LOAD).store(next.0, Ordering::Release);

        tracing::trace!("{}: published slot {}", self.name, load.0);
        Ok(())
    }

    /// Validity and timestamp of a slot
    pub fn slot_state(&self, slot: SlotIndex) -> SlotState {
        let offset = self.layout.slot_offset(slot);
        let valid = self.map.word(offset + VALID_OFFSET).load(Ordering::Acquire) != 0;
        let timestamp = Timestamp::from_wire(
            self.map.load(offset + SECS_OFFSET),
            self.map.load(offset + NSEC_OFFSET),
        );
        SlotState { valid, timestamp }
    }

    /// Copy a slot out, returning false if the producer overwrote it
    /// during the copy
    pub fn copy_slot(&self, slot: SlotIndex, block: &mut Block) -> Result<bool> {
        let before = self.slot_state(slot);
        if !before.valid {
            return Ok(false);
        }

        let offset = self.layout.slot_offset(slot);
        if self.map.load(offset + MAGIC_OFFSET) != BLOCK_MAGIC {
            return Err(BufferError::Corrupt(self.name.clone()).into());
        }

        self.map.copy_out(offset, block.as_bytes_mut());
        fence(Ordering::Acquire);

        if self.slot_state(slot) != before {
            tracing::debug!("{}: slot {} overwritten during copy", self.name, slot.0);
            return Ok(false);
        }

        let header = block.header();
        if !header.has_magic() || !self.layout.params.matches(&header) {
            return Err(StreamError::ParametersChanged(self.name.clone()).into());
        }
        Ok(true)
    }

    /// Timestamps of all valid slots, oldest first
    pub fn valid_timestamps(&self) -> Vec<Timestamp> {
        let mut stamps: Vec<Timestamp> = (0..self.layout.slot_count)
            .map(|raw| self.slot_state(SlotIndex(raw)))
            .filter(|s| s.valid)
            .map(|s| s.timestamp)
            .collect();
        stamps.sort();
        stamps
    }

    /// Whether the ring header still describes this attachment
    ///
    /// `Ok(false)` while a producer is re-initialising the ring with the
    /// magic cleared; a header describing another layout is fatal.
    fn check_header(&self) -> Result<bool> {
        if self.map.word(R_MAGIC).load(Ordering::Acquire) != RING_MAGIC {
            return Ok(false);
        }
        let p = &self.layout.params;
        let same = self.map.load(R_FLAGS) == p.encoding.flags()
            && self.map.load(R_SLOTS) == self.layout.slot_count
            && self.map.load(R_BSIZE) == p.frames_per_block
            && self.map.load(R_CHANS) == p.channels
            && self.map.load(R_RATE) == p.sample_rate;
        if same {
            Ok(true)
        } else {
            Err(StreamError::ParametersChanged(self.name.clone()).into())
        }
    }
}

/// Ring header as read from disk
#[derive(Debug, Clone, Copy)]
struct RingHeader {
    flags: u32,
    slot_count: u32,
    frames_per_block: u32,
    channels: u32,
    load: u32,
    sample_rate: u32,
}

fn read_ring_header(path: &Path) -> Result<RingHeader> {
    let name = path.display().to_string();
    let mut file = File::open(path).map_err(|source| StreamError::Open {
        name: name.clone(),
        source,
    })?;

    let mut bytes = [0u8; RING_HEADER_SIZE];
    file.read_exact(&mut bytes)
        .map_err(|_| BufferError::TooSmall(name.clone()))?;

    let word = |offset: usize| {
        let mut w = [0u8; 4];
        w.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_ne_bytes(w)
    };
    if word(R_MAGIC) != RING_MAGIC {
        return Err(BufferError::Corrupt(name).into());
    }

    Ok(RingHeader {
        flags: word(R_FLAGS),
        slot_count: word(R_SLOTS),
        frames_per_block: word(R_BSIZE),
        channels: word(R_CHANS),
        load: word(R_LOAD),
        sample_rate: word(R_RATE),
    })
}

/// Key derived from the buffer name, kept in the header for older readers
fn name_key(name: &str) -> u32 {
    name.bytes().fold(0u32, |key, b| (key << 1) ^ b as u32)
}

/// Clamp a requested buffer length to the supported range
pub fn clamp_buffer_secs(secs: u32, name: &str) -> u32 {
    let clamped = secs.clamp(MIN_BUFFER_SECS, MAX_BUFFER_SECS);
    if clamped != secs {
        tracing::warn!(
            "{}: buffer length {} seconds out of range, using {}",
            name,
            secs,
            clamped
        );
    }
    clamped
}

/// Producer side of a ring buffer
#[derive(Debug)]
pub struct RingSink {
    ring: RingBuffer,
}

impl RingSink {
    pub fn create(
        name: &str,
        path: &Path,
        params: StreamParams,
        secs: u32,
        locked: bool,
    ) -> Result<Self> {
        Ok(Self {
            ring: RingBuffer::create(name, path, params, secs, locked)?,
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}

impl BlockSink for RingSink {
    fn write_block(&mut self, block: &Block) -> Result<()> {
        self.ring.publish(block)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Consumer side of a ring buffer
///
/// Starts at the producer's current slot, so the first block delivered is
/// the first one published after attaching. Never reaches end of stream.
pub struct RingSource {
    ring: RingBuffer,
    readp: SlotIndex,
    last: Timestamp,
    block: Block,
    delivered: bool,
    wait: Box<dyn WaitStrategy>,
}

impl RingSource {
    pub fn attach(name: &str, path: &Path) -> Result<Self> {
        Self::with_wait(name, path, Box::new(SleepWait))
    }

    pub fn with_wait(name: &str, path: &Path, wait: Box<dyn WaitStrategy>) -> Result<Self> {
        let ring = RingBuffer::attach(name, path)?;
        let readp = ring.load_index()?;
        let block = Block::new(ring.params());
        Ok(Self {
            ring,
            readp,
            last: Timestamp::NONE,
            block,
            delivered: false,
            wait,
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.ring.params().block_duration())
    }

    fn is_ready(&self) -> bool {
        let state = self.ring.slot_state(self.readp);
        state.valid && state.timestamp > self.last
    }
}

impl BlockSource for RingSource {
    fn read_block(&mut self) -> Result<Option<&Block>> {
        loop {
            // Header first: slot memory is only trusted under a matching layout
            if !self.ring.check_header()? || !self.is_ready() {
                self.wait.wait(self.interval());
                continue;
            }
            if self.ring.copy_slot(self.readp, &mut self.block)? {
                break;
            }
        }

        self.last = self.block.timestamp();
        self.readp = self.ring.layout.next(self.readp);
        self.delivered = true;
        Ok(Some(&self.block))
    }

    fn current(&self) -> Option<&Block> {
        self.delivered.then_some(&self.block)
    }

    fn params(&self) -> Option<StreamParams> {
        Some(self.ring.params())
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ring.check_header()? && self.is_ready() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let interval = self.interval().min(deadline - now);
            self.wait.wait(interval);
        }
    }
}
