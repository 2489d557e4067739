//! VLF Stream Library
//!
//! Moves timestamped multi-channel sample streams between independent
//! processes as fixed-layout binary blocks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             PRODUCER                                 │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │            OutputStream (stream::output)                       │  │
//! │  │   insert_frame ──▶ Block (codec::block) ──▶ release            │  │
//! │  │   set_timebase     f8 │ f4 │ i4 │ i2 │ i1  (codec::encoding)    │  │
//! │  └──────────────────────────────┬─────────────────────────────────┘  │
//! │                                 │ BlockSink                          │
//! │        ┌────────────────────────┼────────────────────────┐           │
//! │        ▼                        ▼                        ▼           │
//! │  ┌───────────┐          ┌──────────────┐         ┌──────────────┐    │
//! │  │ FileSink  │          │  RingSink    │         │   NetSink    │    │
//! │  │ file/FIFO │          │  mmap slots  │         │ +host ++host │    │
//! │  └─────┬─────┘          └──────┬───────┘         └──────┬───────┘    │
//! └────────┼───────────────────────┼────────────────────────┼────────────┘
//!          │ bytes                 │ shared memory          │ TCP
//!          ▼                       ▼                        ▼
//! ┌────────┼───────────────────────┼────────────────────────┼────────────┐
//! │  ┌─────┴─────┐          ┌──────┴───────┐         ┌──────┴───────┐    │
//! │  │FileSource │          │ RingSource   │  ...    │  NetSource   │    │
//! │  │  Framer   │          │ many readers │         │ +port ++port │    │
//! │  └─────┬─────┘          └──────┬───────┘         └──────┬───────┘    │
//! │        └────────────────────────┼────────────────────────┘           │
//! │                                 │ BlockSource                        │
//! │  ┌──────────────────────────────┴─────────────────────────────────┐  │
//! │  │            InputStream (stream::input)                         │  │
//! │  │   ChannelMap ──▶ get_frame / take_break / timestamp            │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! │                             CONSUMER                                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod runtime;
pub mod stream;
pub mod time;
pub mod transport;

pub use error::{Error, Result};

/// Library-wide constants
pub mod constants {
    pub use crate::codec::block::{
        BLOCK_MAGIC, DEFAULT_FRAMES_PER_BLOCK, HEADER_SIZE, MAX_FRAMES_PER_BLOCK,
    };
    pub use crate::transport::ring::{
        DEFAULT_BUFFER_SECS, MAX_BUFFER_SECS, MIN_BUFFER_SECS, RING_HEADER_SIZE, RING_MAGIC,
    };

    /// Default delay between reconnect attempts of a persistent client
    pub const DEFAULT_RECONNECT_MS: u64 = 5000;

    /// Default delay before a persistent listener accepts again
    pub const DEFAULT_RELISTEN_MS: u64 = 1000;
}
