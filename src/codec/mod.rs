//! Block codec
//!
//! Fixed-layout block header plus a dense payload of frames in one of five
//! sample encodings.

pub mod block;
pub mod encoding;

pub use block::{Block, BlockHeader, StreamParams, BLOCK_MAGIC, HEADER_SIZE};
pub use encoding::Encoding;
