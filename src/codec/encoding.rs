//! Sample encodings
//!
//! Samples travel as unit-scaled values. Float encodings carry them as-is;
//! integer encodings scale by the type's maximum and saturate at its range.

use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Mask selecting the encoding bits of a header's flags word
pub const FLAGS_MASK: u32 = 0x0e;

/// Payload encoding of a stream, fixed for the stream's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// 64-bit float
    #[default]
    F8,
    /// 32-bit float
    F4,
    /// 32-bit signed integer
    I4,
    /// 16-bit signed integer
    I2,
    /// 8-bit signed integer
    I1,
}

impl Encoding {
    pub const ALL: [Encoding; 5] = [
        Encoding::F8,
        Encoding::F4,
        Encoding::I4,
        Encoding::I2,
        Encoding::I1,
    ];

    /// Decode the flags word of a block header
    pub fn from_flags(flags: u32) -> Result<Self, CodecError> {
        match flags {
            0 => Ok(Encoding::F8),
            2 => Ok(Encoding::F4),
            4 => Ok(Encoding::I1),
            6 => Ok(Encoding::I2),
            8 => Ok(Encoding::I4),
            other => Err(CodecError::UnsupportedFlags(other)),
        }
    }

    pub fn flags(self) -> u32 {
        match self {
            Encoding::F8 => 0,
            Encoding::F4 => 2,
            Encoding::I1 => 4,
            Encoding::I2 => 6,
            Encoding::I4 => 8,
        }
    }

    /// Bytes per sample
    pub fn sample_size(self) -> usize {
        match self {
            Encoding::F8 => 8,
            Encoding::F4 | Encoding::I4 => 4,
            Encoding::I2 => 2,
            Encoding::I1 => 1,
        }
    }

    /// Name-option tag, as accepted by [`FromStr`]
    pub fn tag(self) -> &'static str {
        match self {
            Encoding::F8 => "f8",
            Encoding::F4 => "f4",
            Encoding::I4 => "i4",
            Encoding::I2 => "i2",
            Encoding::I1 => "i1",
        }
    }

    /// Encode one frame of unit-scaled samples into `dst`
    ///
    /// `dst` must hold exactly `samples.len() * sample_size()` bytes.
    pub fn encode_frame(self, samples: &[f64], dst: &mut [u8]) {
        let size = self.sample_size();
        debug_assert_eq!(dst.len(), samples.len() * size);

        for (x, out) in samples.iter().zip(dst.chunks_exact_mut(size)) {
            match self {
                Encoding::F8 => out.copy_from_slice(&x.to_ne_bytes()),
                Encoding::F4 => out.copy_from_slice(&(*x as f32).to_ne_bytes()),
                Encoding::I4 => out.copy_from_slice(&encode_i4(*x).to_ne_bytes()),
                Encoding::I2 => out.copy_from_slice(&encode_i2(*x).to_ne_bytes()),
                Encoding::I1 => out.copy_from_slice(&encode_i1(*x).to_ne_bytes()),
            }
        }
    }

    /// Decode one frame from `src` into unit-scaled samples
    pub fn decode_frame(self, src: &[u8], dst: &mut [f64]) {
        let size = self.sample_size();
        debug_assert_eq!(src.len(), dst.len() * size);

        for (bytes, out) in src.chunks_exact(size).zip(dst.iter_mut()) {
            *out = match self {
                Encoding::F8 => f64::from_ne_bytes(array(bytes)),
                Encoding::F4 => f32::from_ne_bytes(array(bytes)) as f64,
                Encoding::I4 => i32::from_ne_bytes(array(bytes)) as f64 / i32::MAX as f64,
                Encoding::I2 => i16::from_ne_bytes(array(bytes)) as f64 / i16::MAX as f64,
                Encoding::I1 => i8::from_ne_bytes(array(bytes)) as f64 / i8::MAX as f64,
            };
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Scale and truncate, saturating at the i32 range
pub fn encode_i4(x: f64) -> i32 {
    (x * i32::MAX as f64).clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Scale and round, saturating at the i16 range
pub fn encode_i2(x: f64) -> i16 {
    (x * i16::MAX as f64)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Scale and truncate, saturating at the i8 range
pub fn encode_i1(x: f64) -> i8 {
    (x * i8::MAX as f64).clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f8" => Ok(Encoding::F8),
            "f4" => Ok(Encoding::F4),
            "i4" => Ok(Encoding::I4),
            "i2" => Ok(Encoding::I2),
            "i1" => Ok(Encoding::I1),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
