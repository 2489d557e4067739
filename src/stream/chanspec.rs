//! Channel selection suffix
//!
//! An input name may end in `:c1,c2,...`, 1-based channel numbers that
//! pick and reorder the stream's channels. `file:2,1` swaps a stereo pair,
//! `@rx:3` takes the third channel alone.

use crate::error::{Result, StreamError};

/// Channel selection as written, not yet checked against a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Zero-based source channel indices, `None` for all channels in order
    map: Option<Vec<u32>>,
}

impl ChannelSpec {
    /// Split `name` at its first `:` into the stream name and its selection
    pub fn split(name: &str) -> Result<(&str, ChannelSpec)> {
        match name.split_once(':') {
            Some((base, list)) => Ok((base, Self::from_list(list, name)?)),
            None => Ok((name, ChannelSpec::default())),
        }
    }

    /// Channel selection of a full stream name
    pub fn parse(name: &str) -> Result<ChannelSpec> {
        Self::split(name).map(|(_, spec)| spec)
    }

    /// Parse a comma-separated list of 1-based channel numbers
    pub fn from_list(list: &str, name: &str) -> Result<ChannelSpec> {
        let mut map = Vec::new();
        for item in list.split(',').filter(|s| !s.is_empty()) {
            let channel: u32 = item
                .parse()
                .map_err(|_| StreamError::InvalidChannelSpec(name.to_string()))?;
            if channel == 0 {
                return Err(StreamError::InvalidChannelSpec(name.to_string()).into());
            }
            map.push(channel - 1);
        }

        Ok(ChannelSpec {
            map: (!map.is_empty()).then_some(map),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }

    /// Zero-based indices, if a selection was given
    pub fn indices(&self) -> Option<&[u32]> {
        self.map.as_deref()
    }

    /// Check against the real channel count of stream `name`
    pub fn resolve(&self, channels: u32, name: &str) -> Result<ChannelMap> {
        let Some(map) = &self.map else {
            return Ok(ChannelMap::identity(channels));
        };

        let mut indices = Vec::with_capacity(map.len());
        for &index in map {
            if index >= channels {
                return Err(StreamError::ChannelNotPresent {
                    channel: index + 1,
                    name: name.to_string(),
                }
                .into());
            }
            indices.push(index as usize);
        }
        Ok(ChannelMap { indices })
    }
}

/// Resolved channel selection for a stream of known width
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    indices: Vec<usize>,
}

impl ChannelMap {
    pub fn identity(channels: u32) -> Self {
        Self {
            indices: (0..channels as usize).collect(),
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of channels after selection
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_identity(&self, channels: u32) -> bool {
        self.indices.len() == channels as usize
            && self.indices.iter().enumerate().all(|(i, &c)| i == c)
    }

    /// Copy the selected channels of `frame` into `out`, in map order
    pub fn select<T: Copy>(&self, frame: &[T], out: &mut [T]) {
        for (dst, &src) in out.iter_mut().zip(&self.indices) {
            *dst = frame[src];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_split() {
        let (base, spec) = ChannelSpec::split("path:2,1").unwrap();
        assert_eq!(base, "path");
        assert_eq!(spec.indices(), Some(&[1u32, 0][..]));

        let (base, spec) = ChannelSpec::split("@rx").unwrap();
        assert_eq!(base, "@rx");
        assert!(spec.is_empty());

        let (base, spec) = ChannelSpec::split("-:3,,1,").unwrap();
        assert_eq!(base, "-");
        assert_eq!(spec.indices(), Some(&[2u32, 0][..]));

        let (_, spec) = ChannelSpec::split("file:").unwrap();
        assert!(spec.is_empty());
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            ChannelSpec::parse("x:0"),
            Err(Error::Stream(StreamError::InvalidChannelSpec(_)))
        ));
        assert!(ChannelSpec::parse("x:a").is_err());
        assert!(ChannelSpec::parse("x:1,-2").is_err());
    }

    #[test]
    fn test_resolve_swap() {
        let map = ChannelSpec::parse("path:2,1").unwrap().resolve(2, "path").unwrap();
        assert_eq!(map.indices(), &[1, 0]);
        assert!(!map.is_identity(2));

        let mut out = [0.0; 2];
        map.select(&[0.1, 0.2], &mut out);
        assert_eq!(out, [0.2, 0.1]);
    }

    #[test]
    fn test_resolve_identity_and_subset() {
        let map = ChannelSpec::default().resolve(3, "x").unwrap();
        assert!(map.is_identity(3));
        assert_eq!(map.len(), 3);

        let map = ChannelSpec::parse("x:3").unwrap().resolve(3, "x").unwrap();
        let mut out = [0i16; 1];
        map.select(&[7, 8, 9], &mut out);
        assert_eq!(out, [9]);
    }

    #[test]
    fn test_resolve_out_of_range() {
        let err = ChannelSpec::parse("x:1,4").unwrap().resolve(3, "x").unwrap_err();
        assert!(matches!(
            err,
            Error::Stream(StreamError::ChannelNotPresent { channel: 4, .. })
        ));
    }
}
