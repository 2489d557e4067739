//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vlf_stream::config::TransportConfig;
use vlf_stream::stream::OutputStream;
use vlf_stream::time::Timestamp;

/// Fresh scratch directory, unique per test and process
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vlf-stream-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

/// Transport settings with short retry intervals
pub fn fast_config(buffer_dir: &Path) -> TransportConfig {
    TransportConfig {
        buffer_dir: buffer_dir.to_path_buf(),
        reconnect_interval_ms: 20,
        relisten_interval_ms: 20,
    }
}

/// A TCP port nothing is listening on right now
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn epoch(secs: i64) -> Timestamp {
    Timestamp::compose(secs, 0.0)
}

/// Sample value of frame `n`, channel `c`; exact in `f8` and `f4`
pub fn sample(n: u64, c: usize) -> f64 {
    let v = ((n % 64) as f64 - 32.0) / 64.0;
    if c % 2 == 0 {
        v
    } else {
        -v
    }
}

/// Insert `count` frames numbered from `first`
pub fn write_frames(output: &mut OutputStream, first: u64, count: u64) {
    let channels = output.params().channels as usize;
    let mut frame = vec![0.0; channels];
    for n in first..first + count {
        for (c, s) in frame.iter_mut().enumerate() {
            *s = sample(n, c);
        }
        output.insert_frame(&frame).unwrap();
    }
}

pub const SHORT: Duration = Duration::from_millis(10);
