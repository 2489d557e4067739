//! Error types for the stream library

use thiserror::Error;

/// Main error type for the library
///
/// Anything that reaches a caller as an `Error` is fatal for the stream it
/// came from. Conditions the library recovers from on its own (resync,
/// reconnects, ring buffer polling) are logged and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sample encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid format flags: {0:08x}")]
    UnsupportedFlags(u32),

    #[error("Unrecognised encoding: {0}")]
    UnknownEncoding(String),

    #[error("Frame has {got} samples, stream has {expected} channels")]
    FrameLength { expected: usize, got: usize },

    #[error("Stream {0} must have i2 format")]
    RequiresI2(String),

    #[error("Invalid block header: {0}")]
    InvalidHeader(String),
}

/// Stream-level protocol and naming errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Parameters changed on {0}")]
    ParametersChanged(String),

    #[error("Unrecognised stream name syntax: {0}")]
    InvalidName(String),

    #[error("Invalid channel spec in {0}")]
    InvalidChannelSpec(String),

    #[error("Channel {channel} not present in {name}")]
    ChannelNotPresent { channel: u32, name: String },

    #[error("Cannot open {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed on {name}: {source}")]
    WriteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Network transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Cannot reach {0}")]
    Resolve(String),

    #[error("Unable to connect to {0}")]
    ConnectionFailed(String),

    #[error("Invalid port number in {0}")]
    InvalidPort(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),
}

/// Shared-memory ring buffer errors
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Cannot map {path}: {reason}")]
    Map { path: String, reason: String },

    #[error("Corrupt buffer {0}")]
    Corrupt(String),

    #[error("Buffer {0} too small")]
    TooSmall(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Invalid timestamp: [{0}]")]
    InvalidTimestamp(String),

    #[error("Invalid stream parameters for {name}: {reason}")]
    InvalidParams { name: String, reason: String },
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
