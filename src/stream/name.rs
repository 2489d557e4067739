//! Stream name grammar
//!
//! ```text
//! [sigil]path_or_host[,opt...][:ch,ch...]
//!
//!   +host,port      ephemeral TCP client (output)
//!   ++host,port     persistent TCP client (output)
//!   +port  ++port   TCP listener (input)
//!   @name[,secs]    shared-memory ring buffer
//!   path  -         file, FIFO, stdin or stdout
//! ```
//!
//! Options are an encoding tag (`f8 f4 i4 i2 i1`) or an integer, which is
//! the port of a network output or the length in seconds of a new ring
//! buffer. Channel selection (`:ch,...`) applies to inputs and is split off
//! by [`crate::stream::ChannelSpec::split`] before the name gets here.

use crate::codec::Encoding;
use crate::error::{NetworkError, Result, StreamError};
use crate::transport::ring::{clamp_buffer_secs, DEFAULT_BUFFER_SECS};

/// Where a stream lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Plain file or FIFO, `-` for stdin/stdout
    File { path: String },
    /// Shared-memory ring buffer
    Ring { name: String, secs: u32 },
    /// TCP client connecting to a consumer
    Client {
        host: String,
        port: u16,
        persistent: bool,
    },
    /// TCP listener waiting for a producer
    Listen { port: u16, persistent: bool },
}

/// Parsed output stream name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName {
    pub target: Target,
    pub encoding: Encoding,
}

enum Sigil {
    None,
    Net { persistent: bool },
    Ring,
}

fn split_sigil(name: &str) -> (Sigil, &str) {
    if let Some(rest) = name.strip_prefix("++") {
        (Sigil::Net { persistent: true }, rest)
    } else if let Some(rest) = name.strip_prefix('+') {
        (Sigil::Net { persistent: false }, rest)
    } else if let Some(rest) = name.strip_prefix('@') {
        (Sigil::Ring, rest)
    } else {
        (Sigil::None, name)
    }
}

fn parse_port(text: &str, name: &str) -> Result<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NetworkError::InvalidPort(name.to_string()).into());
    }
    text.parse::<u16>()
        .map_err(|_| NetworkError::InvalidPort(name.to_string()).into())
}

/// Parse the name of an output stream
pub fn parse_output(name: &str) -> Result<OutputName> {
    let (sigil, rest) = split_sigil(name);
    let mut parts = rest.split(',');
    let base = parts.next().unwrap_or_default();
    if base.is_empty() {
        return Err(StreamError::InvalidName(name.to_string()).into());
    }

    let mut encoding = Encoding::default();
    let mut integer: Option<&str> = None;
    for opt in parts {
        if opt.is_empty() {
            continue;
        }
        if opt.bytes().all(|b| b.is_ascii_digit()) {
            integer = Some(opt);
        } else if let Ok(enc) = opt.parse::<Encoding>() {
            encoding = enc;
        } else {
            return Err(StreamError::InvalidName(format!("{}: option {}", name, opt)).into());
        }
    }

    let target = match sigil {
        Sigil::Net { persistent } => {
            let port = parse_port(integer.unwrap_or_default(), name)?;
            Target::Client {
                host: base.to_string(),
                port,
                persistent,
            }
        }
        Sigil::Ring => {
            let secs = match integer {
                Some(text) => clamp_buffer_secs(text.parse().unwrap_or(u32::MAX), name),
                None => DEFAULT_BUFFER_SECS,
            };
            Target::Ring {
                name: base.to_string(),
                secs,
            }
        }
        Sigil::None => {
            if let Some(text) = integer {
                tracing::warn!("integer option {} ignored in {}", text, name);
            }
            Target::File {
                path: base.to_string(),
            }
        }
    };

    Ok(OutputName { target, encoding })
}

/// Parse the name of an input stream, channel selection already removed
pub fn parse_input(name: &str) -> Result<Target> {
    let (sigil, rest) = split_sigil(name);

    match sigil {
        Sigil::Net { persistent } => {
            let port_text = rest.split(',').next().unwrap_or_default();
            Ok(Target::Listen {
                port: parse_port(port_text, name)?,
                persistent,
            })
        }
        Sigil::Ring => {
            let base = rest.split(',').next().unwrap_or_default();
            if base.is_empty() {
                return Err(StreamError::InvalidName(name.to_string()).into());
            }
            Ok(Target::Ring {
                name: base.to_string(),
                secs: DEFAULT_BUFFER_SECS,
            })
        }
        Sigil::None => {
            if rest.is_empty() {
                return Err(StreamError::InvalidName(name.to_string()).into());
            }
            Ok(Target::File {
                path: rest.to_string(),
            })
        }
    }
}
