//! Stream handles
//!
//! [`OutputStream`] and [`InputStream`] are what tools work with. A stream
//! is opened by name; the name picks the transport (see [`name`]) and, for
//! inputs, an optional channel selection (see [`chanspec`]).

pub mod chanspec;
pub mod input;
pub mod name;
pub mod output;

pub use chanspec::{ChannelMap, ChannelSpec};
pub use input::InputStream;
pub use name::{parse_input, parse_output, OutputName, Target};
pub use output::OutputStream;
