//! Native XDF (Extensible Data Format) reader.
//!
//! - [`chunk`]: magic, chunk framing, variable-length integers, payload cursor.
//! - [`header`]: `<info>` stream header XML and channel formats.
//! - [`clock`]: clock-offset synchronisation and timestamp dejitter.
//! - [`reader`]: decode a whole file into a [`crate::stream::Recording`].

pub mod chunk;
pub mod clock;
pub mod header;
pub mod reader;

pub use chunk::{encode_chunk, encode_varlen, ChunkTag, MAGIC};
pub use clock::{dejitter, linear_fit, synchronize, ClockOffset};
pub use header::{ChannelFormat, StreamHeader};
pub use reader::{load_xdf, read_xdf, XdfOptions};
