//! XDF recording reader.
//!
//! # Algorithm
//! 1. Check the `XDF:` magic.
//! 2. Walk chunks in file order:
//!    * FileHeader   → remember `<version>`.
//!    * StreamHeader → register the stream (order of appearance is the
//!      stream order of the resulting [`Recording`]).
//!    * Samples      → decode and append to the owning stream.
//!    * ClockOffset  → collect `(collection_time, offset)` pairs.
//!    * Boundary / StreamFooter / unknown tags → skipped.
//! 3. A file that ends mid-chunk keeps everything decoded so far and logs a
//!    warning (interrupted recordings are common).
//! 4. Per stream: clock synchronisation, then dejitter (both optional).
//!
//! # Sample chunk layout
//! ```text
//! stream_id : u32
//! n_samples : varlen
//! repeat n_samples:
//!   ts_bytes : u8            0 → stamp omitted, 8 → f64 follows
//!   ts       : f64           only if ts_bytes == 8
//!   values   : channel_count × value     (string value = varlen len + UTF-8)
//! ```
//! An omitted stamp is the previous one plus `1 / nominal_srate`; the first
//! previous stamp is `0.0`.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::chunk::{read_chunk, read_magic, Chunk, ChunkTag, NextChunk, Payload};
use super::clock::{dejitter, synchronize, ClockOffset};
use super::header::{parse_file_version, ChannelFormat, StreamHeader};
use crate::error::PipelineError;
use crate::stream::{Recording, Stream, StreamSamples};

/// Timestamp post-processing switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XdfOptions {
    /// Apply clock-offset correction.
    pub synchronize_clocks: bool,
    /// Replace stamps of regularly sampled streams by a fitted grid.
    pub dejitter: bool,
}

impl Default for XdfOptions {
    fn default() -> Self {
        Self { synchronize_clocks: true, dejitter: true }
    }
}

/// Per-stream accumulator while chunks are decoded.
struct StreamBuilder {
    id: u32,
    header: StreamHeader,
    numeric: Vec<f64>,
    strings: Vec<Vec<String>>,
    timestamps: Vec<f64>,
    offsets: Vec<ClockOffset>,
}

impl StreamBuilder {
    fn new(id: u32, header: StreamHeader) -> Self {
        Self {
            id,
            header,
            numeric: Vec::new(),
            strings: Vec::new(),
            timestamps: Vec::new(),
            offsets: Vec::new(),
        }
    }

    fn n_samples(&self) -> usize {
        self.timestamps.len()
    }

    fn push_samples(&mut self, p: &mut Payload<'_>) -> Result<()> {
        let n = p.varlen()? as usize;
        let n_ch = self.header.channel_count;
        let format = self.header.channel_format;
        let step = if self.header.nominal_srate > 0.0 {
            1.0 / self.header.nominal_srate
        } else {
            0.0
        };

        for _ in 0..n {
            let ts = match p.u8()? {
                8 => p.f64()?,
                0 => self.timestamps.last().copied().unwrap_or(0.0) + step,
                other => {
                    return Err(PipelineError::MalformedContainer(format!(
                        "stream {}: timestamp width {other}",
                        self.id
                    ))
                    .into())
                }
            };
            if format.is_numeric() {
                for _ in 0..n_ch {
                    self.numeric.push(read_value(p, format)?);
                }
            } else {
                let mut row = Vec::with_capacity(n_ch);
                for _ in 0..n_ch {
                    let len = p.varlen()? as usize;
                    row.push(String::from_utf8_lossy(p.bytes(len)?).into_owned());
                }
                self.strings.push(row);
            }
            self.timestamps.push(ts);
        }
        Ok(())
    }

    fn finish(mut self, opts: &XdfOptions) -> Result<Stream> {
        if opts.synchronize_clocks {
            synchronize(&mut self.timestamps, &self.offsets);
        }
        if opts.dejitter {
            dejitter(&mut self.timestamps, self.header.nominal_srate);
        }
        let n_ch = self.header.channel_count;
        let samples = if self.header.channel_format.is_numeric() {
            let rows = if n_ch == 0 { 0 } else { self.numeric.len() / n_ch };
            let arr = ndarray::Array2::from_shape_vec((rows, n_ch), self.numeric)
                .with_context(|| format!("stream {}: sample matrix", self.id))?;
            StreamSamples::Numeric(arr)
        } else {
            StreamSamples::Strings(self.strings)
        };
        Stream::new(self.id, &self.header, samples, self.timestamps)
    }
}

fn read_value(p: &mut Payload<'_>, format: ChannelFormat) -> Result<f64> {
    Ok(match format {
        ChannelFormat::Float32 => f32::from_le_bytes(p.array::<4>()?) as f64,
        ChannelFormat::Double64 => p.f64()?,
        ChannelFormat::Int8 => i8::from_le_bytes(p.array::<1>()?) as f64,
        ChannelFormat::Int16 => i16::from_le_bytes(p.array::<2>()?) as f64,
        ChannelFormat::Int32 => i32::from_le_bytes(p.array::<4>()?) as f64,
        ChannelFormat::Int64 => i64::from_le_bytes(p.array::<8>()?) as f64,
        ChannelFormat::String => {
            return Err(PipelineError::MalformedContainer(
                "string value in a numeric stream".into(),
            )
            .into())
        }
    })
}

/// Open and decode an XDF file.
pub fn load_xdf<P: AsRef<Path>>(path: P, opts: &XdfOptions) -> Result<Recording> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rec = read_xdf(BufReader::new(file), opts)
        .with_context(|| format!("reading {}", path.display()))?;
    info!(
        path = %path.display(),
        streams = rec.streams.len(),
        "loaded XDF recording"
    );
    Ok(rec)
}

/// Decode an XDF byte stream.
pub fn read_xdf<R: Read>(mut reader: R, opts: &XdfOptions) -> Result<Recording> {
    read_magic(&mut reader)?;

    let mut version = None;
    let mut order: Vec<u32> = Vec::new();
    let mut builders: HashMap<u32, StreamBuilder> = HashMap::new();

    loop {
        let chunk = match read_chunk(&mut reader)? {
            NextChunk::Chunk(c) => c,
            NextChunk::End => break,
            NextChunk::Truncated => {
                warn!("XDF file ends inside a chunk; keeping data decoded so far");
                break;
            }
        };
        handle_chunk(chunk, &mut version, &mut order, &mut builders)?;
    }

    let mut streams = Vec::with_capacity(order.len());
    for id in order {
        if let Some(b) = builders.remove(&id) {
            debug!(id, name = %b.header.name, samples = b.n_samples(), "stream decoded");
            streams.push(b.finish(opts)?);
        }
    }
    Ok(Recording { version, streams })
}

fn handle_chunk(
    chunk: Chunk,
    version: &mut Option<String>,
    order: &mut Vec<u32>,
    builders: &mut HashMap<u32, StreamBuilder>,
) -> Result<()> {
    let Some(kind) = chunk.kind() else {
        debug!(tag = chunk.tag, "skipping unknown chunk");
        return Ok(());
    };
    let mut p = Payload::new(&chunk.content);
    match kind {
        ChunkTag::FileHeader => {
            let xml = String::from_utf8_lossy(p.rest());
            *version = parse_file_version(&xml);
        }
        ChunkTag::StreamHeader => {
            let id = p.u32()?;
            let xml = String::from_utf8_lossy(p.rest());
            let header = StreamHeader::parse(&xml)
                .with_context(|| format!("stream {id} header"))?;
            if builders.contains_key(&id) {
                warn!(id, "duplicate stream header; keeping the first");
            } else {
                order.push(id);
                builders.insert(id, StreamBuilder::new(id, header));
            }
        }
        ChunkTag::Samples => {
            let id = p.u32()?;
            match builders.get_mut(&id) {
                Some(b) => b
                    .push_samples(&mut p)
                    .with_context(|| format!("samples of stream {id}"))?,
                None => warn!(id, "samples for a stream without header; skipped"),
            }
        }
        ChunkTag::ClockOffset => {
            let id = p.u32()?;
            let collection_time = p.f64()?;
            let offset = p.f64()?;
            if let Some(b) = builders.get_mut(&id) {
                b.offsets.push(ClockOffset { collection_time, offset });
            }
        }
        ChunkTag::Boundary | ChunkTag::StreamFooter => {}
    }
    Ok(())
}
