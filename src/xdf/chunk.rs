//! XDF chunk framing.
//!
//! An XDF file is the 4-byte magic `XDF:` followed by a flat sequence of
//! chunks. Every chunk is framed as (all integers little-endian):
//!
//! ```text
//! ┌────────────┬───────────────────────┬────────────┬──────────────────────────┐
//! │ n_len : u8 │ length : n_len bytes  │ tag : u16  │ content : length − 2 B   │
//! └────────────┴───────────────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! `n_len` is 1, 4 or 8. The same variable-length encoding is reused inside
//! sample chunks for the sample count and for string value lengths.
use std::io::Read;

use anyhow::{bail, Result};

use crate::error::PipelineError;

/// File magic.
pub const MAGIC: &[u8; 4] = b"XDF:";

/// Chunk kinds defined by XDF 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTag {
    FileHeader,
    StreamHeader,
    Samples,
    ClockOffset,
    Boundary,
    StreamFooter,
}

impl ChunkTag {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(ChunkTag::FileHeader),
            2 => Some(ChunkTag::StreamHeader),
            3 => Some(ChunkTag::Samples),
            4 => Some(ChunkTag::ClockOffset),
            5 => Some(ChunkTag::Boundary),
            6 => Some(ChunkTag::StreamFooter),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            ChunkTag::FileHeader => 1,
            ChunkTag::StreamHeader => 2,
            ChunkTag::Samples => 3,
            ChunkTag::ClockOffset => 4,
            ChunkTag::Boundary => 5,
            ChunkTag::StreamFooter => 6,
        }
    }
}

/// One chunk with its content loaded.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Raw tag value (unknown tags are preserved and skipped by the reader).
    pub tag: u16,
    /// Content bytes, excluding the tag.
    pub content: Vec<u8>,
}

impl Chunk {
    pub fn kind(&self) -> Option<ChunkTag> {
        ChunkTag::from_u16(self.tag)
    }
}

/// Outcome of reading the next chunk from a stream.
#[derive(Debug)]
pub enum NextChunk {
    Chunk(Chunk),
    /// Clean end of file between chunks.
    End,
    /// The file ends in the middle of a chunk (recording was interrupted).
    Truncated,
}

/// Check the 4-byte magic at the current position.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|_| {
        PipelineError::MalformedContainer("file shorter than the XDF magic".into())
    })?;
    if &magic != MAGIC {
        return Err(PipelineError::MalformedContainer(format!(
            "bad magic {magic:?}, expected \"XDF:\""
        ))
        .into());
    }
    Ok(())
}

/// Read one framed chunk.
pub fn read_chunk<R: Read>(reader: &mut R) -> Result<NextChunk> {
    let mut n_len = [0u8; 1];
    if reader.read(&mut n_len)? == 0 {
        return Ok(NextChunk::End);
    }
    let Some(len) = read_len_body(reader, n_len[0])? else {
        return Ok(NextChunk::Truncated);
    };
    if len < 2 {
        bail!(PipelineError::MalformedContainer(format!("chunk length {len} < 2")));
    }
    let mut tag = [0u8; 2];
    if reader.read_exact(&mut tag).is_err() {
        return Ok(NextChunk::Truncated);
    }
    // Grow with the bytes actually present; the declared length is untrusted.
    let want = len - 2;
    let mut content = Vec::new();
    if reader.by_ref().take(want).read_to_end(&mut content).is_err() || (content.len() as u64) < want {
        return Ok(NextChunk::Truncated);
    }
    Ok(NextChunk::Chunk(Chunk { tag: u16::from_le_bytes(tag), content }))
}

fn read_len_body<R: Read>(reader: &mut R, n_len: u8) -> Result<Option<u64>> {
    let width = match n_len {
        1 | 4 | 8 => n_len as usize,
        other => bail!(PipelineError::MalformedContainer(format!(
            "invalid length-field width {other}"
        ))),
    };
    let mut buf = [0u8; 8];
    if reader.read_exact(&mut buf[..width]).is_err() {
        return Ok(None);
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

// ── Payload cursor ───────────────────────────────────────────────────────────

/// Bounds-checked little-endian reader over a chunk's content.
pub struct Payload<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            bail!(PipelineError::MalformedContainer(format!(
                "chunk content truncated: wanted {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(b))
    }

    pub fn f64(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.bytes(8)?);
        Ok(f64::from_le_bytes(b))
    }

    /// Fixed-width little-endian value of `N` bytes.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut b = [0u8; N];
        b.copy_from_slice(self.bytes(N)?);
        Ok(b)
    }

    /// Variable-length unsigned integer: one width byte (1, 4 or 8) + value.
    pub fn varlen(&mut self) -> Result<u64> {
        let width = self.u8()? as usize;
        if !matches!(width, 1 | 4 | 8) {
            bail!(PipelineError::MalformedContainer(format!(
                "invalid varlen width {width}"
            )));
        }
        let mut b = [0u8; 8];
        b[..width].copy_from_slice(self.bytes(width)?);
        Ok(u64::from_le_bytes(b))
    }
}

/// Encode a variable-length unsigned integer the way writers do: the
/// narrowest of 1, 4 or 8 bytes.
pub fn encode_varlen(v: u64, out: &mut Vec<u8>) {
    if v <= u8::MAX as u64 {
        out.push(1);
        out.push(v as u8);
    } else if v <= u32::MAX as u64 {
        out.push(4);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(8);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Frame `content` as a chunk with the given tag.
pub fn encode_chunk(tag: ChunkTag, content: &[u8], out: &mut Vec<u8>) {
    encode_varlen(content.len() as u64 + 2, out);
    out.extend_from_slice(&tag.as_u16().to_le_bytes());
    out.extend_from_slice(content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn varlen_widths() {
        for v in [0_u64, 200, 70_000, 5_000_000_000] {
            let mut buf = Vec::new();
            encode_varlen(v, &mut buf);
            let mut p = Payload::new(&buf);
            assert_eq!(p.varlen().unwrap(), v);
            assert_eq!(p.remaining(), 0);
        }
    }

    #[test]
    fn chunk_frame_round_trip() {
        let mut buf = Vec::new();
        encode_chunk(ChunkTag::Boundary, &[7u8; 16], &mut buf);
        let mut cursor = Cursor::new(buf);
        let NextChunk::Chunk(c) = read_chunk(&mut cursor).unwrap() else {
            panic!("expected a chunk");
        };
        assert_eq!(c.kind(), Some(ChunkTag::Boundary));
        assert_eq!(c.content, vec![7u8; 16]);
        assert!(matches!(read_chunk(&mut cursor).unwrap(), NextChunk::End));
    }

    #[test]
    fn truncated_chunk_is_reported() {
        let mut buf = Vec::new();
        encode_chunk(ChunkTag::Samples, &[1u8; 32], &mut buf);
        buf.truncate(buf.len() - 5);
        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_chunk(&mut cursor).unwrap(), NextChunk::Truncated));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut cursor = Cursor::new(b"FIF:....".to_vec());
        let err = read_magic(&mut cursor).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MalformedContainer(_))
        ));
    }

    #[test]
    fn payload_truncation_is_an_error() {
        let data = [1u8, 2, 3];
        let mut p = Payload::new(&data);
        assert!(p.u32().is_err());
    }
}
