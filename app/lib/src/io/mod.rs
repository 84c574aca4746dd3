//! Streaming codec boundary and low-level stream encoding.
//!
//! Segment columns and dictionary files are written through a streaming
//! [`Compressor`] and read back through a streaming [`Decompressor`]. Both
//! sides speak a chunked frame format:
//!
//! ```text
//! ┌──────────────────┬──────────────────────┐
//! │ frame_len: u32 LE │ frame_len bytes      │   repeated
//! └──────────────────┴──────────────────────┘
//! ┌──────────────────┐
//! │ 0u32              │   end-of-stream frame
//! └──────────────────┘
//! ```
//!
//! Frame payloads are either block-compressed ([`block`]) or raw
//! ([`passthrough`]); callers never name which is in use — they hold the
//! trait objects produced by [`open_compressor`] / [`open_decompressor`].
//!
//! Decompressors only move forward. Random access is served by skipping
//! uncompressed bytes; moving backwards requires [`Decompressor::reset`],
//! which reopens the stream from its start.

pub mod block;
pub mod passthrough;

use std::fs;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::Codec;
use crate::error::{LogPackError, Result};

pub use block::{BlockCompressor, BlockDecompressor};
pub use passthrough::{PassthroughCompressor, PassthroughDecompressor};

/// Uncompressed bytes buffered before a frame is emitted.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Writer half of the streaming codec boundary.
pub trait Compressor {
    /// Buffers `data`, emitting complete frames as the buffer fills.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Emits any buffered bytes as a frame and flushes the underlying
    /// writer. The stream remains open for further writes.
    fn flush(&mut self) -> Result<()>;

    /// Flushes, then terminates the stream with the end-of-stream frame.
    /// Further writes fail.
    fn close(&mut self) -> Result<()>;
}

/// Reader half of the streaming codec boundary.
pub trait Decompressor {
    /// Appends up to `n` decompressed bytes to `out`, returning how many
    /// were appended. Returns 0 only at end of stream.
    fn read_up_to(&mut self, n: usize, out: &mut Vec<u8>) -> Result<usize>;

    /// Discards `n` decompressed bytes.
    fn skip(&mut self, n: u64) -> Result<()>;

    /// Rewinds to the start of the stream.
    fn reset(&mut self) -> Result<()>;

    /// Appends exactly `n` decompressed bytes to `out`.
    ///
    /// Fails with `EndOfStream` if the stream is already exhausted, and with
    /// `CorruptArchive` if it ends partway through.
    fn read_exact(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            let got = self.read_up_to(remaining, out)?;
            if got == 0 {
                if remaining == n {
                    return Err(LogPackError::EndOfStream);
                }
                return Err(LogPackError::corrupt(format!(
                    "stream ended {} bytes short of a {}-byte read",
                    remaining, n
                )));
            }
            remaining -= got;
        }
        Ok(())
    }
}

/// Opens a compressor of the configured kind over `file`.
pub fn open_compressor(file: fs::File, codec: Codec) -> Box<dyn Compressor> {
    match codec {
        Codec::Zstd(level) => Box::new(BlockCompressor::new(file, level)),
        Codec::Passthrough => Box::new(PassthroughCompressor::new(file)),
    }
}

/// Opens a decompressor of the configured kind over `file`, treating the
/// file's current position as the start of the stream.
pub fn open_decompressor(file: fs::File, codec: Codec) -> Result<Box<dyn Decompressor>> {
    Ok(match codec {
        Codec::Zstd(_) => Box::new(BlockDecompressor::open(file)?),
        Codec::Passthrough => Box::new(PassthroughDecompressor::open(file)?),
    })
}

/// Writes a frame header and payload to `inner`.
pub(crate) fn write_frame(inner: &mut impl Write, payload: &[u8]) -> Result<()> {
    let mut header = [0u8; 4];
    LittleEndian::write_u32(&mut header, payload.len() as u32);
    inner.write_all(&header)?;
    inner.write_all(payload)?;
    Ok(())
}

/// Appends `value` to `out` as an LEB128 varint.
pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads an LEB128 varint from `bytes` at `*pos`, advancing `*pos`.
pub fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| LogPackError::corrupt("truncated varint"))?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(LogPackError::corrupt("varint overflows 64 bits"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Reads a little-endian u64 from `bytes` at `*pos`, advancing `*pos`.
pub fn read_u64_le(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let end = *pos + 8;
    if end > bytes.len() {
        return Err(LogPackError::corrupt("truncated 64-bit field"));
    }
    let value = LittleEndian::read_u64(&bytes[*pos..end]);
    *pos = end;
    Ok(value)
}

/// Reads a little-endian i64 from `bytes` at `*pos`, advancing `*pos`.
pub fn read_i64_le(bytes: &[u8], pos: &mut usize) -> Result<i64> {
    read_u64_le(bytes, pos).map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let values = [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX];
        for &value in &values {
            let mut buf = Vec::new();
            write_varint(value, &mut buf);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_small_values_are_one_byte() {
        let mut buf = Vec::new();
        write_varint(42, &mut buf);
        assert_eq!(buf, [42]);
    }

    #[test]
    fn test_varint_truncated() {
        let buf = [0x80u8];
        let mut pos = 0;
        assert!(read_varint(&buf, &mut pos).is_err());
    }

    #[test]
    fn test_read_u64_le_truncated() {
        let buf = [1u8, 2, 3];
        let mut pos = 0;
        assert!(read_u64_le(&buf, &mut pos).is_err());
    }
}
