//! Uncompressed implementation of the streaming codec boundary.
//!
//! Keeps the chunked framing of the block codec but stores payloads raw.
//! Intended for debugging archives with standard tools; the on-disk layout
//! is otherwise identical.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{LogPackError, Result};
use crate::io::{write_frame, Compressor, Decompressor, DEFAULT_CHUNK_SIZE};

/// Framing-only compressor.
pub struct PassthroughCompressor<W: Write> {
    inner: W,
    buf: Vec<u8>,
    closed: bool,
}

impl<W: Write> PassthroughCompressor<W> {
    /// Creates a passthrough compressor writing frames to `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            closed: false,
        }
    }

    fn emit_frame(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        write_frame(&mut self.inner, &self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

impl<W: Write> Compressor for PassthroughCompressor<W> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(LogPackError::NotInitialised);
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= DEFAULT_CHUNK_SIZE {
            self.emit_frame()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(LogPackError::NotInitialised);
        }
        self.emit_frame()?;
        self.inner.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.emit_frame()?;
        write_frame(&mut self.inner, &[])?;
        self.inner.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Framing-only decompressor.
pub struct PassthroughDecompressor {
    file: fs::File,
    stream_start: u64,
    frame: Vec<u8>,
    frame_pos: usize,
    at_end: bool,
}

impl PassthroughDecompressor {
    /// Opens a decompressor over `file`, treating the file's current
    /// position as the start of the stream.
    pub fn open(mut file: fs::File) -> Result<Self> {
        let stream_start = file.stream_position()?;
        Ok(Self {
            file,
            stream_start,
            frame: Vec::new(),
            frame_pos: 0,
            at_end: false,
        })
    }

    fn next_frame(&mut self) -> Result<bool> {
        if self.at_end {
            return Ok(false);
        }
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let got = self.file.read(&mut header[filled..])?;
            if got == 0 {
                if filled == 0 {
                    self.at_end = true;
                    return Ok(false);
                }
                return Err(LogPackError::corrupt("truncated frame header"));
            }
            filled += got;
        }
        let frame_len = u32::from_le_bytes(header) as usize;
        if frame_len == 0 {
            self.at_end = true;
            return Ok(false);
        }
        self.frame.resize(frame_len, 0);
        self.file
            .read_exact(&mut self.frame)
            .map_err(|_| LogPackError::corrupt("truncated frame payload"))?;
        self.frame_pos = 0;
        Ok(true)
    }
}

impl Decompressor for PassthroughDecompressor {
    fn read_up_to(&mut self, n: usize, out: &mut Vec<u8>) -> Result<usize> {
        let mut appended = 0;
        while appended < n {
            if self.frame_pos == self.frame.len() && !self.next_frame()? {
                break;
            }
            let available = &self.frame[self.frame_pos..];
            let take = available.len().min(n - appended);
            out.extend_from_slice(&available[..take]);
            self.frame_pos += take;
            appended += take;
        }
        Ok(appended)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            if self.frame_pos == self.frame.len() && !self.next_frame()? {
                return Err(LogPackError::corrupt(format!(
                    "stream ended {} bytes short of a skip",
                    remaining
                )));
            }
            let available = (self.frame.len() - self.frame_pos) as u64;
            let take = available.min(remaining);
            self.frame_pos += take as usize;
            remaining -= take;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.stream_start))?;
        self.frame.clear();
        self.frame_pos = 0;
        self.at_end = false;
        Ok(())
    }
}
