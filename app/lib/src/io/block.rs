//! Block-compressed implementation of the streaming codec boundary.
//!
//! Each frame payload is one independently decodable compressed block of the
//! bytes buffered since the previous frame. Independent frames are what make
//! the decompressor's forward-only skip cheap: skipped frames are still
//! decoded, but no inter-frame state has to be carried.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{LogPackError, Result};
use crate::io::{write_frame, Compressor, Decompressor, DEFAULT_CHUNK_SIZE};

/// Streaming block compressor over a writer.
pub struct BlockCompressor<W: Write> {
    inner: W,
    buf: Vec<u8>,
    level: i32,
    closed: bool,
}

impl<W: Write> BlockCompressor<W> {
    /// Creates a compressor writing frames to `inner` at the given
    /// compression level.
    pub fn new(inner: W, level: i32) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            level,
            closed: false,
        }
    }

    fn emit_frame(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let payload = zstd::bulk::compress(&self.buf, self.level)?;
        write_frame(&mut self.inner, &payload)?;
        self.buf.clear();
        Ok(())
    }
}

impl<W: Write> Compressor for BlockCompressor<W> {
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

/// Streaming block decompressor over a file.
pub struct BlockDecompressor {
    file: fs::File,
    stream_start: u64,
    frame: Vec<u8>,
    frame_pos: usize,
    at_end: bool,
}

impl BlockDecompressor {
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

    /// Loads the next frame. Returns false at end of stream.
    ///
    /// A stream truncated before its end-of-stream frame is treated as
    /// ending at the last complete frame; that is how uncommitted bytes past
    /// the final snapshot stay invisible to readers.
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
        let mut payload = vec![0u8; frame_len];
        self.file
            .read_exact(&mut payload)
            .map_err(|_| LogPackError::corrupt("truncated frame payload"))?;
        self.frame = zstd::stream::decode_all(&payload[..])
            .map_err(|e| LogPackError::corrupt(format!("frame decode failed: {}", e)))?;
        self.frame_pos = 0;
        Ok(true)
    }
}

impl Decompressor for BlockDecompressor {
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
