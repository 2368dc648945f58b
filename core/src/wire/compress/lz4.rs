//! LZ4 frame adapter.
//!
//! The frame format has no mid-stream sync point, so every group is a
//! self-contained frame: `flush` finishes the current frame and the next
//! group opens a new one. The decoder accumulates fed bytes and decodes
//! whole frames, treating a truncated trailing frame as pending input.

use std::io::{Cursor, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::error::{WireError, WireResult};

pub struct Lz4Compressor {
    /// Raw input accepted since the last frame close.
    pending: Vec<u8>,
    /// Finished frame bytes not yet handed to the caller.
    staged: Vec<u8>,
    staged_pos: usize,
}

impl Lz4Compressor {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            staged: Vec::new(),
            staged_pos: 0,
        }
    }

    fn drain(&mut self, out: &mut [u8]) -> usize {
        let available = self.staged.len() - self.staged_pos;
        let take = available.min(out.len());
        out[..take].copy_from_slice(&self.staged[self.staged_pos..self.staged_pos + take]);
        self.staged_pos += take;
        if self.staged_pos == self.staged.len() {
            self.staged.clear();
            self.staged_pos = 0;
        }
        take
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Compress for Lz4Compressor {
    fn compress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        // Leftover frame bytes go out before new input is accepted.
        let written = self.drain(out);
        if written == out.len() && !self.staged.is_empty() {
            return Ok(written);
        }
        self.pending.extend_from_slice(input);
        *input = &[];
        Ok(written)
    }

    fn flush(&mut self, out: &mut [u8]) -> WireResult<usize> {
        if !self.pending.is_empty() {
            let mut encoder = FrameEncoder::new(Vec::with_capacity(self.pending.len() / 2 + 64));
            encoder
                .write_all(&self.pending)
                .map_err(|e| WireError::Compress(e.to_string()))?;
            let frame = encoder
                .finish()
                .map_err(|e| WireError::Compress(e.to_string()))?;
            self.staged.extend_from_slice(&frame);
            self.pending.clear();
        }
        Ok(self.drain(out))
    }
}

pub struct Lz4Decompressor {
    input: Vec<u8>,
    decoded: Vec<u8>,
    pos: usize,
    error: bool,
}

impl Lz4Decompressor {
    pub fn new() -> Self {
        Self {
            input: Vec::new(),
            decoded: Vec::new(),
            pos: 0,
            error: false,
        }
    }

    /// Re-decode every complete frame in the accumulated input. The result
    /// is a deterministic prefix-stable function of the input, so `pos`
    /// stays valid across calls.
    fn try_decode(&mut self) -> WireResult<()> {
        let mut cursor = Cursor::new(self.input.as_slice());
        let mut decoded = Vec::new();
        while (cursor.position() as usize) < self.input.len() {
            let mut frame = Vec::new();
            let mut decoder = FrameDecoder::new(&mut cursor);
            match decoder.read_to_end(&mut frame) {
                Ok(_) => decoded.extend_from_slice(&frame),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    self.error = true;
                    return Err(WireError::Decompress(e.to_string()));
                }
            }
        }
        self.decoded = decoded;
        Ok(())
    }
}

impl Default for Lz4Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Decompress for Lz4Decompressor {
    fn decompress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        if self.error {
            return Err(WireError::Decompress("decompressor in error state".into()));
        }
        if !input.is_empty() {
            self.input.extend_from_slice(input);
            *input = &[];
            self.try_decode()?;
        } else if self.pos == self.decoded.len() {
            self.try_decode()?;
        }
        let available = self.decoded.len() - self.pos;
        let take = available.min(out.len());
        out[..take].copy_from_slice(&self.decoded[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }

    fn needs_input(&self) -> bool {
        self.pos == self.decoded.len()
    }

    fn was_error(&self) -> bool {
        self.error
    }
}
