//! Zstandard adapter over the raw streaming contexts.
//!
//! One stream per direction; group boundaries are explicit flush points,
//! which zstd emits as independently decodable blocks within the frame.

use zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::error::{WireError, WireResult};

pub struct ZstdCompressor {
    ctx: Encoder<'static>,
}

impl ZstdCompressor {
    /// `level` is the effective level; zstd has no level 0.
    pub fn new(level: i32) -> WireResult<Self> {
        let ctx = Encoder::new(level).map_err(|e| WireError::Compress(e.to_string()))?;
        Ok(Self { ctx })
    }
}

impl super::Compress for ZstdCompressor {
    fn compress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        let current = *input;
        let mut in_buf = InBuffer::around(current);
        let mut out_buf = OutBuffer::around(out);
        self.ctx
            .run(&mut in_buf, &mut out_buf)
            .map_err(|e| WireError::Compress(e.to_string()))?;
        let consumed = in_buf.pos;
        let written = out_buf.pos();
        *input = &current[consumed..];
        Ok(written)
    }

    fn flush(&mut self, out: &mut [u8]) -> WireResult<usize> {
        let mut out_buf = OutBuffer::around(out);
        self.ctx
            .flush(&mut out_buf)
            .map_err(|e| WireError::Compress(e.to_string()))?;
        Ok(out_buf.pos())
    }
}

pub struct ZstdDecompressor {
    ctx: Decoder<'static>,
    error: bool,
    needs_input: bool,
}

impl ZstdDecompressor {
    pub fn new() -> WireResult<Self> {
        let ctx = Decoder::new().map_err(|e| WireError::Decompress(e.to_string()))?;
        Ok(Self {
            ctx,
            error: false,
            needs_input: true,
        })
    }
}

impl super::Decompress for ZstdDecompressor {
    fn decompress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        if self.error {
            return Err(WireError::Decompress("decompressor in error state".into()));
        }
        let current = *input;
        let mut in_buf = InBuffer::around(current);
        let mut out_buf = OutBuffer::around(out);
        match self.ctx.run(&mut in_buf, &mut out_buf) {
            Ok(_) => {
                let consumed = in_buf.pos;
                let written = out_buf.pos();
                *input = &current[consumed..];
                self.needs_input = input.is_empty();
                Ok(written)
            }
            Err(e) => {
                self.error = true;
                Err(WireError::Decompress(e.to_string()))
            }
        }
    }

    fn needs_input(&self) -> bool {
        self.needs_input
    }

    fn was_error(&self) -> bool {
        self.error
    }
}
