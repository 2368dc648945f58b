//! zlib/DEFLATE adapter.
//!
//! One deflate stream per direction for the life of the connection; group
//! boundaries are sync flushes, so the peer can decode each group as it
//! arrives while the dictionary carries across groups.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{WireError, WireResult};

pub struct DeflateCompressor {
    ctx: Compress,
}

impl DeflateCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            ctx: Compress::new(Compression::new(level), true),
        }
    }
}

impl super::Compress for DeflateCompressor {
    fn compress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        let current = *input;
        let in_before = self.ctx.total_in();
        let out_before = self.ctx.total_out();
        let status = self
            .ctx
            .compress(current, out, FlushCompress::None)
            .map_err(|e| WireError::Compress(e.to_string()))?;
        debug_assert!(!matches!(status, Status::StreamEnd));
        let consumed = (self.ctx.total_in() - in_before) as usize;
        *input = &current[consumed..];
        Ok((self.ctx.total_out() - out_before) as usize)
    }

    fn flush(&mut self, out: &mut [u8]) -> WireResult<usize> {
        let out_before = self.ctx.total_out();
        match self.ctx.compress(&[], out, FlushCompress::Sync) {
            // BufError here means the stream is already fully flushed;
            // repeated flushes stay silent until new input arrives.
            Ok(Status::BufError) => Ok(0),
            Ok(_) => Ok((self.ctx.total_out() - out_before) as usize),
            Err(e) => Err(WireError::Compress(e.to_string())),
        }
    }
}

pub struct DeflateDecompressor {
    ctx: Decompress,
    error: bool,
    needs_input: bool,
}

impl DeflateDecompressor {
    pub fn new() -> Self {
        Self {
            ctx: Decompress::new(true),
            error: false,
            needs_input: true,
        }
    }
}

impl Default for DeflateDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Decompress for DeflateDecompressor {
    fn decompress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize> {
        if self.error {
            return Err(WireError::Decompress("decompressor in error state".into()));
        }
        let current = *input;
        let in_before = self.ctx.total_in();
        let out_before = self.ctx.total_out();
        match self.ctx.decompress(current, out, FlushDecompress::None) {
            Ok(_) => {
                let consumed = (self.ctx.total_in() - in_before) as usize;
                *input = &current[consumed..];
                self.needs_input = input.is_empty();
                Ok((self.ctx.total_out() - out_before) as usize)
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

#[cfg(test)]
mod tests {
    use super::super::testing::{compress_all, decompress_all};
    use super::super::{Compress as _, Decompress as _};
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sync_flush_keeps_stream_decodable_mid_way() {
        let mut comp = DeflateCompressor::new(6);
        let mut out = Vec::new();
        let mut chunk = [0u8; 512];
        let mut input: &[u8] = b"hello deflate";
        while !input.is_empty() {
            let n = comp.compress(&mut input, &mut chunk).unwrap();
            out.extend_from_slice(&chunk[..n]);
        }
        loop {
            let n = comp.flush(&mut chunk).unwrap();
            out.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                break;
            }
        }

        // The sync-flushed prefix decodes without a stream end marker.
        let mut decomp = DeflateDecompressor::new();
        let restored = decompress_all(&mut decomp, &out).unwrap();
        assert_eq!(restored, b"hello deflate");
        assert!(decomp.needs_input());
    }

    #[test]
    fn level_zero_is_stored_not_errored() {
        let data = vec![7u8; 600];
        let mut comp = DeflateCompressor::new(0);
        let compressed = compress_all(&mut comp, &data);
        // Level 0 stores blocks verbatim; output exceeds input.
        assert!(compressed.len() > data.len());

        let mut decomp = DeflateDecompressor::new();
        assert_eq!(decompress_all(&mut decomp, &compressed).unwrap(), data);
    }
}
