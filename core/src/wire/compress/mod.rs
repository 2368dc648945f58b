//! Streaming compression adapters.
//!
//! Each algorithm wraps its native codec context behind the [`Compress`] /
//! [`Decompress`] traits. Input is handed over as an advancing slice — the
//! adapter consumes what it can and never copies caller memory. Exactly one
//! adapter instance exists per direction per connection, selected once at
//! capability commit.

mod deflate;
mod lz4;
pub mod stream;
mod zstd;

pub use deflate::{DeflateCompressor, DeflateDecompressor};
pub use lz4::{Lz4Compressor, Lz4Decompressor};
pub use zstd::{ZstdCompressor, ZstdDecompressor};

use crate::config::CompressionAlgorithm;
use crate::error::WireResult;

/// Compressing half of an algorithm adapter.
pub trait Compress: Send {
    /// Consume as much of `input` as the codec's block boundaries and the
    /// output capacity allow, advancing the slice past consumed bytes.
    /// Returns bytes written to `out`. Output the codec buffered internally
    /// is drained on subsequent calls before new input is accepted.
    fn compress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize>;

    /// Emit all buffered compressed data (stream flush, not close). With
    /// nothing pending this writes zero bytes and reports success, so
    /// repeated flushes are idempotent until new input arrives.
    fn flush(&mut self, out: &mut [u8]) -> WireResult<usize>;
}

/// Decompressing half of an algorithm adapter.
pub trait Decompress: Send {
    /// Inflate as much as fits `out`, advancing `input` past consumed
    /// bytes.
    fn decompress(&mut self, input: &mut &[u8], out: &mut [u8]) -> WireResult<usize>;

    /// True when all previously supplied input was consumed and more is
    /// required before another call can produce output.
    fn needs_input(&self) -> bool;

    /// Sticky: once a codec error occurred this stays set for the adapter's
    /// lifetime. The decode layer treats it as fatal for the connection.
    fn was_error(&self) -> bool;
}

/// Valid level range per algorithm; `None` when compression is off.
/// Zstd excludes level 0 (callers remap 0 to 1 before clamping).
pub fn level_bounds(algorithm: CompressionAlgorithm) -> Option<(i32, i32)> {
    match algorithm {
        CompressionAlgorithm::None => None,
        CompressionAlgorithm::Deflate => Some((0, 9)),
        CompressionAlgorithm::Lz4 => Some((0, 0)),
        CompressionAlgorithm::Zstd => Some((1, 22)),
    }
}

/// Build the outbound adapter for a negotiated algorithm. `level` must
/// already be the effective (clamped) level.
pub fn compressor_for(
    algorithm: CompressionAlgorithm,
    level: i32,
) -> WireResult<Option<Box<dyn Compress>>> {
    Ok(match algorithm {
        CompressionAlgorithm::None => None,
        CompressionAlgorithm::Deflate => Some(Box::new(DeflateCompressor::new(level as u32))),
        CompressionAlgorithm::Lz4 => Some(Box::new(Lz4Compressor::new())),
        CompressionAlgorithm::Zstd => Some(Box::new(ZstdCompressor::new(level)?)),
    })
}

/// Build the inbound adapter for a negotiated algorithm.
pub fn decompressor_for(
    algorithm: CompressionAlgorithm,
) -> WireResult<Option<Box<dyn Decompress>>> {
    Ok(match algorithm {
        CompressionAlgorithm::None => None,
        CompressionAlgorithm::Deflate => Some(Box::new(DeflateDecompressor::new())),
        CompressionAlgorithm::Lz4 => Some(Box::new(Lz4Decompressor::new())),
        CompressionAlgorithm::Zstd => Some(Box::new(ZstdDecompressor::new()?)),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Compress `data` fully through an adapter, flushing at the end.
    pub fn compress_all(codec: &mut dyn Compress, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 256];
        let mut input = data;
        while !input.is_empty() {
            let n = codec.compress(&mut input, &mut chunk).unwrap();
            out.extend_from_slice(&chunk[..n]);
        }
        loop {
            let n = codec.flush(&mut chunk).unwrap();
            out.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                break;
            }
        }
        out
    }

    /// Decompress everything an adapter can produce from `data`.
    pub fn decompress_all(codec: &mut dyn Decompress, data: &[u8]) -> WireResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 256];
        let mut input = data;
        loop {
            let n = codec.decompress(&mut input, &mut chunk)?;
            out.extend_from_slice(&chunk[..n]);
            if n == 0 && input.is_empty() {
                break;
            }
        }
        Ok(out)
    }
}
