//! Pull-based stream wrappers around the algorithm adapters.
//!
//! [`CompressionOutputStream`] lets callers write plain bytes into a sink
//! that receives compressed bytes; [`DecompressionInputStream`] lets
//! callers read plain bytes out of a source that holds compressed bytes.
//! Both follow the next/back-up/byte-count contract, and both track
//! cumulative delivered bytes for compressed-vs-uncompressed accounting.

use crate::error::{WireError, WireResult};
use crate::wire::compress::{Compress, Decompress};

/// Bytes granted to plain-byte writers between compression steps.
const COMPRESS_STAGING: usize = 10;

/// Size of the decompressed refill buffer.
const DECOMPRESS_BUFFER: usize = 512;

/// Chunk granted per `next` call by [`VecSink`].
const SINK_CHUNK: usize = 1024;

/// Destination of compressed bytes: grants writable chunks and takes back
/// the unused tail of the most recent one.
pub trait OutputSink {
    fn next(&mut self) -> WireResult<&mut [u8]>;
    fn back_up(&mut self, count: usize);
    fn byte_count(&self) -> u64;
}

/// Source of bytes: yields readable chunks, supports rewinding within the
/// most recent chunk and skipping ahead.
pub trait InputSource {
    fn next(&mut self) -> WireResult<Option<&[u8]>>;
    fn back_up(&mut self, count: usize);
    fn skip(&mut self, count: usize) -> WireResult<bool>;
    fn byte_count(&self) -> u64;
}

/// Growable sink over a plain vector.
pub struct VecSink {
    buf: Vec<u8>,
    delivered: u64,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            delivered: 0,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for VecSink {
    fn next(&mut self) -> WireResult<&mut [u8]> {
        let start = self.buf.len();
        self.buf.resize(start + SINK_CHUNK, 0);
        self.delivered += SINK_CHUNK as u64;
        Ok(&mut self.buf[start..])
    }

    fn back_up(&mut self, count: usize) {
        debug_assert!(count <= self.buf.len());
        self.buf.truncate(self.buf.len() - count);
        self.delivered -= count as u64;
    }

    fn byte_count(&self) -> u64 {
        self.delivered
    }
}

/// Source over a borrowed slice; yields the whole remainder in one chunk.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl InputSource for SliceSource<'_> {
    fn next(&mut self) -> WireResult<Option<&[u8]>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        let chunk = &self.data[self.pos..];
        self.pos = self.data.len();
        Ok(Some(chunk))
    }

    fn back_up(&mut self, count: usize) {
        debug_assert!(count <= self.pos);
        self.pos -= count;
    }

    fn skip(&mut self, count: usize) -> WireResult<bool> {
        let available = self.data.len() - self.pos;
        let take = available.min(count);
        self.pos += take;
        Ok(take == count)
    }

    fn byte_count(&self) -> u64 {
        self.pos as u64
    }
}

/// Adapts a [`Compress`] codec to an [`OutputSink`]: callers write plain
/// bytes, the wrapped sink receives compressed bytes.
///
/// Plain-byte writers get the small staging buffer from `next`; each
/// refill first compresses the previous staging contents. `finish`
/// compresses the partial staging buffer, flushes the codec, and returns
/// unused destination capacity through the sink's `back_up`.
pub struct CompressionOutputStream<'a> {
    codec: &'a mut dyn Compress,
    sink: &'a mut dyn OutputSink,
    staging: [u8; COMPRESS_STAGING],
    staged: usize,
    accepted: u64,
}

impl<'a> CompressionOutputStream<'a> {
    pub fn new(codec: &'a mut dyn Compress, sink: &'a mut dyn OutputSink) -> Self {
        Self {
            codec,
            sink,
            staging: [0; COMPRESS_STAGING],
            staged: 0,
            accepted: 0,
        }
    }

    /// Bulk write bypassing the staging buffer.
    pub fn write(&mut self, data: &[u8]) -> WireResult<()> {
        self.drain_staging()?;
        self.accepted += data.len() as u64;
        Self::compress_into(&mut *self.codec, &mut *self.sink, data)
    }

    /// Compress staged bytes and codec-flush everything downstream.
    pub fn finish(mut self) -> WireResult<()> {
        self.drain_staging()?;
        loop {
            let cap;
            let written;
            {
                let chunk = self.sink.next()?;
                cap = chunk.len();
                written = self.codec.flush(chunk)?;
            }
            if cap > written {
                self.sink.back_up(cap - written);
            }
            if written < cap {
                return Ok(());
            }
        }
    }

    fn drain_staging(&mut self) -> WireResult<()> {
        if self.staged == 0 {
            return Ok(());
        }
        let staged = self.staged;
        self.staged = 0;
        let staging = self.staging;
        Self::compress_into(&mut *self.codec, &mut *self.sink, &staging[..staged])
    }

    fn compress_into(
        codec: &mut dyn Compress,
        sink: &mut dyn OutputSink,
        data: &[u8],
    ) -> WireResult<()> {
        let mut input = data;
        while !input.is_empty() {
            let before = input.len();
            let cap;
            let written;
            {
                let chunk = sink.next()?;
                cap = chunk.len();
                written = codec.compress(&mut input, chunk)?;
            }
            if cap > written {
                sink.back_up(cap - written);
            }
            if written == 0 && input.len() == before {
                return Err(WireError::Compress("codec made no progress".into()));
            }
        }
        Ok(())
    }
}

impl OutputSink for CompressionOutputStream<'_> {
    fn next(&mut self) -> WireResult<&mut [u8]> {
        self.drain_staging()?;
        self.staged = COMPRESS_STAGING;
        self.accepted += COMPRESS_STAGING as u64;
        Ok(&mut self.staging)
    }

    fn back_up(&mut self, count: usize) {
        debug_assert!(count <= self.staged);
        self.staged -= count;
        self.accepted -= count as u64;
    }

    fn byte_count(&self) -> u64 {
        self.accepted
    }
}

/// Adapts a [`Decompress`] codec to an [`InputSource`]: callers read plain
/// bytes, the wrapped source supplies compressed bytes.
pub struct DecompressionInputStream<'a> {
    codec: &'a mut dyn Decompress,
    source: &'a mut dyn InputSource,
    buf: [u8; DECOMPRESS_BUFFER],
    filled: usize,
    read_pos: usize,
    delivered: u64,
}

impl<'a> DecompressionInputStream<'a> {
    pub fn new(codec: &'a mut dyn Decompress, source: &'a mut dyn InputSource) -> Self {
        Self {
            codec,
            source,
            buf: [0; DECOMPRESS_BUFFER],
            filled: 0,
            read_pos: 0,
            delivered: 0,
        }
    }

    /// Refill the local buffer. Returns false when the source is exhausted
    /// and the codec has nothing more to produce.
    fn refill(&mut self) -> WireResult<bool> {
        self.read_pos = 0;
        self.filled = 0;
        loop {
            // Drain anything the codec already holds before pulling more.
            let mut empty: &[u8] = &[];
            let n = self.codec.decompress(&mut empty, &mut self.buf)?;
            if n > 0 {
                self.filled = n;
                return Ok(true);
            }

            let produced;
            let unread;
            let offered;
            {
                let Some(chunk) = self.source.next()? else {
                    return Ok(false);
                };
                offered = chunk.len();
                let mut input = chunk;
                produced = self.codec.decompress(&mut input, &mut self.buf)?;
                unread = input.len();
            }
            if unread > 0 {
                self.source.back_up(unread);
            }
            if produced > 0 {
                self.filled = produced;
                return Ok(true);
            }
            if unread == offered {
                return Err(WireError::Decompress("codec made no progress".into()));
            }
        }
    }
}

impl InputSource for DecompressionInputStream<'_> {
    fn next(&mut self) -> WireResult<Option<&[u8]>> {
        if self.read_pos == self.filled && !self.refill()? {
            return Ok(None);
        }
        let chunk_start = self.read_pos;
        self.read_pos = self.filled;
        self.delivered += (self.filled - chunk_start) as u64;
        Ok(Some(&self.buf[chunk_start..self.filled]))
    }

    /// Rewind within the current refill only.
    fn back_up(&mut self, count: usize) {
        debug_assert!(count <= self.read_pos);
        self.read_pos -= count;
        self.delivered -= count as u64;
    }

    fn skip(&mut self, mut count: usize) -> WireResult<bool> {
        while count > 0 {
            let available;
            match self.next()? {
                Some(chunk) => available = chunk.len(),
                None => return Ok(false),
            }
            if available > count {
                self.back_up(available - count);
                return Ok(true);
            }
            count -= available;
        }
        Ok(true)
    }

    fn byte_count(&self) -> u64 {
        self.delivered
    }
}

/// Read exactly `out.len()` bytes from a source. Returns false on a clean
/// end-of-stream before the first byte; a partial read is an error.
pub fn read_exact(source: &mut dyn InputSource, out: &mut [u8]) -> WireResult<bool> {
    let mut filled = 0;
    while filled < out.len() {
        let take;
        let surplus;
        match source.next()? {
            Some(chunk) => {
                take = chunk.len().min(out.len() - filled);
                out[filled..filled + take].copy_from_slice(&chunk[..take]);
                surplus = chunk.len() - take;
            }
            None if filled == 0 => return Ok(false),
            None => {
                return Err(WireError::InvalidMessageFrame(
                    "truncated frame in stream".into(),
                ));
            }
        }
        filled += take;
        if surplus > 0 {
            source.back_up(surplus);
        }
    }
    Ok(true)
}
