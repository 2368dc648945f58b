//! Inbound frame decoder.
//!
//! The read loop pulls one frame at a time: 4-byte little-endian length,
//! one type byte, then the body. A clean EOF on the length read ends the
//! session; EOF anywhere later is an I/O failure. Bodies are read in full
//! before parsing, so network errors can never masquerade as parse errors.
//!
//! COMPRESSION frames unwrap to a batch of inner frames in the same
//! header shape; each inner message is dispatched in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{CompressionConfig, ProtocolConfig};
use crate::error::{WireError, WireResult};
use crate::messages::{Dispatcher, parse_client};
use crate::monitor::Monitor;
use crate::wire::compress::stream::{
    DecompressionInputStream, InputSource, SliceSource, read_exact,
};
use crate::wire::compress::{Decompress, decompressor_for};
use crate::wire::frame::{self, msg};
use crate::wire::proto::{ProtoReader, WireType};

pub struct FrameDecoder<R> {
    reader: R,
    config: ProtocolConfig,
    compression: CompressionConfig,
    /// Created lazily on the first COMPRESSION frame.
    decompressor: Option<Box<dyn Decompress>>,
    monitor: Arc<dyn Monitor>,
    terminating: Arc<AtomicBool>,
    body: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(
        reader: R,
        config: ProtocolConfig,
        compression: CompressionConfig,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            reader,
            config,
            compression,
            decompressor: None,
            monitor,
            terminating: Arc::new(AtomicBool::new(false)),
            body: Vec::new(),
        }
    }

    /// Flag checked between frames by [`run`](Self::run); a frame already
    /// being read is always drained to completion.
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminating)
    }

    /// Read-decode-dispatch until the peer disconnects, termination is
    /// requested, or a fatal error occurs.
    pub async fn run<D: Dispatcher>(&mut self, dispatcher: &mut D) -> WireResult<()> {
        while !self.terminating.load(Ordering::Relaxed) {
            let Some(ty) = self.read_frame().await? else {
                tracing::debug!("peer closed connection");
                return Ok(());
            };
            let body = std::mem::take(&mut self.body);
            let result = self.process(ty, &body, dispatcher);
            self.body = body;
            result?;
        }
        tracing::debug!("connection terminating");
        Ok(())
    }

    /// Read one frame header and body into the internal buffer. Returns
    /// the type byte, or `None` on a clean disconnect.
    pub async fn read_frame(&mut self) -> WireResult<Option<u8>> {
        let mut len_bytes = [0u8; 4];
        match self.read_full(&mut len_bytes).await {
            Ok(()) => {}
            Err(WireError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let length = u32::from_le_bytes(len_bytes);
        let body_len = frame::body_len(length, self.config.max_message_size)?;

        let mut ty = [0u8; 1];
        self.read_full(&mut ty).await?;
        self.body.resize(body_len, 0);
        if body_len > 0 {
            let mut body = std::mem::take(&mut self.body);
            let result = self.read_full(&mut body).await;
            self.body = body;
            result?;
        }
        self.monitor.bytes_received(4 + u64::from(length));
        Ok(Some(ty[0]))
    }

    async fn read_full(&mut self, buf: &mut [u8]) -> WireResult<()> {
        match self.config.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.reader.read_exact(buf)).await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(WireError::Timeout),
            },
            None => {
                self.reader.read_exact(buf).await?;
                Ok(())
            }
        }
    }

    /// Parse and dispatch one complete frame.
    pub fn process<D: Dispatcher>(
        &mut self,
        ty: u8,
        body: &[u8],
        dispatcher: &mut D,
    ) -> WireResult<()> {
        let result = if ty == msg::COMPRESSION {
            self.process_compressed(body, dispatcher)
        } else {
            dispatch_message(self.monitor.as_ref(), dispatcher, ty, body)
        };
        if let Err(e) = &result {
            self.monitor.decode_error(e.kind());
            tracing::warn!(ty, error = %e, "frame decode failed");
        }
        result
    }

    fn process_compressed<D: Dispatcher>(
        &mut self,
        body: &[u8],
        dispatcher: &mut D,
    ) -> WireResult<()> {
        if !self.compression.enabled() {
            return Err(WireError::CompressionDisabled);
        }

        // Sub-header fields arrive in any order; unknown tags are skipped.
        let mut reader = ProtoReader::new(body);
        let mut message_id = None;
        let mut uncompressed_size = 0u64;
        let mut payload: Option<&[u8]> = None;
        while let Some((field, wire)) = reader.read_tag()? {
            match (field, wire) {
                (1, WireType::Varint) => message_id = Some(reader.read_varint32()?),
                (2, WireType::Varint) => uncompressed_size = reader.read_varint64()?,
                (3, WireType::LengthDelimited) => payload = Some(reader.read_bytes()?),
                (_, wire) => reader.skip_field(wire)?,
            }
        }
        let payload = match payload {
            Some(p) if !p.is_empty() => p,
            _ => {
                return Err(WireError::InvalidMessageFrame(
                    "compressed frame has no payload".into(),
                ));
            }
        };
        // Declared size is enforced before any decompression work.
        if uncompressed_size > self.config.max_message_size as u64 {
            return Err(WireError::FrameTooLarge {
                size: uncompressed_size,
                max: self.config.max_message_size as u64,
            });
        }
        #[cfg(debug_assertions)]
        tracing::debug!(?message_id, uncompressed_size, payload = payload.len(), "compressed frame");
        let _ = message_id;

        if self.decompressor.is_none() {
            self.decompressor = decompressor_for(self.compression.algorithm)?;
        }
        let codec = self.decompressor.as_deref_mut().expect("algorithm checked");
        if codec.was_error() {
            return Err(WireError::Decompress(
                "decompression stream previously failed".into(),
            ));
        }

        let declared = (uncompressed_size > 0).then_some(uncompressed_size);
        let mut source = SliceSource::new(payload);
        let delivered;
        let loop_result;
        {
            let mut stream = DecompressionInputStream::new(codec, &mut source);
            loop_result = read_inner_frames(
                &mut stream,
                self.config.max_message_size,
                declared,
                self.monitor.as_ref(),
                dispatcher,
            );
            delivered = stream.byte_count();
        }

        // Corrupt bytes can decompress into structurally valid headers;
        // the sticky flag is authoritative.
        let codec = self.decompressor.as_deref().expect("algorithm checked");
        if codec.was_error() {
            return Err(WireError::Decompress("corrupt compressed payload".into()));
        }
        loop_result?;
        self.monitor.bytes_received_uncompressed(delivered);
        Ok(())
    }
}

/// Read `u32 size | u8 type | body[size-1]` frames off the decompressed
/// stream until it ends, dispatching each one. Any declared-size remainder
/// is drained and discarded before returning.
fn read_inner_frames(
    stream: &mut DecompressionInputStream<'_>,
    max_message_size: usize,
    declared: Option<u64>,
    monitor: &dyn Monitor,
    dispatcher: &mut dyn Dispatcher,
) -> WireResult<()> {
    let mut body = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        if !read_exact(stream, &mut len_bytes)? {
            break;
        }
        let size = u32::from_le_bytes(len_bytes);
        // Inner frames share the outer header shape: the size includes the
        // type byte, the body spans size - 1.
        let body_len = frame::body_len(size, max_message_size)?;

        let mut ty = [0u8; 1];
        if !read_exact(stream, &mut ty)? {
            return Err(WireError::InvalidMessageFrame(
                "truncated inner frame header".into(),
            ));
        }
        body.resize(body_len, 0);
        if body_len > 0 && !read_exact(stream, &mut body)? {
            return Err(WireError::InvalidMessageFrame(
                "truncated inner frame body".into(),
            ));
        }

        if let Some(limit) = declared {
            if stream.byte_count() > limit {
                return Err(WireError::FrameTooLarge {
                    size: stream.byte_count(),
                    max: limit,
                });
            }
        }
        dispatch_message(monitor, dispatcher, ty[0], &body)?;
    }

    if let Some(limit) = declared {
        let remainder = limit.saturating_sub(stream.byte_count());
        if remainder > 0 {
            stream.skip(remainder as usize)?;
        }
    }
    Ok(())
}

fn dispatch_message(
    monitor: &dyn Monitor,
    dispatcher: &mut dyn Dispatcher,
    ty: u8,
    body: &[u8],
) -> WireResult<()> {
    let message = parse_client(ty, body)?;
    monitor.message_received(ty);
    if message.is_none() {
        monitor.unknown_message_type();
        tracing::debug!(ty, "unknown message type");
    }
    dispatcher.dispatch(ty, message)
}
