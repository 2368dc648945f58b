//! Output flushing: when buffered frames get pushed to the transport.
//!
//! The plain [`Flusher`] classifies each completed message as bufferable
//! or not, bounds buffered pages, and owns the sticky write-failure state.
//! [`OutputPipeline`] is the connection-facing assembly: it stages frames,
//! batches compressible ones into COMPRESSION envelopes per the negotiated
//! style, and delegates the actual write to the plain flusher.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::{CompressionConfig, CompressionStyle, ProtocolConfig};
use crate::error::{WireError, WireResult};
use crate::monitor::Monitor;
use crate::wire::buffer::PageBuffer;
use crate::wire::compress::stream::{CompressionOutputStream, VecSink};
use crate::wire::compress::{Compress, compressor_for};
use crate::wire::encoder::MessageEncoder;
use crate::wire::frame::{self, msg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed,
    NotFlushed,
}

/// Invoked once when the flusher enters its permanent failure state.
pub type ErrorHandler = Box<dyn FnMut(&WireError) + Send>;

pub struct Flusher {
    pending: bool,
    failed: bool,
    max_buffered_pages: usize,
    monitor: Arc<dyn Monitor>,
    on_error: Option<ErrorHandler>,
}

impl Flusher {
    pub fn new(max_buffered_pages: usize, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            pending: false,
            failed: false,
            max_buffered_pages,
            monitor,
            on_error: None,
        }
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.on_error = Some(handler);
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Classify a just-completed message. Non-bufferable types and a full
    /// buffer both schedule a flush.
    pub fn on_message(&mut self, ty: u8, buffered_pages: usize) {
        if self.pending {
            return;
        }
        if !frame::is_bufferable(ty) || buffered_pages >= self.max_buffered_pages {
            self.pending = true;
        }
    }

    /// Unconditional flush scheduling for explicit protocol moments.
    pub fn flush_required(&mut self) {
        self.pending = true;
    }

    /// Write the whole page chain if a flush is pending. A short or
    /// zero-byte write fails the flusher permanently.
    pub async fn try_flush<W: AsyncWrite + Unpin>(
        &mut self,
        transport: &mut W,
        buf: &mut PageBuffer,
    ) -> WireResult<FlushOutcome> {
        if self.failed {
            return Err(WireError::WriteFailed("flusher previously failed".into()));
        }
        if !self.pending {
            return Ok(FlushOutcome::NotFlushed);
        }

        let mut total = 0u64;
        for page in buf.pages() {
            let mut offset = 0;
            while offset < page.len() {
                let n = match transport.write(&page[offset..]).await {
                    Ok(n) => n,
                    Err(e) => return Err(self.fail(e.into())),
                };
                if n == 0 {
                    return Err(self.fail(WireError::WriteFailed("zero-byte write".into())));
                }
                offset += n;
            }
            total += page.len() as u64;
        }
        if let Err(e) = transport.flush().await {
            return Err(self.fail(e.into()));
        }

        self.monitor.bytes_sent(total);
        buf.reset();
        self.pending = false;
        Ok(FlushOutcome::Flushed)
    }

    fn fail(&mut self, error: WireError) -> WireError {
        self.failed = true;
        tracing::error!(error = %error, "transport write failed; flusher disabled");
        if let Some(handler) = &mut self.on_error {
            handler(&error);
        }
        error
    }
}

/// Compression batching state for the outbound direction.
struct GroupState {
    codec: Box<dyn Compress>,
    style: CompressionStyle,
    max_messages: i64,
    /// Inner frames accumulated for the open group.
    group: PageBuffer,
    /// Bytes of completed frames in `group`.
    committed: usize,
    count: i64,
    current_id: Option<u8>,
    /// Rollback record for `abort_last`: (frame start, count, id) before
    /// the most recent message. Cleared when the group closes.
    last_frame: Option<(usize, i64, Option<u8>)>,
}

/// The outbound half of a connection: staging buffer, optional compression
/// grouping, and the flusher.
pub struct OutputPipeline {
    main: PageBuffer,
    flusher: Flusher,
    compression: Option<GroupState>,
    monitor: Arc<dyn Monitor>,
}

impl OutputPipeline {
    pub fn new(
        config: &ProtocolConfig,
        compression: &CompressionConfig,
        monitor: Arc<dyn Monitor>,
    ) -> WireResult<Self> {
        let group_state = match compressor_for(compression.algorithm, compression.effective_level())?
        {
            Some(codec) => Some(GroupState {
                codec,
                style: compression.style,
                max_messages: compression.max_messages,
                group: PageBuffer::new(config.page_size),
                committed: 0,
                count: 0,
                current_id: None,
                last_frame: None,
            }),
            None => None,
        };
        Ok(Self {
            main: PageBuffer::new(config.page_size),
            flusher: Flusher::new(config.max_buffered_pages, monitor.clone()),
            compression: group_state,
            monitor,
        })
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.flusher.set_error_handler(handler);
    }

    pub fn is_failed(&self) -> bool {
        self.flusher.is_failed()
    }

    /// Buffer the next frame is built into: the group buffer when
    /// compression is negotiated, the transmit buffer otherwise.
    pub fn buffer(&mut self) -> &mut PageBuffer {
        match &mut self.compression {
            Some(ctx) => &mut ctx.group,
            None => &mut self.main,
        }
    }

    /// Account a completed frame and route it through the group rules.
    pub fn message_complete(&mut self, ty: u8) -> WireResult<()> {
        self.monitor.message_sent(ty);
        if ty == msg::ROW {
            self.monitor.row_sent();
        } else if ty == msg::NOTICE {
            self.monitor.notice_sent();
        }

        if let Some(mut ctx) = self.compression.take() {
            let result = self.route_compressed(&mut ctx, ty);
            self.compression = Some(ctx);
            result?;
        }

        let buffered = self.main.page_count()
            + self.compression.as_ref().map_or(0, |c| c.group.page_count());
        self.flusher.on_message(ty, buffered);
        Ok(())
    }

    fn route_compressed(&mut self, ctx: &mut GroupState, ty: u8) -> WireResult<()> {
        let end = ctx.group.used_bytes();
        let frame_start = ctx.committed;

        if !frame::is_bufferable(ty) {
            // Close the open group, then pass this frame through plain.
            let passthrough = ctx.group.copy_tail(frame_start);
            self.close_group(ctx, frame_start)?;
            self.main.write(&passthrough);
            ctx.committed = 0;
            ctx.count = 0;
            ctx.current_id = None;
            ctx.last_frame = None;
            return Ok(());
        }

        let id_switch = ctx.style == CompressionStyle::Multiple
            && frame_start > 0
            && ctx.current_id.is_some_and(|id| id != ty);
        if id_switch {
            // The new frame seeds the next group.
            let seed = ctx.group.copy_tail(frame_start);
            self.close_group(ctx, frame_start)?;
            ctx.group.write(&seed);
            ctx.committed = ctx.group.used_bytes();
            ctx.count = 1;
            ctx.last_frame = Some((0, 0, None));
        } else {
            ctx.last_frame = Some((frame_start, ctx.count, ctx.current_id));
            ctx.committed = end;
            ctx.count += 1;
        }
        ctx.current_id = Some(ty);

        let limit_hit = ctx.max_messages > 0 && ctx.count >= ctx.max_messages;
        if ctx.style == CompressionStyle::Single || limit_hit {
            let upto = ctx.committed;
            self.close_group(ctx, upto)?;
            ctx.committed = 0;
            ctx.count = 0;
            ctx.current_id = None;
            ctx.last_frame = None;
        }
        Ok(())
    }

    /// Compress the first `upto` bytes of the group into one COMPRESSION
    /// envelope appended to the transmit buffer.
    fn close_group(&mut self, ctx: &mut GroupState, upto: usize) -> WireResult<()> {
        if upto == 0 {
            ctx.group.reset();
            return Ok(());
        }
        let plain = ctx.group.copy_head(upto);
        let payload = compress_group(ctx.codec.as_mut(), &plain)?;

        let mut enc = MessageEncoder::new(&mut self.main);
        let envelope = enc.begin_frame(msg::COMPRESSION);
        enc.field_varint32(1, u32::from(ctx.current_id.unwrap_or(0)));
        enc.field_varint64(2, plain.len() as u64);
        enc.field_bytes(3, &payload);
        enc.end_frame(envelope);

        self.monitor.bytes_sent_uncompressed(plain.len() as u64);
        self.monitor.bytes_sent_compressed(payload.len() as u64);
        ctx.group.reset();
        Ok(())
    }

    /// Undo the most recent message's inclusion in the open group. No-op
    /// once the group has been closed.
    pub fn abort_last(&mut self) {
        if let Some(ctx) = &mut self.compression {
            if let Some((start, count, id)) = ctx.last_frame.take() {
                ctx.group.truncate_to_bytes(start);
                ctx.committed = start;
                ctx.count = count;
                ctx.current_id = id;
            }
        }
    }

    pub fn flush_required(&mut self) {
        self.flusher.flush_required();
    }

    /// Close any open group and write pending output. Returns
    /// `NotFlushed` without I/O when nothing is scheduled.
    pub async fn try_flush<W: AsyncWrite + Unpin>(
        &mut self,
        transport: &mut W,
    ) -> WireResult<FlushOutcome> {
        if self.flusher.pending() {
            if let Some(mut ctx) = self.compression.take() {
                let upto = ctx.committed;
                let result = self.close_group(&mut ctx, upto);
                ctx.committed = 0;
                ctx.count = 0;
                ctx.current_id = None;
                ctx.last_frame = None;
                self.compression = Some(ctx);
                result?;
            }
        }
        self.flusher.try_flush(transport, &mut self.main).await
    }

    #[cfg(test)]
    pub(crate) fn main_buffer(&self) -> &PageBuffer {
        &self.main
    }
}

fn compress_group(codec: &mut dyn Compress, plain: &[u8]) -> WireResult<Vec<u8>> {
    let mut sink = VecSink::new();
    {
        let mut stream = CompressionOutputStream::new(codec, &mut sink);
        stream.write(plain)?;
        stream.finish()?;
    }
    Ok(sink.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionAlgorithm;
    use crate::messages::encode_ok;
    use crate::monitor::AtomicMonitor;
    use crate::wire::row::RowEncoder;
    use pretty_assertions::assert_eq;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    fn plain_pipeline(max_pages: usize) -> OutputPipeline {
        let config = ProtocolConfig {
            max_buffered_pages: max_pages,
            page_size: 64,
            ..Default::default()
        };
        OutputPipeline::new(
            &config,
            &CompressionConfig::default(),
            Arc::new(AtomicMonitor::new()),
        )
        .unwrap()
    }

    fn push_row(pipeline: &mut OutputPipeline, text: &str) {
        let mut row = RowEncoder::begin(pipeline.buffer());
        row.field_string(text).unwrap();
        row.end();
        pipeline.message_complete(msg::ROW).unwrap();
    }

    /// Transport that always reports a zero-byte write.
    struct ZeroWriter {
        calls: Arc<AtomicUsize>,
    }

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn bufferable_messages_stay_buffered() {
        let mut pipeline = plain_pipeline(8);
        push_row(&mut pipeline, "r1");
        let mut out = Vec::new();
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::NotFlushed
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn non_bufferable_message_forces_flush() {
        let mut pipeline = plain_pipeline(8);
        push_row(&mut pipeline, "r1");
        encode_ok(pipeline.buffer(), None);
        pipeline.message_complete(msg::OK).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::Flushed
        );
        assert!(!out.is_empty());
        // Buffer reset: nothing further to write.
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::NotFlushed
        );
    }

    #[tokio::test]
    async fn page_threshold_forces_flush() {
        let mut pipeline = plain_pipeline(2);
        // 64-byte pages fill quickly.
        for i in 0..10 {
            push_row(&mut pipeline, &format!("row-{i}-padding-padding"));
        }
        let mut out = Vec::new();
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::Flushed
        );
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn explicit_flush_required() {
        let mut pipeline = plain_pipeline(8);
        push_row(&mut pipeline, "r1");
        pipeline.flush_required();
        let mut out = Vec::new();
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::Flushed
        );
    }

    #[tokio::test]
    async fn zero_byte_write_is_fatal_and_sticky() {
        let mut pipeline = plain_pipeline(8);
        // Three pages of buffered rows.
        while pipeline.main_buffer().page_count() < 3 {
            push_row(&mut pipeline, "padding-padding-padding");
        }
        pipeline.flush_required();

        let handled = Arc::new(AtomicUsize::new(0));
        let handled_in_cb = handled.clone();
        pipeline.set_error_handler(Box::new(move |_| {
            handled_in_cb.fetch_add(1, Ordering::Relaxed);
        }));

        let calls = Arc::new(AtomicUsize::new(0));
        let mut writer = ZeroWriter {
            calls: calls.clone(),
        };
        assert!(matches!(
            pipeline.try_flush(&mut writer).await,
            Err(WireError::WriteFailed(_))
        ));
        // The loop stopped at the first zero write; later pages untouched.
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(handled.load(Ordering::Relaxed), 1);
        assert!(pipeline.is_failed());

        // Permanently failed, no further transport calls.
        assert!(matches!(
            pipeline.try_flush(&mut writer).await,
            Err(WireError::WriteFailed(_))
        ));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(handled.load(Ordering::Relaxed), 1);
    }

    fn compressed_pipeline(style: CompressionStyle, max_messages: i64) -> OutputPipeline {
        let config = ProtocolConfig::default();
        let compression = CompressionConfig {
            algorithm: CompressionAlgorithm::Deflate,
            style,
            max_messages,
            level: 6,
        };
        OutputPipeline::new(&config, &compression, Arc::new(AtomicMonitor::new())).unwrap()
    }

    fn envelope_count(buf: &PageBuffer) -> usize {
        let bytes: Vec<u8> = buf.pages().flatten().copied().collect();
        let mut count = 0;
        let mut pos = 0;
        while pos < bytes.len() {
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            assert_eq!(bytes[pos + 4], msg::COMPRESSION);
            count += 1;
            pos += 4 + len;
        }
        count
    }

    #[tokio::test]
    async fn group_style_batches_until_flush() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Group, -1);
        for i in 0..4 {
            push_row(&mut pipeline, &format!("row {i}"));
        }
        pipeline.flush_required();
        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();
        // One envelope holding all four rows.
        let mut check = PageBuffer::new(4096);
        check.write(&out);
        assert_eq!(envelope_count(&check), 1);
    }

    #[tokio::test]
    async fn single_style_closes_per_message() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Single, -1);
        push_row(&mut pipeline, "a");
        push_row(&mut pipeline, "b");
        pipeline.flush_required();
        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();
        let mut check = PageBuffer::new(4096);
        check.write(&out);
        assert_eq!(envelope_count(&check), 2);
    }

    #[tokio::test]
    async fn group_limit_closes_group() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Group, 2);
        for _ in 0..4 {
            push_row(&mut pipeline, "x");
        }
        pipeline.flush_required();
        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();
        let mut check = PageBuffer::new(4096);
        check.write(&out);
        assert_eq!(envelope_count(&check), 2);
    }

    #[tokio::test]
    async fn multiple_style_splits_on_id_change() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Multiple, -1);
        push_row(&mut pipeline, "a");
        push_row(&mut pipeline, "b");
        crate::messages::encode_marker(pipeline.buffer(), msg::FETCH_DONE);
        pipeline.message_complete(msg::FETCH_DONE).unwrap();
        pipeline.flush_required();
        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();
        let mut check = PageBuffer::new(4096);
        check.write(&out);
        // Rows in one envelope, the marker in its own.
        assert_eq!(envelope_count(&check), 2);
    }

    #[tokio::test]
    async fn non_compressible_closes_group_and_passes_through() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Group, -1);
        push_row(&mut pipeline, "a");
        encode_ok(pipeline.buffer(), Some("bye"));
        pipeline.message_complete(msg::OK).unwrap();

        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();

        // First frame is the envelope, second the plain OK.
        let len = u32::from_le_bytes(out[..4].try_into().unwrap()) as usize;
        assert_eq!(out[4], msg::COMPRESSION);
        let next = 4 + len;
        assert_eq!(out[next + 4], msg::OK);
    }

    #[tokio::test]
    async fn abort_last_removes_message_from_open_group() {
        let mut pipeline = compressed_pipeline(CompressionStyle::Group, -1);
        push_row(&mut pipeline, "keep");
        push_row(&mut pipeline, "drop");
        pipeline.abort_last();
        push_row(&mut pipeline, "keep2");
        pipeline.flush_required();
        let mut out = Vec::new();
        pipeline.try_flush(&mut out).await.unwrap();

        // Decode the envelope payload and confirm only two rows remain.
        let len = u32::from_le_bytes(out[..4].try_into().unwrap()) as usize;
        assert_eq!(out[4], msg::COMPRESSION);
        assert_eq!(out.len(), 4 + len);

        let body = &out[5..];
        let mut reader = crate::wire::proto::ProtoReader::new(body);
        let mut plain_len = 0u64;
        let mut payload = Vec::new();
        while let Some((field, wire)) = reader.read_tag().unwrap() {
            match field {
                2 => plain_len = reader.read_varint64().unwrap(),
                3 => payload = reader.read_bytes().unwrap().to_vec(),
                _ => reader.skip_field(wire).unwrap(),
            }
        }
        let mut decomp =
            crate::wire::compress::decompressor_for(CompressionAlgorithm::Deflate)
                .unwrap()
                .unwrap();
        let plain =
            crate::wire::compress::testing::decompress_all(decomp.as_mut(), &payload).unwrap();
        assert_eq!(plain.len() as u64, plain_len);

        let mut rows = Vec::new();
        let mut pos = 0;
        while pos < plain.len() {
            let len = u32::from_le_bytes(plain[pos..pos + 4].try_into().unwrap()) as usize;
            assert_eq!(plain[pos + 4], msg::ROW);
            let fields =
                crate::wire::row::decode_row_fields(&plain[pos + 5..pos + 4 + len]).unwrap();
            rows.push(crate::wire::row::decode_string(fields[0]).unwrap());
            pos += 4 + len;
        }
        assert_eq!(rows, vec!["keep", "keep2"]);
    }
}
