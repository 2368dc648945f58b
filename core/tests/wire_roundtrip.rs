//! End-to-end exercises of the wire engine.
//!
//! Client -> server: query frames, optionally batched into a compressed
//! envelope, travel over an in-memory transport and come back out of the
//! frame decoder as ordered dispatch calls.
//!
//! Server -> client: column metadata, rows and notices are built through
//! the output pipeline, flushed, and the resulting byte stream is walked
//! frame by frame, decompressing envelopes and decoding row values.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;

use strata_wire::WireResult;
use strata_wire::config::{
    CompressionAlgorithm, CompressionConfig, CompressionStyle, ProtocolConfig,
};
use strata_wire::messages::{self, ClientMessage, ColumnMeta, Dispatcher, Scalar};
use strata_wire::monitor::AtomicMonitor;
use strata_wire::wire::buffer::PageBuffer;
use strata_wire::wire::compress::{compressor_for, decompressor_for, Compress, Decompress};
use strata_wire::wire::decoder::FrameDecoder;
use strata_wire::wire::flusher::{FlushOutcome, OutputPipeline};
use strata_wire::wire::frame::msg;
use strata_wire::wire::proto::{ProtoReader, write_varint64};
use strata_wire::wire::row::{self, ColumnType, RowEncoder, WireDatetime};

const ALGORITHMS: [CompressionAlgorithm; 3] = [
    CompressionAlgorithm::Deflate,
    CompressionAlgorithm::Lz4,
    CompressionAlgorithm::Zstd,
];

#[derive(Default)]
struct Collect {
    seen: Vec<(u8, Option<ClientMessage>)>,
}

impl Dispatcher for Collect {
    fn dispatch(&mut self, ty: u8, message: Option<ClientMessage>) -> WireResult<()> {
        self.seen.push((ty, message));
        Ok(())
    }
}

fn staged(buf: &PageBuffer) -> Vec<u8> {
    buf.pages().flatten().copied().collect()
}

fn compress_all(codec: &mut dyn Compress, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 512];
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

fn decompress_all(codec: &mut dyn Decompress, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 512];
    let mut input = data;
    loop {
        let n = codec.decompress(&mut input, &mut chunk).unwrap();
        out.extend_from_slice(&chunk[..n]);
        if n == 0 && input.is_empty() {
            break;
        }
    }
    out
}

/// Wrap already-framed messages into one COMPRESSION envelope.
fn build_envelope(codec: &mut dyn Compress, inner: &[u8], message_id: u32) -> Vec<u8> {
    let compressed = compress_all(codec, inner);
    let mut body = Vec::new();
    body.push(0x08);
    write_varint64(&mut body, u64::from(message_id));
    body.push(0x10);
    write_varint64(&mut body, inner.len() as u64);
    body.push(0x1a);
    write_varint64(&mut body, compressed.len() as u64);
    body.extend_from_slice(&compressed);
    strata_wire::wire::frame::encode_frame(msg::COMPRESSION, &body).to_vec()
}

#[tokio::test]
async fn plain_client_frames_over_transport() {
    let mut buf = PageBuffer::new(4096);
    messages::encode_capabilities_set(
        &mut buf,
        &[("compression", Scalar::String("none".into()))],
    )
    .unwrap();
    messages::encode_query(&mut buf, "SELECT 1", &[Scalar::SInt(-5)]).unwrap();
    messages::encode_ping(&mut buf);
    let bytes = staged(&buf);

    let (mut client, server) = tokio::io::duplex(1 << 16);
    client.write_all(&bytes).await.unwrap();
    drop(client);

    let monitor = Arc::new(AtomicMonitor::new());
    let mut decoder = FrameDecoder::new(
        server,
        ProtocolConfig::default(),
        CompressionConfig::default(),
        monitor.clone(),
    );
    let mut sink = Collect::default();
    decoder.run(&mut sink).await.unwrap();

    assert_eq!(sink.seen.len(), 3);
    assert_eq!(sink.seen[0].0, msg::CAPABILITIES_SET);
    assert_eq!(
        sink.seen[1].1,
        Some(ClientMessage::Query {
            statement: "SELECT 1".into(),
            params: vec![Scalar::SInt(-5)],
        })
    );
    assert_eq!(sink.seen[2].1, Some(ClientMessage::Ping));
    assert_eq!(monitor.snapshot().messages_received, 3);
    assert_eq!(monitor.snapshot().bytes_received, bytes.len() as u64);
}

#[tokio::test]
async fn compressed_batch_over_transport_every_algorithm() {
    for algorithm in ALGORITHMS {
        // Ten query frames concatenated, then wrapped in one envelope.
        let mut inner = PageBuffer::new(4096);
        let mut expected = Vec::new();
        for i in 0..10 {
            let statement = format!("SELECT {i}");
            messages::encode_query(&mut inner, &statement, &[]).unwrap();
            expected.push(statement);
        }
        let inner_bytes = staged(&inner);

        let level = CompressionConfig {
            algorithm,
            ..Default::default()
        }
        .effective_level();
        let mut codec = compressor_for(algorithm, level).unwrap().unwrap();
        let envelope = build_envelope(codec.as_mut(), &inner_bytes, u32::from(msg::QUERY));

        let (mut client, server) = tokio::io::duplex(1 << 16);
        client.write_all(&envelope).await.unwrap();
        drop(client);

        let monitor = Arc::new(AtomicMonitor::new());
        let compression = CompressionConfig {
            algorithm,
            ..Default::default()
        };
        let mut decoder =
            FrameDecoder::new(server, ProtocolConfig::default(), compression, monitor.clone());
        let mut sink = Collect::default();
        decoder.run(&mut sink).await.unwrap();

        assert_eq!(sink.seen.len(), 10, "{algorithm}");
        for (i, (ty, message)) in sink.seen.iter().enumerate() {
            assert_eq!(*ty, msg::QUERY);
            assert_eq!(
                *message,
                Some(ClientMessage::Query {
                    statement: expected[i].clone(),
                    params: vec![],
                }),
                "{algorithm} message {i}"
            );
        }
        let snap = monitor.snapshot();
        assert_eq!(snap.bytes_received_uncompressed, inner_bytes.len() as u64);
        assert_eq!(snap.messages_received, 10);
    }
}

/// Walk a flushed byte stream: every frame's length prefix must equal one
/// plus its body, and consuming 4 + length bytes lands exactly on the next
/// frame boundary.
fn walk_frames(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let length = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        assert!(length >= 1, "empty frame in stream");
        let ty = bytes[pos + 4];
        let body = bytes[pos + 5..pos + 4 + length].to_vec();
        assert_eq!(length, body.len() + 1);
        frames.push((ty, body));
        pos += 4 + length;
    }
    assert_eq!(pos, bytes.len());
    frames
}

fn parse_envelope(body: &[u8]) -> (u64, Vec<u8>) {
    let mut reader = ProtoReader::new(body);
    let mut declared = 0;
    let mut payload = Vec::new();
    while let Some((field, wire)) = reader.read_tag().unwrap() {
        match field {
            2 => declared = reader.read_varint64().unwrap(),
            3 => payload = reader.read_bytes().unwrap().to_vec(),
            _ => reader.skip_field(wire).unwrap(),
        }
    }
    (declared, payload)
}

#[tokio::test]
async fn resultset_round_trip_compressed_every_algorithm() {
    for algorithm in ALGORITHMS {
        let monitor = Arc::new(AtomicMonitor::new());
        let config = ProtocolConfig::default();
        let compression = CompressionConfig {
            algorithm,
            style: CompressionStyle::Group,
            max_messages: -1,
            level: 3,
        };
        let mut pipeline = OutputPipeline::new(&config, &compression, monitor.clone()).unwrap();

        messages::encode_column_meta(
            pipeline.buffer(),
            &ColumnMeta::named(ColumnType::Sint, "id"),
        );
        pipeline.message_complete(msg::COLUMN_META).unwrap();
        messages::encode_column_meta(
            pipeline.buffer(),
            &ColumnMeta::named(ColumnType::Datetime, "created"),
        );
        pipeline.message_complete(msg::COLUMN_META).unwrap();

        let datetime = WireDatetime {
            date: row::WireDate {
                year: 2026,
                month: 8,
                day: 6,
            },
            hours: 12,
            minutes: 30,
            seconds: 0,
            micros: 0,
        };
        for i in 0..3i64 {
            let mut encoder = RowEncoder::begin(pipeline.buffer());
            encoder.field_sint(-i).unwrap();
            encoder.field_datetime(&datetime).unwrap();
            encoder.end();
            pipeline.message_complete(msg::ROW).unwrap();
        }

        messages::encode_marker(pipeline.buffer(), msg::FETCH_DONE);
        pipeline.message_complete(msg::FETCH_DONE).unwrap();
        messages::encode_session_state_notice(pipeline.buffer(), 4, &Scalar::UInt(3)).unwrap();
        pipeline.message_complete(msg::NOTICE).unwrap();
        messages::encode_ok(pipeline.buffer(), Some("done"));
        pipeline.message_complete(msg::OK).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            pipeline.try_flush(&mut out).await.unwrap(),
            FlushOutcome::Flushed,
            "{algorithm}"
        );

        // One envelope holding the whole group, then the plain OK frame.
        let frames = walk_frames(&out);
        assert_eq!(frames.len(), 2, "{algorithm}");
        assert_eq!(frames[0].0, msg::COMPRESSION);
        assert_eq!(frames[1].0, msg::OK);

        let (declared, payload) = parse_envelope(&frames[0].1);
        let mut codec = decompressor_for(algorithm).unwrap().unwrap();
        let plain = decompress_all(codec.as_mut(), &payload);
        assert_eq!(plain.len() as u64, declared, "{algorithm}");

        let inner = walk_frames(&plain);
        let types: Vec<u8> = inner.iter().map(|(ty, _)| *ty).collect();
        assert_eq!(
            types,
            vec![
                msg::COLUMN_META,
                msg::COLUMN_META,
                msg::ROW,
                msg::ROW,
                msg::ROW,
                msg::FETCH_DONE,
                msg::NOTICE
            ],
            "{algorithm}"
        );

        // Row payloads decode back to the original values.
        for (i, (_, body)) in inner[2..5].iter().enumerate() {
            let fields = row::decode_row_fields(body).unwrap();
            assert_eq!(fields.len(), 2);
            assert_eq!(row::decode_sint(fields[0]).unwrap(), -(i as i64));
            assert_eq!(row::decode_datetime(fields[1]).unwrap(), datetime);
        }

        let snap = monitor.snapshot();
        assert_eq!(snap.messages_sent, 8);
        assert_eq!(snap.rows_sent, 3);
        assert_eq!(snap.notices_sent, 1);
        assert_eq!(snap.bytes_sent, out.len() as u64);
        assert_eq!(snap.bytes_sent_uncompressed, declared);
        assert!(snap.bytes_sent_compressed > 0);
    }
}

#[tokio::test]
async fn uncompressed_pipeline_emits_plain_frames() {
    let monitor = Arc::new(AtomicMonitor::new());
    let config = ProtocolConfig::default();
    let mut pipeline =
        OutputPipeline::new(&config, &CompressionConfig::default(), monitor.clone()).unwrap();

    let mut encoder = RowEncoder::begin(pipeline.buffer());
    encoder.field_string("only-row").unwrap();
    encoder.end();
    pipeline.message_complete(msg::ROW).unwrap();
    messages::encode_ok(pipeline.buffer(), None);
    pipeline.message_complete(msg::OK).unwrap();

    let mut out = Vec::new();
    assert_eq!(
        pipeline.try_flush(&mut out).await.unwrap(),
        FlushOutcome::Flushed
    );
    let frames = walk_frames(&out);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].0, msg::ROW);
    assert_eq!(frames[1].0, msg::OK);

    let fields = row::decode_row_fields(&frames[0].1).unwrap();
    assert_eq!(row::decode_string(fields[0]).unwrap(), "only-row");
}

#[tokio::test]
async fn aborted_row_never_reaches_the_wire() {
    let monitor = Arc::new(AtomicMonitor::new());
    let config = ProtocolConfig::default();
    let mut pipeline =
        OutputPipeline::new(&config, &CompressionConfig::default(), monitor.clone()).unwrap();

    let mut encoder = RowEncoder::begin(pipeline.buffer());
    encoder.field_string("good").unwrap();
    encoder.end();
    pipeline.message_complete(msg::ROW).unwrap();

    // Execution fails mid-row: the partial frame is rolled back.
    let mut encoder = RowEncoder::begin(pipeline.buffer());
    encoder.field_string("partial").unwrap();
    encoder.abort();

    messages::encode_error(
        pipeline.buffer(),
        messages::ErrorSeverity::Error,
        1064,
        "42000",
        "execution failed",
    );
    pipeline.message_complete(msg::ERROR).unwrap();

    let mut out = Vec::new();
    pipeline.try_flush(&mut out).await.unwrap();
    let frames = walk_frames(&out);
    let types: Vec<u8> = frames.iter().map(|(ty, _)| *ty).collect();
    assert_eq!(types, vec![msg::ROW, msg::ERROR]);
}

#[tokio::test]
async fn pipeline_output_feeds_decoder_compressed_client_side() {
    // Client-side use of the pipeline: queries are non-bufferable, so each
    // one passes through uncompressed and is readable by the decoder.
    let monitor = Arc::new(AtomicMonitor::new());
    let config = ProtocolConfig::default();
    let compression = CompressionConfig {
        algorithm: CompressionAlgorithm::Zstd,
        style: CompressionStyle::Group,
        max_messages: -1,
        level: 0, // remapped to 1 internally
    };
    let mut pipeline = OutputPipeline::new(&config, &compression, monitor.clone()).unwrap();
    messages::encode_query(pipeline.buffer(), "SELECT 42", &[]).unwrap();
    pipeline.message_complete(msg::QUERY).unwrap();

    let (mut client, server) = tokio::io::duplex(1 << 16);
    let mut out = Vec::new();
    pipeline.try_flush(&mut out).await.unwrap();
    client.write_all(&out).await.unwrap();
    drop(client);

    let mut decoder = FrameDecoder::new(
        server,
        ProtocolConfig::default(),
        CompressionConfig::default(),
        Arc::new(AtomicMonitor::new()),
    );
    let mut sink = Collect::default();
    decoder.run(&mut sink).await.unwrap();
    assert_eq!(
        sink.seen,
        vec![(
            msg::QUERY,
            Some(ClientMessage::Query {
                statement: "SELECT 42".into(),
                params: vec![],
            })
        )]
    );
}
