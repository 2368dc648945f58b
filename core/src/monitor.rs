//! Traffic counters reported by the codec layers.
//!
//! The decoder and flusher update counters through the [`Monitor`] trait;
//! implementations use atomic increments so the codec never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter sink for one connection (or shared across a server).
pub trait Monitor: Send + Sync {
    /// Raw bytes read from the transport, including frame headers.
    fn bytes_received(&self, n: u64);
    /// Bytes delivered by decompression (uncompressed view of envelopes).
    fn bytes_received_uncompressed(&self, n: u64);
    /// Raw bytes written to the transport.
    fn bytes_sent(&self, n: u64);
    /// Compressed payload bytes placed inside envelopes.
    fn bytes_sent_compressed(&self, n: u64);
    /// Pre-compression size of the same payloads.
    fn bytes_sent_uncompressed(&self, n: u64);
    fn message_received(&self, ty: u8);
    fn message_sent(&self, ty: u8);
    fn row_sent(&self);
    fn notice_sent(&self);
    fn unknown_message_type(&self);
    fn decode_error(&self, kind: &'static str);
}

/// Monitor that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn bytes_received(&self, _n: u64) {}
    fn bytes_received_uncompressed(&self, _n: u64) {}
    fn bytes_sent(&self, _n: u64) {}
    fn bytes_sent_compressed(&self, _n: u64) {}
    fn bytes_sent_uncompressed(&self, _n: u64) {}
    fn message_received(&self, _ty: u8) {}
    fn message_sent(&self, _ty: u8) {}
    fn row_sent(&self) {}
    fn notice_sent(&self) {}
    fn unknown_message_type(&self) {}
    fn decode_error(&self, _kind: &'static str) {}
}

/// Default lock-free monitor backed by relaxed atomics.
#[derive(Debug, Default)]
pub struct AtomicMonitor {
    bytes_received: AtomicU64,
    bytes_received_uncompressed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_sent_compressed: AtomicU64,
    bytes_sent_uncompressed: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    rows_sent: AtomicU64,
    notices_sent: AtomicU64,
    unknown_message_types: AtomicU64,
    decode_errors: AtomicU64,
}

impl AtomicMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_received_uncompressed: self.bytes_received_uncompressed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_sent_compressed: self.bytes_sent_compressed.load(Ordering::Relaxed),
            bytes_sent_uncompressed: self.bytes_sent_uncompressed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            rows_sent: self.rows_sent.load(Ordering::Relaxed),
            notices_sent: self.notices_sent.load(Ordering::Relaxed),
            unknown_message_types: self.unknown_message_types.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl Monitor for AtomicMonitor {
    fn bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    fn bytes_received_uncompressed(&self, n: u64) {
        self.bytes_received_uncompressed
            .fetch_add(n, Ordering::Relaxed);
    }

    fn bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    fn bytes_sent_compressed(&self, n: u64) {
        self.bytes_sent_compressed.fetch_add(n, Ordering::Relaxed);
    }

    fn bytes_sent_uncompressed(&self, n: u64) {
        self.bytes_sent_uncompressed.fetch_add(n, Ordering::Relaxed);
    }

    fn message_received(&self, _ty: u8) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    fn message_sent(&self, _ty: u8) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn row_sent(&self) {
        self.rows_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn notice_sent(&self) {
        self.notices_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn unknown_message_type(&self) {
        self.unknown_message_types.fetch_add(1, Ordering::Relaxed);
    }

    fn decode_error(&self, _kind: &'static str) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of an [`AtomicMonitor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub bytes_received: u64,
    pub bytes_received_uncompressed: u64,
    pub bytes_sent: u64,
    pub bytes_sent_compressed: u64,
    pub bytes_sent_uncompressed: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub rows_sent: u64,
    pub notices_sent: u64,
    pub unknown_message_types: u64,
    pub decode_errors: u64,
}
