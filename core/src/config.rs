//! Connection-level protocol and compression configuration.
//!
//! The negotiated compression tuple is committed exactly once per
//! connection, between capability negotiation and the data phase. The
//! decoder and output pipeline take these values by value at construction,
//! so a mid-session renegotiation is unrepresentable.

use serde::{Deserialize, Serialize};

/// Compression algorithm negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    /// No compression; COMPRESSION frames are rejected.
    #[default]
    None,
    /// zlib/DEFLATE stream, sync-flushed at group boundaries.
    Deflate,
    /// LZ4 frame format, one complete frame per group.
    Lz4,
    /// Zstandard stream with explicit flush points.
    Zstd,
}

impl CompressionAlgorithm {
    /// Canonical capability name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "deflate_stream",
            Self::Lz4 => "lz4_message",
            Self::Zstd => "zstd_stream",
        }
    }

    /// Parse a capability value (case-insensitive, short aliases accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Some(Self::None),
            "deflate_stream" | "deflate" | "zlib" => Some(Self::Deflate),
            "lz4_message" | "lz4" => Some(Self::Lz4),
            "zstd_stream" | "zstd" | "zstandard" => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown compression algorithm: {s}"))
    }
}

/// How outgoing messages are batched into compressed envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStyle {
    /// One message per envelope.
    Single,
    /// Consecutive messages of the same type share an envelope.
    #[default]
    Multiple,
    /// Everything compressible shares an envelope until a flush.
    Group,
}

/// The per-connection negotiated compression tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
    pub style: CompressionStyle,
    /// Maximum messages per compressed group; -1 means "until flush".
    pub max_messages: i64,
    /// Requested compression level, clamped per algorithm.
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            style: CompressionStyle::Multiple,
            max_messages: -1,
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }

    /// The level actually handed to the codec.
    ///
    /// Deflate and LZ4 accept their native minimum (including 0) literally.
    /// Zstd has no level 0: a requested 0 maps to 1 before clamping.
    pub fn effective_level(&self) -> i32 {
        let Some((min, max)) = crate::wire::compress::level_bounds(self.algorithm) else {
            return 0;
        };
        let requested = if self.algorithm == CompressionAlgorithm::Zstd && self.level == 0 {
            1
        } else {
            self.level
        };
        requested.clamp(min, max)
    }
}

/// Limits and buffer geometry for one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Upper bound on a single frame body and on the decompressed size of
    /// a compressed envelope.
    pub max_message_size: usize,
    /// Pages that may accumulate in the output buffer before a flush is
    /// forced.
    pub max_buffered_pages: usize,
    /// Size of one output buffer page.
    pub page_size: usize,
    /// Read timeout for frame headers and bodies; `None` blocks.
    pub read_timeout: Option<std::time::Duration>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            max_buffered_pages: 8,
            page_size: 4096,
            read_timeout: None,
        }
    }
}
