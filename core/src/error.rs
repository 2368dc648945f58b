//! Error definitions for the SDX wire engine.

use thiserror::Error;

pub type WireResult<T> = Result<T, WireError>;

/// Errors produced by the framing, compression and flush layers.
///
/// I/O errors always take priority over logic errors derived from the same
/// operation: a frame body is read in full before any parse is attempted, so
/// a network failure can never surface as a parse failure.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Clean EOF from the peer at a frame boundary. Ends the session
    /// without being reported as a failure.
    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("operation timed out")]
    Timeout,

    /// A frame header declared a zero length; every frame carries at least
    /// the type byte.
    #[error("empty message frame")]
    EmptyFrame,

    #[error("message frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("invalid message frame: {0}")]
    InvalidMessageFrame(String),

    #[error("message recursion limit exceeded")]
    RecursionLimitExceeded,

    /// A COMPRESSION frame arrived but no algorithm was negotiated.
    #[error("compression is disabled on this connection")]
    CompressionDisabled,

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A short or zero-byte transport write. The flusher that reports this
    /// is permanently failed; there is no retry.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl WireError {
    /// Short error kind name, used for monitor error categories and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::Io(_) => "io_error",
            WireError::PeerDisconnected => "peer_disconnected",
            WireError::Timeout => "timeout",
            WireError::EmptyFrame => "empty_frame",
            WireError::FrameTooLarge { .. } => "frame_too_large",
            WireError::InvalidMessageFrame(_) => "invalid_message_frame",
            WireError::RecursionLimitExceeded => "recursion_limit",
            WireError::CompressionDisabled => "compression_disabled",
            WireError::Compress(_) => "compress_error",
            WireError::Decompress(_) => "decompress_error",
            WireError::WriteFailed(_) => "write_failed",
        }
    }

    /// Whether this error tears down the connection. Only a clean peer
    /// disconnect is non-fatal; everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WireError::PeerDisconnected)
    }
}
