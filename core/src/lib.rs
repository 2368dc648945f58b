//! StrataDB SDX wire engine.
//!
//! The framing, compression and streaming codec layer of StrataDB's
//! secondary network interface: length-prefixed frames carrying tagged
//! binary messages, an optional compressed-envelope sub-protocol that
//! batches several inner frames into one outer frame, and a buffered,
//! backpressure-aware output path that serializes rows, metadata and
//! notices straight into transmit pages.
//!
//! Modules:
//! * `config`: per-connection limits and the negotiated compression tuple.
//! * `error`: the wire error taxonomy.
//! * `messages`: message schemas, parsing, and the dispatch seam.
//! * `monitor`: traffic counter sink.
//! * `wire`: framing, codecs, buffers, compression, and flushing.
//!
//! Codec components are owned by one connection worker at a time; the only
//! suspension points are the frame read and the flush write.

pub mod config;
pub mod error;
pub mod messages;
pub mod monitor;
pub mod wire;

pub use config::{CompressionAlgorithm, CompressionConfig, CompressionStyle, ProtocolConfig};
pub use error::{WireError, WireResult};
pub use messages::{ClientMessage, Dispatcher, Scalar};
pub use monitor::{AtomicMonitor, Monitor, NullMonitor};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
