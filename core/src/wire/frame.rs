//! Outer frame header codec.
//!
//! Every frame on the wire is `u32 length (LE) | u8 type | body`, where
//! `length` excludes its own four bytes but includes the type byte, so the
//! body spans `length - 1` bytes. Frames inside a compressed envelope use
//! the exact same shape.

use bytes::{BufMut, BytesMut};

use crate::error::{WireError, WireResult};

/// Bytes of the length prefix plus the type byte.
pub const FRAME_HEADER_LEN: usize = 5;

/// Message type codes.
pub mod msg {
    // Client -> server
    pub const CAPABILITIES_SET: u8 = 1;
    pub const PING: u8 = 2;
    pub const QUERY: u8 = 3;
    pub const DISCONNECT: u8 = 4;
    pub const EXPECT: u8 = 5;

    // Server -> client
    pub const OK: u8 = 10;
    pub const ERROR: u8 = 11;
    pub const COLUMN_META: u8 = 12;
    pub const ROW: u8 = 13;
    pub const FETCH_DONE: u8 = 14;
    pub const FETCH_SUSPENDED: u8 = 15;
    pub const FETCH_DONE_MORE_RESULTS: u8 = 16;
    pub const FETCH_DONE_MORE_OUT_PARAMS: u8 = 17;
    pub const NOTICE: u8 = 18;

    // Both directions
    pub const COMPRESSION: u8 = 19;
}

/// Result-streaming message types that may stay buffered until the output
/// buffer fills or a non-bufferable message arrives.
pub fn is_bufferable(ty: u8) -> bool {
    matches!(
        ty,
        msg::COLUMN_META
            | msg::ROW
            | msg::NOTICE
            | msg::FETCH_DONE
            | msg::FETCH_SUSPENDED
            | msg::FETCH_DONE_MORE_RESULTS
            | msg::FETCH_DONE_MORE_OUT_PARAMS
    )
}

/// Validate a length prefix and return the body length.
pub fn body_len(length: u32, max_message_size: usize) -> WireResult<usize> {
    if length == 0 {
        return Err(WireError::EmptyFrame);
    }
    let body = length as usize - 1;
    if body > max_message_size {
        return Err(WireError::FrameTooLarge {
            size: u64::from(length),
            max: max_message_size as u64,
        });
    }
    Ok(body)
}

/// Build one complete frame into a fresh buffer. The page-chain encoder is
/// the production path; this helper serves handshake-time messages and
/// tests.
pub fn encode_frame(ty: u8, body: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.put_u32_le(body.len() as u32 + 1);
    frame.put_u8(ty);
    frame.put_slice(body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn length_prefix_counts_type_byte() {
        let frame = encode_frame(msg::PING, &[]);
        assert_eq!(&frame[..], &[0x01, 0x00, 0x00, 0x00, msg::PING]);

        let frame = encode_frame(msg::QUERY, b"abcd");
        assert_eq!(frame.len(), 9);
        assert_eq!(u32::from_le_bytes(frame[..4].try_into().unwrap()), 5);
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(matches!(body_len(0, 1024), Err(WireError::EmptyFrame)));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        assert!(matches!(
            body_len(100, 64),
            Err(WireError::FrameTooLarge { size: 100, max: 64 })
        ));
        assert_eq!(body_len(65, 64).unwrap(), 64);
    }

    #[test]
    fn bufferable_classification() {
        assert!(is_bufferable(msg::ROW));
        assert!(is_bufferable(msg::COLUMN_META));
        assert!(is_bufferable(msg::NOTICE));
        assert!(is_bufferable(msg::FETCH_DONE_MORE_OUT_PARAMS));
        assert!(!is_bufferable(msg::OK));
        assert!(!is_bufferable(msg::ERROR));
        assert!(!is_bufferable(msg::COMPRESSION));
    }
}
