//! Buffered message encoder.
//!
//! Frames are serialized directly into the page chain: `begin_frame`
//! reserves the 5-byte header span, typed field writers append the payload,
//! and `end_frame` patches the measured length back into the reserved span.
//! Nested length-delimited fields use the same patch-back mechanism with a
//! fixed-width varint placeholder, so closing a field never moves bytes.

use crate::error::{WireError, WireResult};
use crate::wire::buffer::{PageBuffer, Position};
use crate::wire::frame::FRAME_HEADER_LEN;
use crate::wire::proto::{WireType, make_tag, zigzag_encode};

/// Width of the reserved length placeholder for nested fields. A padded
/// varint of this width holds lengths up to 2^28 - 1.
const DELIMITED_LEN_SPAN: usize = 4;

/// Open frame handle returned by [`MessageEncoder::begin_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FramePos {
    start: Position,
    header: Position,
}

/// Open nested field handle.
#[derive(Debug, Clone, Copy)]
pub struct DelimPos {
    len_span: Position,
}

pub struct MessageEncoder<'a> {
    buf: &'a mut PageBuffer,
}

impl<'a> MessageEncoder<'a> {
    pub fn new(buf: &'a mut PageBuffer) -> Self {
        Self { buf }
    }

    pub fn buffer(&mut self) -> &mut PageBuffer {
        self.buf
    }

    /// Reserve a frame header and record the rollback position.
    pub fn begin_frame(&mut self, ty: u8) -> FramePos {
        let start = self.buf.position();
        let header = self.buf.reserve_contiguous(FRAME_HEADER_LEN);
        self.buf.patch(
            Position {
                page: header.page,
                offset: header.offset + 4,
            },
            &[ty],
        );
        FramePos { start, header }
    }

    /// Patch the frame's length prefix: type byte plus measured payload.
    pub fn end_frame(&mut self, pos: FramePos) {
        let payload = self.buf.bytes_since(pos.header) - FRAME_HEADER_LEN;
        let length = payload as u32 + 1;
        self.buf.patch(pos.header, &length.to_le_bytes());
    }

    /// Discard everything written since `begin_frame`.
    pub fn abort_frame(&mut self, pos: FramePos) {
        self.buf.truncate_to(pos.start);
    }

    pub fn put_varint64(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.write_u8(byte);
                return;
            }
            self.buf.write_u8(byte | 0x80);
        }
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.write(bytes);
    }

    fn put_tag(&mut self, field: u32, wire: WireType) {
        self.put_varint64(u64::from(make_tag(field, wire)));
    }

    pub fn field_varint64(&mut self, field: u32, v: u64) {
        self.put_tag(field, WireType::Varint);
        self.put_varint64(v);
    }

    pub fn field_varint32(&mut self, field: u32, v: u32) {
        self.field_varint64(field, u64::from(v));
    }

    pub fn field_sint64(&mut self, field: u32, v: i64) {
        self.field_varint64(field, zigzag_encode(v));
    }

    pub fn field_bool(&mut self, field: u32, v: bool) {
        self.field_varint64(field, u64::from(v));
    }

    pub fn field_enum(&mut self, field: u32, v: u32) {
        self.field_varint64(field, u64::from(v));
    }

    pub fn field_fixed32(&mut self, field: u32, v: u32) {
        self.put_tag(field, WireType::Fixed32);
        self.buf.write(&v.to_le_bytes());
    }

    pub fn field_fixed64(&mut self, field: u32, v: u64) {
        self.put_tag(field, WireType::Fixed64);
        self.buf.write(&v.to_le_bytes());
    }

    pub fn field_float(&mut self, field: u32, v: f32) {
        self.put_tag(field, WireType::Fixed32);
        self.buf.write(&v.to_le_bytes());
    }

    pub fn field_double(&mut self, field: u32, v: f64) {
        self.put_tag(field, WireType::Fixed64);
        self.buf.write(&v.to_le_bytes());
    }

    pub fn field_bytes(&mut self, field: u32, bytes: &[u8]) {
        self.put_tag(field, WireType::LengthDelimited);
        self.put_varint64(bytes.len() as u64);
        self.buf.write(bytes);
    }

    pub fn field_string(&mut self, field: u32, s: &str) {
        self.field_bytes(field, s.as_bytes());
    }

    /// Open a nested length-delimited field. Closed with `end_delimited`,
    /// which patches the length in place.
    pub fn begin_delimited(&mut self, field: u32) -> DelimPos {
        self.put_tag(field, WireType::LengthDelimited);
        let len_span = self.buf.reserve_contiguous(DELIMITED_LEN_SPAN);
        DelimPos { len_span }
    }

    pub fn end_delimited(&mut self, pos: DelimPos) -> WireResult<()> {
        let len = self.buf.bytes_since(pos.len_span) - DELIMITED_LEN_SPAN;
        if len >= 1 << 28 {
            return Err(WireError::InvalidMessageFrame(
                "nested field exceeds length placeholder".into(),
            ));
        }
        self.buf.patch(pos.len_span, &padded_varint4(len as u32));
        Ok(())
    }
}

/// Varint padded to exactly four bytes with redundant continuation groups.
fn padded_varint4(v: u32) -> [u8; 4] {
    [
        (v & 0x7f) as u8 | 0x80,
        ((v >> 7) & 0x7f) as u8 | 0x80,
        ((v >> 14) & 0x7f) as u8 | 0x80,
        ((v >> 21) & 0x7f) as u8,
    ]
}
