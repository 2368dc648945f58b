//! Typed row value codecs.
//!
//! A Row frame carries one length-prefixed blob per column (field 1,
//! repeated). The blob content is the column-type-specific wire shape:
//!
//! - signed integer: zig-zag varint
//! - unsigned integer: plain varint
//! - float/double: little-endian IEEE754
//! - string/bytes: raw bytes plus one trailing NUL, so the blob's length
//!   prefix reads as `length + 1`
//! - decimal: scale byte, packed BCD digits, terminating sign nibble
//! - date/time/datetime: component varints with trailing zero components
//!   truncated; time carries a leading sign byte
//! - set: length-prefixed members split on unescaped commas, with a
//!   one-byte form for the empty set
//! - bit: varint length prefix plus raw bytes

use chrono::{Datelike, Timelike};

use crate::error::{WireError, WireResult};
use crate::wire::buffer::PageBuffer;
use crate::wire::encoder::{FramePos, MessageEncoder};
use crate::wire::frame::msg;
use crate::wire::proto::{ProtoReader, zigzag_decode, zigzag_encode};

/// Column types announced in column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ColumnType {
    Sint = 1,
    Uint = 2,
    Double = 5,
    Float = 6,
    Bytes = 7,
    Time = 10,
    Datetime = 12,
    Date = 13,
    Set = 16,
    Enum = 17,
    Bit = 18,
    Decimal = 20,
}

/// Encoder for one Row frame. `begin`/`end` bracket the frame; `abort`
/// rolls back a partially written row without touching earlier frames.
pub struct RowEncoder<'a> {
    enc: MessageEncoder<'a>,
    frame: FramePos,
}

impl<'a> RowEncoder<'a> {
    pub fn begin(buf: &'a mut PageBuffer) -> Self {
        let mut enc = MessageEncoder::new(buf);
        let frame = enc.begin_frame(msg::ROW);
        Self { enc, frame }
    }

    pub fn end(mut self) {
        self.enc.end_frame(self.frame);
    }

    pub fn abort(mut self) {
        self.enc.abort_frame(self.frame);
    }

    fn field<F: FnOnce(&mut MessageEncoder<'_>)>(&mut self, write: F) -> WireResult<()> {
        let pos = self.enc.begin_delimited(1);
        write(&mut self.enc);
        self.enc.end_delimited(pos)
    }

    /// NULL is a zero-length field blob.
    pub fn field_null(&mut self) -> WireResult<()> {
        self.field(|_| {})
    }

    pub fn field_sint(&mut self, v: i64) -> WireResult<()> {
        self.field(|enc| enc.put_varint64(zigzag_encode(v)))
    }

    pub fn field_uint(&mut self, v: u64) -> WireResult<()> {
        self.field(|enc| enc.put_varint64(v))
    }

    pub fn field_float(&mut self, v: f32) -> WireResult<()> {
        self.field(|enc| enc.put_raw(&v.to_le_bytes()))
    }

    pub fn field_double(&mut self, v: f64) -> WireResult<()> {
        self.field(|enc| enc.put_raw(&v.to_le_bytes()))
    }

    pub fn field_string(&mut self, s: &str) -> WireResult<()> {
        self.field_bytes(s.as_bytes())
    }

    /// The trailing NUL marks the value as not truncated; the blob length
    /// prefix therefore reads as `length + 1`.
    pub fn field_bytes(&mut self, bytes: &[u8]) -> WireResult<()> {
        self.field(|enc| {
            enc.put_raw(bytes);
            enc.put_raw(&[0]);
        })
    }

    pub fn field_decimal(&mut self, dec: &Decimal) -> WireResult<()> {
        let payload = dec.to_wire();
        self.field(|enc| enc.put_raw(&payload))
    }

    pub fn field_set(&mut self, members: &[impl AsRef<[u8]>]) -> WireResult<()> {
        self.field(|enc| {
            if members.is_empty() {
                // 0x01 cannot begin a valid length-prefixed member.
                enc.put_raw(&[0x01]);
                return;
            }
            for member in members {
                let member = member.as_ref();
                enc.put_varint64(member.len() as u64);
                enc.put_raw(member);
            }
        })
    }

    pub fn field_bit(&mut self, bits: &[u8]) -> WireResult<()> {
        self.field(|enc| {
            enc.put_varint64(bits.len() as u64);
            enc.put_raw(bits);
        })
    }

    pub fn field_date(&mut self, date: &WireDate) -> WireResult<()> {
        let components = [u64::from(date.year), u64::from(date.month), u64::from(date.day)];
        self.field(|enc| put_truncated(enc, &components))
    }

    pub fn field_time(&mut self, time: &WireTime) -> WireResult<()> {
        let components = [
            u64::from(time.hours),
            u64::from(time.minutes),
            u64::from(time.seconds),
            u64::from(time.micros),
        ];
        self.field(|enc| {
            enc.put_raw(&[u8::from(time.negative)]);
            put_truncated(enc, &components);
        })
    }

    pub fn field_datetime(&mut self, dt: &WireDatetime) -> WireResult<()> {
        let components = [
            u64::from(dt.date.year),
            u64::from(dt.date.month),
            u64::from(dt.date.day),
            u64::from(dt.hours),
            u64::from(dt.minutes),
            u64::from(dt.seconds),
            u64::from(dt.micros),
        ];
        self.field(|enc| put_truncated(enc, &components))
    }
}

/// Emit components up to and including the last nonzero one. An all-zero
/// tuple emits nothing.
fn put_truncated(enc: &mut MessageEncoder<'_>, components: &[u64]) {
    let keep = components
        .iter()
        .rposition(|&c| c != 0)
        .map_or(0, |i| i + 1);
    for &c in &components[..keep] {
        enc.put_varint64(c);
    }
}

// Value types

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub negative: bool,
    /// Decimal digits, most significant first, no separator.
    pub digits: Vec<u8>,
    /// Digits to the right of the decimal point.
    pub scale: u8,
}

const SIGN_POSITIVE: u8 = 0xc;
const SIGN_NEGATIVE: u8 = 0xd;

impl Decimal {
    /// Scale byte, digits packed two per byte, then the sign nibble; a
    /// final odd nibble slot is zero-filled.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut nibbles: Vec<u8> = self.digits.clone();
        nibbles.push(if self.negative {
            SIGN_NEGATIVE
        } else {
            SIGN_POSITIVE
        });

        let mut out = Vec::with_capacity(1 + nibbles.len().div_ceil(2));
        out.push(self.scale);
        for pair in nibbles.chunks(2) {
            let high = pair[0] << 4;
            let low = pair.get(1).copied().unwrap_or(0);
            out.push(high | low);
        }
        out
    }

    pub fn from_wire(payload: &[u8]) -> WireResult<Self> {
        let [scale, rest @ ..] = payload else {
            return Err(WireError::InvalidMessageFrame("empty decimal".into()));
        };
        let mut digits = Vec::new();
        let mut sign = None;
        'bytes: for byte in rest {
            for nibble in [byte >> 4, byte & 0x0f] {
                match nibble {
                    SIGN_POSITIVE => {
                        sign = Some(false);
                        break 'bytes;
                    }
                    SIGN_NEGATIVE => {
                        sign = Some(true);
                        break 'bytes;
                    }
                    0..=9 => digits.push(nibble),
                    _ => {
                        return Err(WireError::InvalidMessageFrame(
                            "invalid decimal nibble".into(),
                        ));
                    }
                }
            }
        }
        let Some(negative) = sign else {
            return Err(WireError::InvalidMessageFrame("decimal missing sign".into()));
        };
        Ok(Self {
            negative,
            digits,
            scale: *scale,
        })
    }
}

impl std::str::FromStr for Decimal {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = rest.split_once('.').unwrap_or((rest, ""));
        let mut digits = Vec::with_capacity(int_part.len() + frac_part.len());
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c
                .to_digit(10)
                .ok_or_else(|| WireError::InvalidMessageFrame(format!("bad decimal: {s}")))?;
            digits.push(d as u8);
        }
        if digits.is_empty() {
            return Err(WireError::InvalidMessageFrame(format!("bad decimal: {s}")));
        }
        Ok(Self {
            negative,
            digits,
            scale: frac_part.len() as u8,
        })
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        let split = self.digits.len().saturating_sub(self.scale as usize);
        if split == 0 {
            write!(f, "0")?;
        }
        for d in &self.digits[..split] {
            write!(f, "{d}")?;
        }
        if self.scale > 0 {
            write!(f, ".")?;
            for d in &self.digits[split..] {
                write!(f, "{d}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireTime {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireDatetime {
    pub date: WireDate,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl From<chrono::NaiveDate> for WireDate {
    fn from(d: chrono::NaiveDate) -> Self {
        Self {
            year: d.year() as u16,
            month: d.month() as u8,
            day: d.day() as u8,
        }
    }
}

impl From<chrono::NaiveTime> for WireTime {
    fn from(t: chrono::NaiveTime) -> Self {
        Self {
            negative: false,
            hours: t.hour(),
            minutes: t.minute() as u8,
            seconds: t.second() as u8,
            micros: t.nanosecond() / 1_000,
        }
    }
}

impl From<chrono::NaiveDateTime> for WireDatetime {
    fn from(dt: chrono::NaiveDateTime) -> Self {
        Self {
            date: dt.date().into(),
            hours: dt.hour() as u8,
            minutes: dt.minute() as u8,
            seconds: dt.second() as u8,
            micros: dt.nanosecond() / 1_000,
        }
    }
}

// Split helpers

/// Split a raw SET literal on unescaped commas. Backslash escapes the next
/// character, so `a\,b` is one member.
pub fn split_set_literal(raw: &str) -> Vec<String> {
    let mut members = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' => members.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    members.push(current);
    members
}

// Decode helpers (client side and tests)

/// Split a Row frame body into its per-column field blobs.
pub fn decode_row_fields(body: &[u8]) -> WireResult<Vec<&[u8]>> {
    let mut reader = ProtoReader::new(body);
    let mut fields = Vec::new();
    while let Some((field, wire)) = reader.read_tag()? {
        if field == 1 && wire == crate::wire::proto::WireType::LengthDelimited {
            fields.push(reader.read_bytes()?);
        } else {
            reader.skip_field(wire)?;
        }
    }
    Ok(fields)
}

pub fn decode_sint(payload: &[u8]) -> WireResult<i64> {
    let mut reader = ProtoReader::new(payload);
    let v = zigzag_decode(reader.read_varint64()?);
    expect_drained(&reader)?;
    Ok(v)
}

pub fn decode_uint(payload: &[u8]) -> WireResult<u64> {
    let mut reader = ProtoReader::new(payload);
    let v = reader.read_varint64()?;
    expect_drained(&reader)?;
    Ok(v)
}

pub fn decode_float(payload: &[u8]) -> WireResult<f32> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| WireError::InvalidMessageFrame("bad float width".into()))?;
    Ok(f32::from_le_bytes(bytes))
}

pub fn decode_double(payload: &[u8]) -> WireResult<f64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| WireError::InvalidMessageFrame("bad double width".into()))?;
    Ok(f64::from_le_bytes(bytes))
}

pub fn decode_string(payload: &[u8]) -> WireResult<String> {
    let [content @ .., 0] = payload else {
        return Err(WireError::InvalidMessageFrame(
            "string missing trailing NUL".into(),
        ));
    };
    String::from_utf8(content.to_vec())
        .map_err(|_| WireError::InvalidMessageFrame("string not UTF-8".into()))
}

pub fn decode_set(payload: &[u8]) -> WireResult<Vec<String>> {
    if payload.is_empty() || payload == [0x01] {
        return Ok(Vec::new());
    }
    let mut reader = ProtoReader::new(payload);
    let mut members = Vec::new();
    while !reader.at_limit() {
        let bytes = reader.read_bytes()?;
        let member = String::from_utf8(bytes.to_vec())
            .map_err(|_| WireError::InvalidMessageFrame("set member not UTF-8".into()))?;
        members.push(member);
    }
    Ok(members)
}

pub fn decode_bit(payload: &[u8]) -> WireResult<Vec<u8>> {
    let mut reader = ProtoReader::new(payload);
    let bytes = reader.read_bytes()?.to_vec();
    expect_drained(&reader)?;
    Ok(bytes)
}

pub fn decode_date(payload: &[u8]) -> WireResult<WireDate> {
    let parts = read_truncated(payload, 3)?;
    Ok(WireDate {
        year: parts[0] as u16,
        month: parts[1] as u8,
        day: parts[2] as u8,
    })
}

pub fn decode_time(payload: &[u8]) -> WireResult<WireTime> {
    let [sign, rest @ ..] = payload else {
        return Err(WireError::InvalidMessageFrame("time missing sign".into()));
    };
    let parts = read_truncated(rest, 4)?;
    Ok(WireTime {
        negative: *sign != 0,
        hours: parts[0] as u32,
        minutes: parts[1] as u8,
        seconds: parts[2] as u8,
        micros: parts[3] as u32,
    })
}

pub fn decode_datetime(payload: &[u8]) -> WireResult<WireDatetime> {
    let parts = read_truncated(payload, 7)?;
    Ok(WireDatetime {
        date: WireDate {
            year: parts[0] as u16,
            month: parts[1] as u8,
            day: parts[2] as u8,
        },
        hours: parts[3] as u8,
        minutes: parts[4] as u8,
        seconds: parts[5] as u8,
        micros: parts[6] as u32,
    })
}

fn read_truncated(payload: &[u8], count: usize) -> WireResult<Vec<u64>> {
    let mut reader = ProtoReader::new(payload);
    let mut parts = vec![0u64; count];
    for part in parts.iter_mut() {
        if reader.at_limit() {
            break;
        }
        *part = reader.read_varint64()?;
    }
    expect_drained(&reader)?;
    Ok(parts)
}

fn expect_drained(reader: &ProtoReader<'_>) -> WireResult<()> {
    if !reader.at_limit() {
        return Err(WireError::InvalidMessageFrame(
            "trailing bytes in row field".into(),
        ));
    }
    Ok(())
}
