//! Message schemas for both protocol directions.
//!
//! Each message has a hand-written tag table — a closed set resolved at
//! compile time, no reflection. Client messages are parsed out of frame
//! bodies; server messages are built straight into the page chain by the
//! encoder. Unknown client type codes still reach the dispatcher with a
//! null payload so it can account for them.

use crate::error::{WireError, WireResult};
use crate::wire::buffer::PageBuffer;
use crate::wire::encoder::MessageEncoder;
use crate::wire::frame::msg;
use crate::wire::proto::{ProtoReader, WireType, zigzag_decode};
use crate::wire::row::ColumnType;

/// A typed parameter or capability value. Octets and strings are nested
/// messages, which is what exercises the parser's recursion bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    SInt(i64),
    UInt(u64),
    Double(f64),
    Float(f32),
    Bool(bool),
    String(String),
    Octets(Vec<u8>),
}

mod scalar_type {
    pub const SINT: u32 = 1;
    pub const UINT: u32 = 2;
    pub const NULL: u32 = 3;
    pub const OCTETS: u32 = 4;
    pub const DOUBLE: u32 = 5;
    pub const FLOAT: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
}

/// Fully-parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CapabilitiesSet {
        capabilities: Vec<(String, Scalar)>,
    },
    Ping,
    Query {
        statement: String,
        params: Vec<Scalar>,
    },
    Disconnect,
    Expect {
        conditions: Vec<u32>,
    },
}

/// Receives every fully-parsed inbound message, in arrival order. A `None`
/// payload means the type code was unknown; the dispatcher decides what
/// bookkeeping that deserves.
pub trait Dispatcher {
    fn dispatch(&mut self, ty: u8, message: Option<ClientMessage>) -> WireResult<()>;
}

/// Parse one frame body. Returns `None` for unknown type codes.
pub fn parse_client(ty: u8, body: &[u8]) -> WireResult<Option<ClientMessage>> {
    let mut reader = ProtoReader::new(body);
    let message = match ty {
        msg::CAPABILITIES_SET => Some(parse_capabilities_set(&mut reader)?),
        msg::PING => {
            expect_empty(&reader, "Ping")?;
            Some(ClientMessage::Ping)
        }
        msg::QUERY => Some(parse_query(&mut reader)?),
        msg::DISCONNECT => {
            expect_empty(&reader, "Disconnect")?;
            Some(ClientMessage::Disconnect)
        }
        msg::EXPECT => Some(parse_expect(&mut reader)?),
        _ => return Ok(None),
    };
    if !reader.at_limit() {
        return Err(WireError::InvalidMessageFrame(format!(
            "{} leftover bytes after message",
            reader.remaining()
        )));
    }
    Ok(message)
}

fn expect_empty(reader: &ProtoReader<'_>, name: &str) -> WireResult<()> {
    if !reader.at_limit() {
        return Err(WireError::InvalidMessageFrame(format!(
            "{name} carries an unexpected body"
        )));
    }
    Ok(())
}

fn parse_capabilities_set(reader: &mut ProtoReader<'_>) -> WireResult<ClientMessage> {
    let mut capabilities = Vec::new();
    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::LengthDelimited) => {
                let len = reader.read_varint64()? as usize;
                let outer = reader.push_limit(len)?;
                reader.enter()?;
                capabilities.push(parse_capability(reader)?);
                reader.exit();
                reader.pop_limit(outer)?;
            }
            (_, wire) => reader.skip_field(wire)?,
        }
    }
    Ok(ClientMessage::CapabilitiesSet { capabilities })
}

fn parse_capability(reader: &mut ProtoReader<'_>) -> WireResult<(String, Scalar)> {
    let mut name = None;
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::LengthDelimited) => name = Some(reader.read_string()?.to_owned()),
            (2, WireType::LengthDelimited) => {
                let len = reader.read_varint64()? as usize;
                let outer = reader.push_limit(len)?;
                reader.enter()?;
                value = Some(parse_scalar(reader)?);
                reader.exit();
                reader.pop_limit(outer)?;
            }
            (_, wire) => reader.skip_field(wire)?,
        }
    }
    match (name, value) {
        (Some(name), Some(value)) => Ok((name, value)),
        _ => Err(WireError::InvalidMessageFrame(
            "capability missing name or value".into(),
        )),
    }
}

fn parse_query(reader: &mut ProtoReader<'_>) -> WireResult<ClientMessage> {
    let mut statement = None;
    let mut params = Vec::new();
    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::LengthDelimited) => statement = Some(reader.read_string()?.to_owned()),
            (2, WireType::LengthDelimited) => {
                let len = reader.read_varint64()? as usize;
                let outer = reader.push_limit(len)?;
                reader.enter()?;
                params.push(parse_scalar(reader)?);
                reader.exit();
                reader.pop_limit(outer)?;
            }
            (_, wire) => reader.skip_field(wire)?,
        }
    }
    let statement = statement
        .ok_or_else(|| WireError::InvalidMessageFrame("query missing statement".into()))?;
    Ok(ClientMessage::Query { statement, params })
}

fn parse_expect(reader: &mut ProtoReader<'_>) -> WireResult<ClientMessage> {
    let mut conditions = Vec::new();
    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::Varint) => conditions.push(reader.read_varint32()?),
            (_, wire) => reader.skip_field(wire)?,
        }
    }
    Ok(ClientMessage::Expect { conditions })
}

fn parse_scalar(reader: &mut ProtoReader<'_>) -> WireResult<Scalar> {
    let mut ty = None;
    let mut sint = None;
    let mut uint = None;
    let mut double = None;
    let mut float = None;
    let mut boolean = None;
    let mut octets = None;
    let mut string = None;

    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::Varint) => ty = Some(reader.read_varint32()?),
            (2, WireType::Varint) => sint = Some(zigzag_decode(reader.read_varint64()?)),
            (3, WireType::Varint) => uint = Some(reader.read_varint64()?),
            (5, WireType::LengthDelimited) => {
                octets = Some(parse_wrapped_bytes(reader)?);
            }
            (6, WireType::Fixed64) => double = Some(f64::from_bits(reader.read_fixed64()?)),
            (7, WireType::Fixed32) => float = Some(f32::from_bits(reader.read_fixed32()?)),
            (8, WireType::Varint) => boolean = Some(reader.read_varint64()? != 0),
            (9, WireType::LengthDelimited) => {
                string = Some(parse_wrapped_bytes(reader)?);
            }
            (_, wire) => reader.skip_field(wire)?,
        }
    }

    let ty = ty.ok_or_else(|| WireError::InvalidMessageFrame("scalar missing type".into()))?;
    let missing = || WireError::InvalidMessageFrame("scalar missing value".into());
    match ty {
        scalar_type::NULL => Ok(Scalar::Null),
        scalar_type::SINT => sint.map(Scalar::SInt).ok_or_else(missing),
        scalar_type::UINT => uint.map(Scalar::UInt).ok_or_else(missing),
        scalar_type::DOUBLE => double.map(Scalar::Double).ok_or_else(missing),
        scalar_type::FLOAT => float.map(Scalar::Float).ok_or_else(missing),
        scalar_type::BOOL => boolean.map(Scalar::Bool).ok_or_else(missing),
        scalar_type::OCTETS => octets.map(Scalar::Octets).ok_or_else(missing),
        scalar_type::STRING => {
            let bytes = string.ok_or_else(missing)?;
            let s = String::from_utf8(bytes).map_err(|_| {
                WireError::InvalidMessageFrame("scalar string not UTF-8".into())
            })?;
            Ok(Scalar::String(s))
        }
        other => Err(WireError::InvalidMessageFrame(format!(
            "unknown scalar type {other}"
        ))),
    }
}

/// Octets and String wrap their bytes in a one-field nested message.
fn parse_wrapped_bytes(reader: &mut ProtoReader<'_>) -> WireResult<Vec<u8>> {
    let len = reader.read_varint64()? as usize;
    let outer = reader.push_limit(len)?;
    reader.enter()?;
    let mut value = None;
    while let Some((field, wire)) = reader.read_tag()? {
        match (field, wire) {
            (1, WireType::LengthDelimited) => value = Some(reader.read_bytes()?.to_vec()),
            (_, wire) => reader.skip_field(wire)?,
        }
    }
    reader.exit();
    reader.pop_limit(outer)?;
    value.ok_or_else(|| WireError::InvalidMessageFrame("wrapped bytes missing value".into()))
}

// Client-side builders

fn scalar_type_of(scalar: &Scalar) -> u32 {
    match scalar {
        Scalar::Null => scalar_type::NULL,
        Scalar::SInt(_) => scalar_type::SINT,
        Scalar::UInt(_) => scalar_type::UINT,
        Scalar::Double(_) => scalar_type::DOUBLE,
        Scalar::Float(_) => scalar_type::FLOAT,
        Scalar::Bool(_) => scalar_type::BOOL,
        Scalar::Octets(_) => scalar_type::OCTETS,
        Scalar::String(_) => scalar_type::STRING,
    }
}

fn encode_scalar(enc: &mut MessageEncoder<'_>, field: u32, scalar: &Scalar) -> WireResult<()> {
    let pos = enc.begin_delimited(field);
    enc.field_varint32(1, scalar_type_of(scalar));
    match scalar {
        Scalar::Null => {}
        Scalar::SInt(v) => enc.field_sint64(2, *v),
        Scalar::UInt(v) => enc.field_varint64(3, *v),
        Scalar::Double(v) => enc.field_double(6, *v),
        Scalar::Float(v) => enc.field_float(7, *v),
        Scalar::Bool(v) => enc.field_bool(8, *v),
        Scalar::Octets(bytes) => {
            let inner = enc.begin_delimited(5);
            enc.field_bytes(1, bytes);
            enc.end_delimited(inner)?;
        }
        Scalar::String(s) => {
            let inner = enc.begin_delimited(9);
            enc.field_bytes(1, s.as_bytes());
            enc.end_delimited(inner)?;
        }
    }
    enc.end_delimited(pos)
}

pub fn encode_ping(buf: &mut PageBuffer) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::PING);
    enc.end_frame(frame);
}

pub fn encode_disconnect(buf: &mut PageBuffer) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::DISCONNECT);
    enc.end_frame(frame);
}

pub fn encode_query(buf: &mut PageBuffer, statement: &str, params: &[Scalar]) -> WireResult<()> {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::QUERY);
    enc.field_string(1, statement);
    for param in params {
        encode_scalar(&mut enc, 2, param)?;
    }
    enc.end_frame(frame);
    Ok(())
}

pub fn encode_capabilities_set(
    buf: &mut PageBuffer,
    capabilities: &[(&str, Scalar)],
) -> WireResult<()> {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::CAPABILITIES_SET);
    for (name, value) in capabilities {
        let cap = enc.begin_delimited(1);
        enc.field_string(1, name);
        encode_scalar(&mut enc, 2, value)?;
        enc.end_delimited(cap)?;
    }
    enc.end_frame(frame);
    Ok(())
}

pub fn encode_expect(buf: &mut PageBuffer, conditions: &[u32]) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::EXPECT);
    for c in conditions {
        enc.field_varint32(1, *c);
    }
    enc.end_frame(frame);
}

// Server-side builders

/// Column metadata announced ahead of the rows of a resultset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub ty: ColumnType,
    pub name: String,
    pub original_name: String,
    pub table: String,
    pub original_table: String,
    pub schema: String,
    pub catalog: String,
    pub length: u32,
    pub fractional_digits: u32,
    pub flags: u32,
}

impl ColumnMeta {
    pub fn named(ty: ColumnType, name: &str) -> Self {
        Self {
            ty,
            name: name.to_owned(),
            original_name: name.to_owned(),
            table: String::new(),
            original_table: String::new(),
            schema: String::new(),
            catalog: String::new(),
            length: 0,
            fractional_digits: 0,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorSeverity {
    Error = 0,
    Fatal = 1,
}

pub fn encode_ok(buf: &mut PageBuffer, message: Option<&str>) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::OK);
    if let Some(message) = message {
        enc.field_string(1, message);
    }
    enc.end_frame(frame);
}

pub fn encode_error(
    buf: &mut PageBuffer,
    severity: ErrorSeverity,
    code: u32,
    sql_state: &str,
    message: &str,
) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::ERROR);
    enc.field_enum(1, severity as u32);
    enc.field_varint32(2, code);
    enc.field_string(3, sql_state);
    enc.field_string(4, message);
    enc.end_frame(frame);
}

pub fn encode_column_meta(buf: &mut PageBuffer, meta: &ColumnMeta) {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::COLUMN_META);
    enc.field_enum(1, meta.ty as u32);
    enc.field_string(2, &meta.name);
    enc.field_string(3, &meta.original_name);
    enc.field_string(4, &meta.table);
    enc.field_string(5, &meta.original_table);
    enc.field_string(6, &meta.schema);
    enc.field_string(7, &meta.catalog);
    enc.field_varint32(8, meta.length);
    enc.field_varint32(9, meta.fractional_digits);
    enc.field_varint32(10, meta.flags);
    enc.end_frame(frame);
}

/// FetchDone and its variants are empty-bodied marker frames.
pub fn encode_marker(buf: &mut PageBuffer, ty: u8) {
    debug_assert!(matches!(
        ty,
        msg::FETCH_DONE
            | msg::FETCH_SUSPENDED
            | msg::FETCH_DONE_MORE_RESULTS
            | msg::FETCH_DONE_MORE_OUT_PARAMS
    ));
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(ty);
    enc.end_frame(frame);
}

pub mod notice {
    pub const WARNING: u32 = 1;
    pub const SESSION_STATE_CHANGED: u32 = 3;

    pub const SCOPE_GLOBAL: u32 = 1;
    pub const SCOPE_LOCAL: u32 = 2;
}

/// Notice frame carrying a SessionStateChanged payload: the classic
/// Notice -> SessionStateChanged -> Scalar nesting.
pub fn encode_session_state_notice(
    buf: &mut PageBuffer,
    param: u32,
    value: &Scalar,
) -> WireResult<()> {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::NOTICE);
    enc.field_varint32(1, notice::SESSION_STATE_CHANGED);
    enc.field_varint32(2, notice::SCOPE_LOCAL);
    let payload = enc.begin_delimited(3);
    enc.field_varint32(1, param);
    encode_scalar(&mut enc, 2, value)?;
    enc.end_delimited(payload)?;
    enc.end_frame(frame);
    Ok(())
}

pub fn encode_warning_notice(buf: &mut PageBuffer, code: u32, message: &str) -> WireResult<()> {
    let mut enc = MessageEncoder::new(buf);
    let frame = enc.begin_frame(msg::NOTICE);
    enc.field_varint32(1, notice::WARNING);
    enc.field_varint32(2, notice::SCOPE_LOCAL);
    let payload = enc.begin_delimited(3);
    enc.field_varint32(1, code);
    enc.field_string(2, message);
    enc.end_delimited(payload)?;
    enc.end_frame(frame);
    Ok(())
}
