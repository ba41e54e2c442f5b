//! Record parsing: one unescaped frame payload in, one typed record out.
//!
//! Payload layout (all integers little-endian):
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬────────────────┬─────────┐
//! │ version │ tor     │ flags   │ fields (TLV)…  │ crc     │
//! │ 1 byte  │ 2 bytes │ 2 bytes │ tof|len|data   │ 2 bytes │
//! └─────────┴─────────┴─────────┴────────────────┴─────────┘
//! ```
//!
//! Malformed payloads never panic: the parser returns a [`ParseError`]
//! with a reason code. A CRC mismatch is deliberately NOT a parse error —
//! the reference decoder can emit mildly-malformed packets that still
//! carry usable timing data, so the record is surfaced with `crc.ok`
//! false and the caller decides what to count.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::crc::{self, CrcCheck};
use super::tables::{self, FieldSpec, Tor, TypeTag};

/// Minimum payload: version(1) + tor(2) + flags(2) + crc(2).
pub const MIN_PAYLOAD: usize = 7;

/// Ratio of printable bytes above which an untyped field decodes as text.
const PRINTABLE_THRESHOLD: f64 = 0.85;

/// Reasons a payload cannot become a record.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload shorter than the fixed header plus CRC.
    #[error("payload too short: {len} bytes, need at least {MIN_PAYLOAD}")]
    TooShort { len: usize },

    /// A field's declared length runs past the end of the body. Fields
    /// parsed before the truncation point are retained for diagnostics.
    #[error("field 0x{tof:02X} declares {declared} bytes but only {available} remain")]
    TruncatedField {
        tof: u8,
        declared: usize,
        available: usize,
        parsed: Vec<Field>,
    },

    /// A numeric-typed field wider than the widest supported integer.
    #[error("field 0x{tof:02X} carries {len} bytes, too wide for {}", .ty.as_str())]
    UnknownType { tof: u8, ty: TypeTag, len: usize },
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Zero-extended little-endian unsigned integer (u8/u16/u32/u64).
    Unsigned(u64),
    /// Zero-extended little-endian value reinterpreted as signed (i16/i32).
    Signed(i64),
    /// UTF-8 text (typed `string`, or untyped-but-printable).
    Text(String),
    /// Lowercase hex rendering (typed `hex`, or untyped binary).
    Hex(String),
}

impl FieldValue {
    /// JSON value for the envelope's `value` slot.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Unsigned(v) => json!(v),
            FieldValue::Signed(v) => json!(v),
            FieldValue::Text(s) => json!(s),
            FieldValue::Hex(s) => json!(s),
        }
    }

    /// JSON-ish type name for the envelope's `valueType` slot.
    pub fn value_type(&self) -> &'static str {
        match self {
            FieldValue::Unsigned(_) | FieldValue::Signed(_) => "number",
            FieldValue::Text(_) | FieldValue::Hex(_) => "string",
        }
    }
}

/// One parsed TLV field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Raw field identifier.
    pub tof: u8,
    /// Resolved or synthesized field name.
    pub tof_name: String,
    /// Declared data length (covers only the data bytes).
    pub length: usize,
    /// Type name for the envelope (`u32`, `string`, `hex`, `bytes`, …).
    pub type_name: &'static str,
    /// The raw data bytes.
    pub raw: Vec<u8>,
    /// The decoded value.
    pub value: FieldValue,
}

impl Field {
    /// Lowercase hex rendering of the raw bytes.
    pub fn data_hex(&self) -> String {
        to_hex(&self.raw)
    }

    /// Hexdump-style rendering: printable ASCII as-is, everything else as
    /// a dot.
    pub fn data_ascii(&self) -> String {
        self.raw
            .iter()
            .map(|&b| {
                if (0x20..=0x7E).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect()
    }
}

/// The parsed result of one frame.
#[derive(Debug, Clone)]
pub struct Record {
    /// Protocol version byte.
    pub version: u8,
    /// Record kind.
    pub tor: Tor,
    /// Header flags.
    pub flags: u16,
    /// Fields in wire order.
    pub fields: Vec<Field>,
    /// CRC verification outcome. A mismatch does not suppress the record.
    pub crc: CrcCheck,
    /// Wall-clock timestamp stamped when the record left the parser.
    pub received_at: DateTime<Utc>,
}

impl Record {
    /// Raw TOR wire value.
    pub fn tor_code(&self) -> u16 {
        self.tor.code()
    }

    /// Resolved or synthesized record name.
    pub fn tor_name(&self) -> String {
        self.tor.name()
    }

    /// Flat `{name → value}` convenience map.
    ///
    /// A duplicate name converts the slot into an array; further
    /// duplicates append.
    pub fn decoded_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for field in &self.fields {
            let value = field.value.to_json();
            match map.get_mut(&field.tof_name) {
                None => {
                    map.insert(field.tof_name.clone(), value);
                }
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        map
    }
}

/// Parse one unescaped frame payload into a [`Record`].
pub fn parse_payload(payload: &[u8]) -> Result<Record, ParseError> {
    if payload.len() < MIN_PAYLOAD {
        return Err(ParseError::TooShort { len: payload.len() });
    }

    let version = payload[0];
    let tor = Tor::from_code(u16::from_le_bytes([payload[1], payload[2]]));
    let flags = u16::from_le_bytes([payload[3], payload[4]]);
    let crc = crc::verify(payload);

    let body = &payload[5..payload.len() - 2];
    let fields = parse_fields(tor, body)?;

    Ok(Record {
        version,
        tor,
        flags,
        fields,
        crc,
        received_at: Utc::now(),
    })
}

/// Walk the TLV body.
fn parse_fields(tor: Tor, body: &[u8]) -> Result<Vec<Field>, ParseError> {
    let mut fields = Vec::new();
    let mut i = 0;

    while i < body.len() {
        if body.len() - i < 3 {
            return Err(ParseError::TruncatedField {
                tof: body[i],
                declared: 0,
                available: body.len() - i,
                parsed: fields,
            });
        }
        let tof = body[i];
        let length = u16::from_le_bytes([body[i + 1], body[i + 2]]) as usize;
        let data_start = i + 3;

        if data_start + length > body.len() {
            return Err(ParseError::TruncatedField {
                tof,
                declared: length,
                available: body.len() - data_start,
                parsed: fields,
            });
        }

        let raw = body[data_start..data_start + length].to_vec();
        fields.push(decode_field(tor, tof, raw)?);
        i = data_start + length;
    }

    Ok(fields)
}

fn decode_field(tor: Tor, tof: u8, raw: Vec<u8>) -> Result<Field, ParseError> {
    match tables::field_spec(tor, tof) {
        Some(FieldSpec { name, ty }) => {
            let value = decode_typed(tof, ty, &raw)?;
            Ok(Field {
                tof,
                tof_name: name.to_string(),
                length: raw.len(),
                type_name: ty.as_str(),
                raw,
                value,
            })
        }
        None => {
            let (type_name, value) = decode_untyped(&raw);
            Ok(Field {
                tof,
                tof_name: tables::unknown_tof_name(tof),
                length: raw.len(),
                type_name,
                raw,
                value,
            })
        }
    }
}

fn decode_typed(tof: u8, ty: TypeTag, raw: &[u8]) -> Result<FieldValue, ParseError> {
    if let Some(width) = ty.max_width() {
        if raw.len() > width {
            return Err(ParseError::UnknownType {
                tof,
                ty,
                len: raw.len(),
            });
        }
    }
    let value = match ty {
        TypeTag::U8 | TypeTag::U16 | TypeTag::U32 | TypeTag::U64 => {
            FieldValue::Unsigned(read_uint_le(raw))
        }
        TypeTag::I16 => FieldValue::Signed(read_uint_le(raw) as u16 as i16 as i64),
        TypeTag::I32 => FieldValue::Signed(read_uint_le(raw) as u32 as i32 as i64),
        TypeTag::Str => FieldValue::Text(String::from_utf8_lossy(raw).into_owned()),
        TypeTag::Hex => FieldValue::Hex(to_hex(raw)),
    };
    Ok(value)
}

/// Untyped fields: mostly-printable data becomes text, anything else a
/// lowercase hex string tagged `bytes`.
fn decode_untyped(raw: &[u8]) -> (&'static str, FieldValue) {
    if is_mostly_printable(raw) {
        if let Ok(text) = std::str::from_utf8(raw) {
            return ("string", FieldValue::Text(text.to_string()));
        }
    }
    ("bytes", FieldValue::Hex(to_hex(raw)))
}

/// Little-endian unsigned decode; fields shorter than the declared width
/// are zero-extended from the MSB side. Caller guarantees `raw.len() <= 8`.
fn read_uint_le(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..raw.len()].copy_from_slice(raw);
    u64::from_le_bytes(buf)
}

/// True when at least 85% of the bytes are TAB, LF, CR, or 0x20..=0x7E.
/// An empty run counts as printable.
fn is_mostly_printable(raw: &[u8]) -> bool {
    if raw.is_empty() {
        return true;
    }
    let printable = raw
        .iter()
        .filter(|&&b| matches!(b, 0x09 | 0x0A | 0x0D) || (0x20..=0x7E).contains(&b))
        .count();
    printable as f64 / raw.len() as f64 >= PRINTABLE_THRESHOLD
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
