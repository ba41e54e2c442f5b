//! Protocol module - P3 wire format, framing, and record parsing.
//!
//! This module implements the decoder-facing half of the bridge:
//! - CRC-16/CCITT-FALSE validation
//! - SOH/EOT/DLE framing with byte-stuffing
//! - TLV record parsing with static TOR/TOF type tables

pub mod crc;
pub mod framing;
pub mod record;
pub mod tables;

pub use crc::{crc16, CrcCheck};
pub use framing::{encode_frame, FrameDiagnostic, Framer, DLE, EOT, SOH};
pub use record::{parse_payload, Field, FieldValue, ParseError, Record};
pub use tables::{field_spec, FieldSpec, Tor, TypeTag};
