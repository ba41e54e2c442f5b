//! JSON envelope for outbound records.
//!
//! One record becomes one `application/json` body:
//!
//! ```json
//! {
//!   "receivedAt": "2026-08-02T14:03:55.120Z",
//!   "version": 4,
//!   "tor": 1, "torName": "passing",
//!   "flags": 0,
//!   "crcOk": true,
//!   "decoded": { "passingNumber": 42, "transponder": "deadbeef" },
//!   "fields": [ { "tof": 1, "tofName": "passingNumber", ... } ]
//! }
//! ```

use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::protocol::Record;

/// Build the HTTP body for one record.
pub fn envelope(record: &Record) -> Value {
    let fields: Vec<Value> = record
        .fields
        .iter()
        .map(|field| {
            json!({
                "tof": field.tof,
                "tofName": field.tof_name,
                "length": field.length,
                "type": field.type_name,
                "value": field.value.to_json(),
                "valueType": field.value.value_type(),
                "dataHex": field.data_hex(),
                "dataAscii": field.data_ascii(),
            })
        })
        .collect();

    json!({
        "receivedAt": record
            .received_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        "version": record.version,
        "tor": record.tor_code(),
        "torName": record.tor_name(),
        "flags": record.flags,
        "crcOk": record.crc.ok,
        "decoded": Value::Object(record.decoded_map()),
        "fields": fields,
    })
}
