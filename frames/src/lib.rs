//! Wire codec for the chat registry RPC.
//!
//! PROTOCOL
//! ========
//! A client sends one `request` frame per call and the server answers with
//! exactly one terminal frame, `done` or `error`, whose `parent_id` names the
//! request. There are no streaming or cancellation states. The server's
//! unsolicited notices (`session:connected`, `gateway:error`) travel as
//! `request` frames with no parent.
//!
//! ENCODINGS
//! =========
//! - Binary: the `WireFrame` protobuf message below. `chat_id` is an `int64`
//!   so 63-bit chat ids cross the wire exactly.
//! - JSON: `Frame` itself via serde, with lowercase status names.
//!
//! The payload is carried as `google.protobuf.Value`, which stores every
//! number as a double; integral doubles within 2^53 are restored to JSON
//! integers on decode.

use prost::Message;
use prost_types::value::Kind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest integer magnitude an `f64` represents exactly (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
}

// =============================================================================
// FRAME
// =============================================================================

/// Where a frame sits in its call: the opening request or one of the two
/// terminal replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    /// Numeric value used by the protobuf encoding.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        WireFrameStatus::from(self) as i32
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        let wire = WireFrameStatus::try_from(value).map_err(|_| CodecError::InvalidStatus(value))?;
        Ok(match wire {
            WireFrameStatus::Request => Self::Request,
            WireFrameStatus::Done => Self::Done,
            WireFrameStatus::Error => Self::Error,
        })
    }
}

/// Transport-level view of one RPC frame. Ids are opaque strings here; the
/// server parses them into UUIDs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    /// Request this frame answers. `None` on requests and server notices.
    pub parent_id: Option<String>,
    /// Creation time, milliseconds since the Unix epoch.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// `prefix:op`, e.g. `chat:send`.
    pub syscall: String,
    pub status: Status,
    /// Flat JSON object of call arguments or results.
    pub data: Value,
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Serialize a frame as a protobuf `WireFrame`.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    WireFrame::from(frame).encode_to_vec()
}

/// Parse a protobuf `WireFrame`.
///
/// # Errors
///
/// `CodecError::Decode` if the bytes are not a `WireFrame`;
/// `CodecError::InvalidStatus` if the status is not request, done, or error.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    Frame::try_from(WireFrame::decode(bytes)?)
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            parent_id: frame.parent_id.clone(),
            ts: frame.ts,
            chat_id: frame.chat_id,
            syscall: frame.syscall.clone(),
            status: frame.status.as_i32(),
            data: Some(to_proto_value(&frame.data)),
        }
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = CodecError;

    fn try_from(wire: WireFrame) -> Result<Self, Self::Error> {
        let status = Status::from_i32(wire.status)?;
        let data = match &wire.data {
            Some(value) => from_proto_value(value),
            None => Value::Object(Map::new()),
        };
        Ok(Self {
            id: wire.id,
            parent_id: wire.parent_id,
            ts: wire.ts,
            chat_id: wire.chat_id,
            syscall: wire.syscall,
            status,
            data,
        })
    }
}

// =============================================================================
// PAYLOAD CONVERSION
// =============================================================================

fn to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => Kind::NullValue(prost_types::NullValue::NullValue.into()),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(prost_types::ListValue { values: items.iter().map(to_proto_value).collect() }),
        Value::Object(fields) => Kind::StructValue(prost_types::Struct {
            fields: fields.iter().map(|(k, v)| (k.clone(), to_proto_value(v))).collect(),
        }),
    };
    prost_types::Value { kind: Some(kind) }
}

fn from_proto_value(value: &prost_types::Value) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => number_to_json(*n),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => list.values.iter().map(from_proto_value).collect(),
        Some(Kind::StructValue(st)) => Value::Object(
            st.fields
                .iter()
                .map(|(k, v)| (k.clone(), from_proto_value(v)))
                .collect(),
        ),
    }
}

/// Integral values that fit exactly come back as JSON integers so
/// identifiers stay integers.
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
fn number_to_json(v: f64) -> Value {
    if v.is_finite() && v.trunc() == v && v.abs() <= MAX_EXACT_INTEGER {
        return Value::from(v as i64);
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

// =============================================================================
// PROTOBUF SCHEMA
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(int64, optional, tag = "4")]
    chat_id: Option<i64>,
    #[prost(string, tag = "5")]
    syscall: String,
    #[prost(enumeration = "WireFrameStatus", tag = "6")]
    status: i32,
    #[prost(message, optional, tag = "7")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireFrameStatus {
    Request = 0,
    Done = 1,
    Error = 2,
}

impl From<Status> for WireFrameStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Request => Self::Request,
            Status::Done => Self::Done,
            Status::Error => Self::Error,
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
