//! Domain events decoded from the scoring feed.
//!
//! Feed messages are JSON objects:
//!
//! ```text
//! { "type": "START_MATCH", "params": { "field": 1, "matchName": "Q3", "shortName": "Q3", "matchNumber": 3 } }
//! { "type": "SHOW_PREVIEW", "field": 2 }
//! ```
//!
//! The field number may sit at the top level or inside `params`.

use chrono::{DateTime, Utc};
use matchbox_common::FieldNumber;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Keepalive reply; not JSON.
const PONG: &str = "pong";

/// Kind of a field event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEventKind {
    MatchStart,
    MatchEnd,
    MatchAbort,
    /// A field was put on the audience display (preview or match view).
    Show,
    Unknown,
}

impl FieldEventKind {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "START_MATCH" => Self::MatchStart,
            "END_MATCH" => Self::MatchEnd,
            "ABORT_MATCH" => Self::MatchAbort,
            "SHOW_PREVIEW" | "SHOW_MATCH" => Self::Show,
            _ => Self::Unknown,
        }
    }
}

/// A decoded unit from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEvent {
    pub field: FieldNumber,
    pub kind: FieldEventKind,
    /// Empty when the message carried no label.
    pub match_label: String,
    /// Local receipt time; all timing decisions use this clock.
    pub received_at: DateTime<Utc>,
    /// Timestamp supplied by the scoring system, if any.
    pub raw_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    field: Option<serde_json::Value>,
    timestamp: Option<i64>,
    #[serde(default)]
    params: WireParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    field: Option<serde_json::Value>,
    match_name: Option<String>,
    short_name: Option<String>,
    match_number: Option<i64>,
    timestamp: Option<i64>,
}

impl WireParams {
    fn label(&self) -> Option<String> {
        [self.match_name.as_deref(), self.short_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.match_number.map(|n| format!("Match {n}")))
    }
}

/// Decode one raw feed message.
///
/// Returns `Ok(None)` for messages that carry no field event: keepalive
/// replies and unrecognized types without a field number.
pub fn decode(text: &str, received_at: DateTime<Utc>) -> Result<Option<FieldEvent>, DecodeError> {
    let text = text.trim();
    if text == PONG {
        return Ok(None);
    }

    let msg: WireMessage = serde_json::from_str(text)?;
    let wire_kind = msg.kind.ok_or(DecodeError::MissingType)?;
    let kind = FieldEventKind::from_wire(&wire_kind);

    let field_value = msg.field.or_else(|| msg.params.field.clone());
    let field = match field_value {
        Some(value) => parse_field(&value)?,
        None if kind == FieldEventKind::Unknown => return Ok(None),
        None => return Err(DecodeError::MissingField { kind: wire_kind }),
    };

    let match_label = msg.params.label().unwrap_or_default();
    if kind == FieldEventKind::MatchStart && match_label.is_empty() {
        return Err(DecodeError::MissingLabel { kind: wire_kind });
    }

    Ok(Some(FieldEvent {
        field,
        kind,
        match_label,
        received_at,
        raw_timestamp: msg.timestamp.or(msg.params.timestamp),
    }))
}

/// Field numbers arrive as integers, occasionally as numeric strings.
fn parse_field(value: &serde_json::Value) -> Result<FieldNumber, DecodeError> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| DecodeError::InvalidField(value.to_string()))?;

    FieldNumber::try_from(n).map_err(|_| DecodeError::InvalidField(value.to_string()))
}
