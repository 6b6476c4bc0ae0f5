//! Normalization of Bedrock invocation log documents into [`LogEntry`] rows

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::models::{LogEntry, RawLogEvent};

/// Why a raw event could not become a [`LogEntry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Message body is not JSON
    NotJson,
    /// Element is neither a document nor an event wrapper
    NotAnObject,
    /// A required field is absent
    MissingField(&'static str),
    /// A token or latency field is not a non-negative integer
    InvalidNumber(&'static str),
    /// `timestamp` is present but not RFC 3339
    InvalidTimestamp(String),
    /// Input and output counts overflow when summed
    TokenOverflow,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotJson => write!(f, "message is not JSON"),
            Self::NotAnObject => write!(f, "entry is not a JSON object"),
            Self::MissingField(field) => write!(f, "missing {field}"),
            Self::InvalidNumber(field) => write!(f, "{field} is not a non-negative integer"),
            Self::InvalidTimestamp(ts) => write!(f, "invalid timestamp {ts:?}"),
            Self::TokenOverflow => write!(f, "token counts overflow"),
        }
    }
}

/// Normalize one event returned by the log store
pub fn normalize_event(event: &RawLogEvent) -> Result<LogEntry, SkipReason> {
    let doc: Value = serde_json::from_str(&event.message).map_err(|_| SkipReason::NotJson)?;
    normalize_document(&doc, Some(event.timestamp_ms))
}

/// Normalize one element of offline JSON input.
///
/// Accepts either an invocation document or an event wrapper carrying the
/// document as a string `message` plus an optional numeric `timestamp`.
pub fn normalize_value(value: &Value) -> Result<LogEntry, SkipReason> {
    let object = value.as_object().ok_or(SkipReason::NotAnObject)?;

    match object.get("message") {
        Some(Value::String(message)) => {
            let fallback = object
                .get("timestamp_ms")
                .or_else(|| object.get("timestamp"))
                .and_then(Value::as_i64);
            let doc: Value = serde_json::from_str(message).map_err(|_| SkipReason::NotJson)?;
            normalize_document(&doc, fallback)
        }
        _ => normalize_document(value, None),
    }
}

/// Normalize a parsed invocation document.
///
/// `fallback_ts_ms` is the store's event timestamp, used when the document
/// has no `timestamp` of its own.
pub fn normalize_document(
    doc: &Value,
    fallback_ts_ms: Option<i64>,
) -> Result<LogEntry, SkipReason> {
    if !doc.is_object() {
        return Err(SkipReason::NotAnObject);
    }

    let timestamp = parse_timestamp(doc.get("timestamp"), fallback_ts_ms)?;
    let input_tokens = token_count(doc.pointer("/input/inputTokenCount"), "input.inputTokenCount")?;
    let output_tokens =
        token_count(doc.pointer("/output/outputTokenCount"), "output.outputTokenCount")?;
    let total_tokens = input_tokens
        .checked_add(output_tokens)
        .ok_or(SkipReason::TokenOverflow)?;

    Ok(LogEntry {
        timestamp,
        model_id: string_at(doc, "/modelId"),
        user_identity: string_at(doc, "/identity/arn"),
        input_tokens,
        output_tokens,
        total_tokens,
        latency_ms: latency(doc)?,
        region: string_at(doc, "/region"),
        request_id: string_at(doc, "/requestId"),
        operation: string_at(doc, "/operation"),
        prompt: user_prompt(doc),
    })
}

fn parse_timestamp(
    value: Option<&Value>,
    fallback_ts_ms: Option<i64>,
) -> Result<DateTime<Utc>, SkipReason> {
    match value {
        Some(Value::String(ts)) => DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| SkipReason::InvalidTimestamp(ts.clone())),
        Some(Value::Null) | None => fallback_ts_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or(SkipReason::MissingField("timestamp")),
        Some(other) => Err(SkipReason::InvalidTimestamp(other.to_string())),
    }
}

fn token_count(value: Option<&Value>, field: &'static str) -> Result<u64, SkipReason> {
    match value {
        None | Some(Value::Null) => Err(SkipReason::MissingField(field)),
        Some(v) => v.as_u64().ok_or(SkipReason::InvalidNumber(field)),
    }
}

fn latency(doc: &Value) -> Result<Option<u64>, SkipReason> {
    let reported = doc
        .pointer("/output/outputBodyJson/metrics/latencyMs")
        .or_else(|| {
            doc.pointer("/output/outputBodyJson/amazon-bedrock-invocationMetrics/invocationLatency")
        });

    match reported {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or(SkipReason::InvalidNumber("latency")),
    }
}

fn string_at(doc: &Value, pointer: &str) -> Option<String> {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Concatenated text of every user-role message in the request body
fn user_prompt(doc: &Value) -> Option<String> {
    let messages = doc
        .pointer("/input/inputBodyJson/messages")
        .and_then(Value::as_array)?;

    let text = messages
        .iter()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .filter_map(|m| m.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|c| c.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
