//! Invocation log data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event exactly as the log store returned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEvent {
    /// Store-assigned event identifier, used for deduplication
    pub event_id: Option<String>,

    /// Event timestamp in milliseconds since the Unix epoch
    pub timestamp_ms: i64,

    /// Stream the event was read from
    pub log_stream_name: Option<String>,

    /// Raw message body (a Bedrock invocation log JSON document)
    pub message: String,
}

impl RawLogEvent {
    /// Build an event from a message, without store metadata
    pub fn new(timestamp_ms: i64, message: impl Into<String>) -> Self {
        Self {
            event_id: None,
            timestamp_ms,
            log_stream_name: None,
            message: message.into(),
        }
    }

    /// Attach a store event id
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

/// One normalized Bedrock invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the invocation occurred
    pub timestamp: DateTime<Utc>,

    /// Model invoked (e.g. "amazon.nova-lite-v1:0")
    pub model_id: Option<String>,

    /// ARN of the calling principal
    pub user_identity: Option<String>,

    /// Prompt tokens
    pub input_tokens: u64,

    /// Completion tokens
    pub output_tokens: u64,

    /// Always `input_tokens + output_tokens`
    pub total_tokens: u64,

    /// End-to-end latency, when the model reported it
    pub latency_ms: Option<u64>,

    /// Region the invocation ran in
    pub region: Option<String>,

    /// Bedrock request id
    pub request_id: Option<String>,

    /// API operation (InvokeModel, Converse, ...)
    pub operation: Option<String>,

    /// Concatenated text of the user-role messages
    pub prompt: Option<String>,
}

impl LogEntry {
    /// Build an entry from the fields every invocation carries
    pub fn new(
        timestamp: DateTime<Utc>,
        model_id: Option<String>,
        user_identity: Option<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            timestamp,
            model_id,
            user_identity,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            latency_ms: None,
            region: None,
            request_id: None,
            operation: None,
            prompt: None,
        }
    }

    /// UTC calendar day of the invocation, formatted `YYYY-MM-DD`
    pub fn day(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_total_is_derived() {
        let entry = LogEntry::new(Utc::now(), Some("titan".into()), None, 5, 7);
        assert_eq!(entry.total_tokens, 12);
    }

    #[test]
    fn test_day_uses_utc() {
        let ts = chrono::FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 2, 1, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let entry = LogEntry::new(ts, None, None, 1, 1);
        assert_eq!(entry.day(), "2025-03-01");
    }
}
