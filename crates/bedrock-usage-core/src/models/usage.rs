//! Aggregated usage data models

use serde::{Deserialize, Serialize};

use super::{LogEntry, UsageQuery};

/// Bucket name for entries that lack the grouping key
pub const UNKNOWN_KEY: &str = "unknown";

/// Dimension an aggregate table is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// Model id
    Model,
    /// Caller identity ARN
    User,
    /// UTC calendar day
    Day,
}

impl GroupBy {
    /// All dimensions, in report order
    pub const ALL: [GroupBy; 3] = [GroupBy::Model, GroupBy::User, GroupBy::Day];

    /// Human readable column name for the key
    pub fn key_label(self) -> &'static str {
        match self {
            Self::Model => "model_id",
            Self::User => "user_id",
            Self::Day => "day",
        }
    }

    /// Whether rows of this table list the distinct models they contain
    pub fn lists_models(self) -> bool {
        !matches!(self, Self::Model)
    }
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Model => "model",
            Self::User => "user",
            Self::Day => "day",
        };
        f.write_str(name)
    }
}

/// One row of an aggregate table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Grouping key (model id, user ARN, or `YYYY-MM-DD`)
    pub key: String,

    /// Number of invocations in the bucket
    pub invocation_count: u64,

    // Token sums
    /// Sum of input tokens
    pub input_tokens: u64,

    /// Sum of output tokens
    pub output_tokens: u64,

    /// Sum of total tokens
    pub total_tokens: u64,

    // Means, rounded to two decimals
    /// Average input tokens per invocation
    pub avg_input_tokens: f64,

    /// Average output tokens per invocation
    pub avg_output_tokens: f64,

    /// Average total tokens per invocation
    pub avg_total_tokens: f64,

    /// Average latency over invocations that reported one; 0 when none did
    pub avg_latency_ms: f64,

    /// Distinct models seen in the bucket (user and day tables only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

/// Ungrouped totals over every normalized entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Number of invocations
    pub invocation_count: u64,
    /// Sum of input tokens
    pub input_tokens: u64,
    /// Sum of output tokens
    pub output_tokens: u64,
    /// Sum of total tokens
    pub total_tokens: u64,
    /// Average latency over invocations that reported one
    pub avg_latency_ms: f64,
}

/// Everything the aggregator derives from one batch of raw events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Per-model table
    pub by_model: Vec<AggregateRow>,
    /// Per-user table
    pub by_user: Vec<AggregateRow>,
    /// Per-day table
    pub by_day: Vec<AggregateRow>,
    /// Normalized entries, in input order
    pub entries: Vec<LogEntry>,
    /// Raw events that could not be normalized
    pub skipped: usize,
    /// Ungrouped totals
    pub totals: UsageTotals,
}

impl UsageReport {
    /// The table for one dimension
    pub fn table(&self, group_by: GroupBy) -> &[AggregateRow] {
        match group_by {
            GroupBy::Model => &self.by_model,
            GroupBy::User => &self.by_user,
            GroupBy::Day => &self.by_day,
        }
    }

    /// Take ownership of one table, dropping the rest
    pub fn into_table(self, group_by: GroupBy) -> Vec<AggregateRow> {
        match group_by {
            GroupBy::Model => self.by_model,
            GroupBy::User => self.by_user,
            GroupBy::Day => self.by_day,
        }
    }
}

/// Response of the raw logs operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    /// The window that was queried
    pub query: UsageQuery,
    /// Number of normalized entries
    pub count: usize,
    /// Raw events that could not be normalized
    pub skipped: usize,
    /// Normalized entries
    pub entries: Vec<LogEntry>,
}

/// Response of a grouped usage operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    /// The window that was queried
    pub query: UsageQuery,
    /// Dimension the rows are keyed by
    pub group_by: GroupBy,
    /// Raw events that could not be normalized
    pub skipped: usize,
    /// Ungrouped totals
    pub totals: UsageTotals,
    /// Rows sorted by total tokens, descending
    pub rows: Vec<AggregateRow>,
}
