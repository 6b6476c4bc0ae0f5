//! Usage aggregator
//!
//! Normalizes raw invocation events and rolls them up by model, by user and
//! by UTC day. Malformed events are counted, never raised.

mod normalize;

pub use normalize::{normalize_document, normalize_event, normalize_value, SkipReason};

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    AggregateRow, GroupBy, LogEntry, RawLogEvent, UsageQuery, UsageReport, UsageTotals,
    UNKNOWN_KEY,
};

/// Aggregate events fetched from the log store
pub fn aggregate_events(events: &[RawLogEvent]) -> UsageReport {
    let (entries, skipped) = normalize_all(events, |_| true);
    summarize(entries, skipped)
}

/// Aggregate events, keeping only entries whose own document timestamp
/// falls inside `query`.
///
/// The store filters on ingestion time, which can differ from the time the
/// invocation document records.
pub fn aggregate_window(events: &[RawLogEvent], query: &UsageQuery) -> UsageReport {
    let (entries, skipped) = normalize_all(events, |entry| {
        let inside = query.contains(entry.timestamp);
        if !inside {
            debug!(timestamp = %entry.timestamp, "Dropping entry outside the window");
        }
        inside
    });
    summarize(entries, skipped)
}

fn normalize_all(
    events: &[RawLogEvent],
    keep: impl Fn(&LogEntry) -> bool,
) -> (Vec<LogEntry>, usize) {
    let mut entries = Vec::with_capacity(events.len());
    let mut skipped = 0;

    for event in events {
        match normalize_event(event) {
            Ok(entry) if keep(&entry) => entries.push(entry),
            Ok(_) => {}
            Err(reason) => {
                skipped += 1;
                debug!(event_id = ?event.event_id, %reason, "Skipping log event");
            }
        }
    }

    (entries, skipped)
}

/// Aggregate offline JSON input.
///
/// The top level must be an array of documents or event wrappers, or an
/// object with an `events` array (the shape `aws logs filter-log-events`
/// prints). Anything else is rejected as a whole.
pub fn aggregate_json(input: &Value) -> Result<UsageReport> {
    let items = match input {
        Value::Array(items) => items,
        Value::Object(object) => object
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::invalid_input("expected an array or an object with \"events\""))?,
        _ => return Err(Error::invalid_input("expected an array of log events")),
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for (index, item) in items.iter().enumerate() {
        match normalize_value(item) {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                skipped += 1;
                debug!(index, %reason, "Skipping log event");
            }
        }
    }

    Ok(summarize(entries, skipped))
}

/// Build all three tables from already-normalized entries
pub fn summarize(entries: Vec<LogEntry>, skipped: usize) -> UsageReport {
    if skipped > 0 {
        warn!(
            skipped,
            parsed = entries.len(),
            "Some log events could not be normalized"
        );
    }

    let by_model = group(&entries, GroupBy::Model);
    let by_user = group(&entries, GroupBy::User);
    let by_day = group(&entries, GroupBy::Day);
    let totals = totals(&entries);

    UsageReport {
        by_model,
        by_user,
        by_day,
        entries,
        skipped,
        totals,
    }
}

/// Grouping key of an entry for one dimension
pub fn group_key(entry: &LogEntry, group_by: GroupBy) -> String {
    match group_by {
        GroupBy::Model => entry
            .model_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
        GroupBy::User => entry
            .user_identity
            .clone()
            .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
        GroupBy::Day => entry.day(),
    }
}

/// Build one table, sorted by total tokens descending then key ascending
pub fn group(entries: &[LogEntry], group_by: GroupBy) -> Vec<AggregateRow> {
    let mut buckets: HashMap<String, Bucket> = HashMap::new();

    for entry in entries {
        buckets
            .entry(group_key(entry, group_by))
            .or_default()
            .add(entry);
    }

    let mut rows: Vec<AggregateRow> = buckets
        .into_iter()
        .map(|(key, bucket)| bucket.into_row(key, group_by.lists_models()))
        .collect();

    rows.sort_by(|a, b| {
        b.total_tokens
            .cmp(&a.total_tokens)
            .then_with(|| a.key.cmp(&b.key))
    });

    rows
}

fn totals(entries: &[LogEntry]) -> UsageTotals {
    let mut bucket = Bucket::default();
    for entry in entries {
        bucket.add(entry);
    }

    UsageTotals {
        invocation_count: bucket.count,
        input_tokens: bucket.input_tokens,
        output_tokens: bucket.output_tokens,
        total_tokens: bucket.total_tokens,
        avg_latency_ms: round2(mean(bucket.latency_sum, bucket.latency_count)),
    }
}

#[derive(Debug, Default)]
struct Bucket {
    count: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    latency_sum: u64,
    latency_count: u64,
    models: BTreeSet<String>,
}

impl Bucket {
    fn add(&mut self, entry: &LogEntry) {
        // sums pin at u64::MAX rather than wrap
        self.count += 1;
        self.input_tokens = self.input_tokens.saturating_add(entry.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(entry.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(entry.total_tokens);
        if let Some(latency) = entry.latency_ms {
            self.latency_sum = self.latency_sum.saturating_add(latency);
            self.latency_count += 1;
        }
        self.models.insert(
            entry
                .model_id
                .clone()
                .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
        );
    }

    fn into_row(self, key: String, with_models: bool) -> AggregateRow {
        AggregateRow {
            key,
            invocation_count: self.count,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            avg_input_tokens: round2(mean(self.input_tokens, self.count)),
            avg_output_tokens: round2(mean(self.output_tokens, self.count)),
            avg_total_tokens: round2(mean(self.total_tokens, self.count)),
            avg_latency_ms: round2(mean(self.latency_sum, self.latency_count)),
            models: if with_models {
                self.models.into_iter().collect()
            } else {
                Vec::new()
            },
        }
    }
}

/// `sum / count`, defined as 0 for an empty bucket
#[allow(clippy::cast_precision_loss)]
fn mean(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, day, hour, 0, 0).unwrap()
    }

    fn entry(model: Option<&str>, user: Option<&str>, input: u64, output: u64) -> LogEntry {
        LogEntry::new(
            ts(1, 12),
            model.map(str::to_string),
            user.map(str::to_string),
            input,
            output,
        )
    }

    fn scenario() -> Vec<LogEntry> {
        vec![
            entry(Some("nova-lite"), Some("alice"), 4, 38),
            entry(Some("nova-lite"), Some("bob"), 10, 20),
            entry(Some("titan"), Some("alice"), 5, 5),
        ]
    }

    #[test]
    fn test_model_table_scenario() {
        let rows = group(&scenario(), GroupBy::Model);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "nova-lite");
        assert_eq!(rows[0].invocation_count, 2);
        assert_eq!(rows[0].total_tokens, 72);
        assert_eq!(rows[0].avg_total_tokens, 36.0);
        assert_eq!(rows[1].key, "titan");
        assert_eq!(rows[1].invocation_count, 1);
        assert_eq!(rows[1].total_tokens, 10);
        assert!(rows[0].models.is_empty());
    }

    #[test]
    fn test_user_table_lists_models() {
        let rows = group(&scenario(), GroupBy::User);

        assert_eq!(rows[0].key, "alice");
        assert_eq!(rows[0].total_tokens, 52);
        assert_eq!(rows[0].models, vec!["nova-lite", "titan"]);
        assert_eq!(rows[1].key, "bob");
        assert_eq!(rows[1].models, vec!["nova-lite"]);
    }

    #[test]
    fn test_missing_user_bucketed_as_unknown() {
        let mut entries = scenario();
        entries.push(entry(Some("titan"), None, 1, 1));

        let report = summarize(entries, 0);

        let unknown = report
            .by_user
            .iter()
            .find(|r| r.key == UNKNOWN_KEY)
            .expect("unknown bucket");
        assert_eq!(unknown.invocation_count, 1);
        assert_eq!(unknown.total_tokens, 2);

        let titan = report.by_model.iter().find(|r| r.key == "titan").unwrap();
        assert_eq!(titan.invocation_count, 2);
        assert_eq!(report.by_day[0].invocation_count, 4);
    }

    #[test]
    fn test_ties_broken_by_key() {
        let entries = vec![
            entry(Some("zeta"), None, 5, 5),
            entry(Some("alpha"), None, 3, 7),
            entry(Some("mid"), None, 20, 0),
        ];
        let keys: Vec<_> = group(&entries, GroupBy::Model)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["mid", "alpha", "zeta"]);
    }

    #[test]
    fn test_days_use_utc_calendar() {
        let mut late = entry(Some("titan"), None, 1, 1);
        late.timestamp = Utc.with_ymd_and_hms(2025, 4, 1, 23, 59, 59).unwrap();
        let mut early = entry(Some("titan"), None, 2, 2);
        early.timestamp = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();

        let rows = group(&[late, early], GroupBy::Day);
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2025-04-02", "2025-04-01"]);
    }

    #[test]
    fn test_average_latency_ignores_unreported() {
        let mut a = entry(Some("titan"), None, 1, 1);
        a.latency_ms = Some(100);
        let mut b = entry(Some("titan"), None, 1, 1);
        b.latency_ms = Some(201);
        let c = entry(Some("titan"), None, 1, 1);

        let rows = group(&[a, b, c], GroupBy::Model);
        assert_eq!(rows[0].avg_latency_ms, 150.5);

        let rows = group(&[entry(Some("titan"), None, 1, 1)], GroupBy::Model);
        assert_eq!(rows[0].avg_latency_ms, 0.0);
    }

    #[test]
    fn test_empty_input_gives_empty_tables() {
        let report = aggregate_events(&[]);
        assert!(report.by_model.is_empty());
        assert!(report.by_user.is_empty());
        assert!(report.by_day.is_empty());
        assert_eq!(report.totals, UsageTotals::default());
    }

    #[test]
    fn test_malformed_events_are_counted() {
        let good = json!({
            "timestamp": "2025-04-01T10:00:00Z",
            "modelId": "titan",
            "input": {"inputTokenCount": 5},
            "output": {"outputTokenCount": 5}
        });
        let events = vec![
            RawLogEvent::new(0, good.to_string()),
            RawLogEvent::new(0, "not json"),
            RawLogEvent::new(0, json!({"modelId": "titan"}).to_string()),
        ];

        let report = aggregate_events(&events);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.totals.total_tokens, 10);
    }

    #[test]
    fn test_sums_saturate_instead_of_overflowing() {
        let doc = |input: u64| {
            let body = json!({
                "timestamp": "2025-04-01T10:00:00Z",
                "modelId": "titan",
                "input": {"inputTokenCount": input},
                "output": {"outputTokenCount": 0}
            });
            RawLogEvent::new(0, body.to_string())
        };

        let report = aggregate_events(&[doc(u64::MAX - 1), doc(5)]);

        assert_eq!(report.skipped, 0);
        assert_eq!(report.totals.invocation_count, 2);
        assert_eq!(report.totals.total_tokens, u64::MAX);
        assert_eq!(report.by_model[0].input_tokens, u64::MAX);
        assert_eq!(report.by_user[0].total_tokens, u64::MAX);
        assert_eq!(report.by_day[0].total_tokens, u64::MAX);
    }

    #[test]
    fn test_window_uses_document_timestamp() {
        let doc = |timestamp: &str| {
            let body = json!({
                "timestamp": timestamp,
                "modelId": "titan",
                "input": {"inputTokenCount": 1},
                "output": {"outputTokenCount": 1}
            });
            RawLogEvent::new(ts(2, 0).timestamp_millis(), body.to_string())
        };
        let events = vec![
            doc("2025-04-01T23:59:00Z"),
            doc("2025-04-02T06:00:00Z"),
            doc("2025-04-03T00:00:00Z"),
            RawLogEvent::new(0, "not json"),
        ];
        let query = UsageQuery::new(ts(2, 0), ts(3, 0), None).unwrap();

        let report = aggregate_window(&events, &query);

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.skipped, 1);
        let days: Vec<_> = report.by_day.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(days, vec!["2025-04-02", "2025-04-03"]);
    }

    #[test]
    fn test_aggregate_json_shapes() {
        let doc = json!({
            "timestamp": "2025-04-01T10:00:00Z",
            "input": {"inputTokenCount": 1},
            "output": {"outputTokenCount": 2}
        });

        let from_array = aggregate_json(&json!([doc.clone(), 42])).unwrap();
        assert_eq!(from_array.entries.len(), 1);
        assert_eq!(from_array.skipped, 1);

        let from_cli = aggregate_json(&json!({
            "events": [{ "timestamp": 1_743_501_600_000_i64, "message": doc.to_string() }],
            "searchedLogStreams": []
        }))
        .unwrap();
        assert_eq!(from_cli.entries.len(), 1);
    }

    #[test]
    fn test_aggregate_json_rejects_non_iterable() {
        assert!(matches!(
            aggregate_json(&json!("nope")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            aggregate_json(&json!({"items": []})),
            Err(Error::InvalidInput(_))
        ));
    }

    fn arb_entry() -> impl Strategy<Value = LogEntry> {
        (
            proptest::option::of(prop::sample::select(vec!["nova-lite", "titan", "claude"])),
            proptest::option::of(prop::sample::select(vec!["alice", "bob"])),
            1u32..28,
            0u64..100_000,
            0u64..100_000,
        )
            .prop_map(|(model, user, day, input, output)| {
                let mut e = entry(model, user, input, output);
                e.timestamp = ts(day, 8);
                e
            })
    }

    proptest! {
        #[test]
        fn prop_grouping_preserves_totals(entries in prop::collection::vec(arb_entry(), 0..64)) {
            let expected: u64 = entries.iter().map(|e| e.total_tokens).sum();
            let count = entries.len() as u64;
            let report = summarize(entries, 0);

            for group_by in GroupBy::ALL {
                let table = report.table(group_by);
                prop_assert_eq!(table.iter().map(|r| r.total_tokens).sum::<u64>(), expected);
                prop_assert_eq!(table.iter().map(|r| r.invocation_count).sum::<u64>(), count);
            }
            prop_assert_eq!(report.totals.total_tokens, expected);
        }

        #[test]
        fn prop_normalized_total_is_input_plus_output(input in 0u64..10_000_000, output in 0u64..10_000_000) {
            let doc = json!({
                "timestamp": "2025-04-01T10:00:00Z",
                "input": {"inputTokenCount": input},
                "output": {"outputTokenCount": output}
            });
            let entry = normalize_document(&doc, None).unwrap();
            prop_assert_eq!(entry.total_tokens, entry.input_tokens + entry.output_tokens);
            prop_assert_eq!(entry.total_tokens, input + output);
        }
    }
}
