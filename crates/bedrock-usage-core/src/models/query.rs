//! Query types shared between the MCP layer, the CLI and the pipeline

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated time window plus optional filter pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageQuery {
    /// Inclusive start of the window
    pub start_time: DateTime<Utc>,

    /// Inclusive end of the window
    pub end_time: DateTime<Utc>,

    /// CloudWatch filter pattern; `None` or blank means no filter
    pub filter_pattern: Option<String>,
}

impl UsageQuery {
    /// Create a query, rejecting inverted windows
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        filter_pattern: Option<String>,
    ) -> Result<Self> {
        let query = Self {
            start_time,
            end_time,
            filter_pattern,
        };
        query.validate()?;
        Ok(query)
    }

    /// Set the filter pattern
    #[must_use]
    pub fn with_filter(mut self, filter_pattern: impl Into<String>) -> Self {
        self.filter_pattern = Some(filter_pattern.into());
        self
    }

    /// Reject windows whose end precedes their start
    pub fn validate(&self) -> Result<()> {
        if self.end_time < self.start_time {
            return Err(Error::invalid_query(format!(
                "end time {} is before start time {}",
                self.end_time.to_rfc3339(),
                self.start_time.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// A zero-length window can never contain an event
    pub fn is_empty(&self) -> bool {
        self.start_time == self.end_time
    }

    /// Whether `ts` falls inside the window (both ends inclusive)
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_time && ts <= self.end_time
    }

    /// Filter pattern with blank values treated as absent
    pub fn filter(&self) -> Option<&str> {
        self.filter_pattern
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Window start in epoch milliseconds
    pub fn start_ms(&self) -> i64 {
        self.start_time.timestamp_millis()
    }

    /// Window end in epoch milliseconds
    pub fn end_ms(&self) -> i64 {
        self.end_time.timestamp_millis()
    }
}

/// Window arguments accepted by every tool and CLI command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageParams {
    /// Number of days to look back from now (or from `end_time`)
    pub days: Option<u32>,

    /// Explicit inclusive start (RFC 3339)
    pub start_time: Option<DateTime<Utc>>,

    /// Explicit inclusive end (RFC 3339); defaults to now
    pub end_time: Option<DateTime<Utc>>,

    /// CloudWatch filter pattern
    pub filter_pattern: Option<String>,
}

impl UsageParams {
    /// Resolve the arguments into a concrete window.
    ///
    /// `days` and `start_time` are mutually exclusive. Without either, the
    /// window is the `default_days` days ending at `end_time` (or `now`).
    pub fn into_query(self, default_days: u32, now: DateTime<Utc>) -> Result<UsageQuery> {
        let end = self.end_time.unwrap_or(now);

        let start = match (self.start_time, self.days) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_query(
                    "use either days or start_time, not both",
                ))
            }
            (Some(start), None) => start,
            (None, days) => {
                let days = days.unwrap_or(default_days);
                end.checked_sub_signed(Duration::days(i64::from(days)))
                    .ok_or_else(|| Error::invalid_query(format!("{days} days is out of range")))?
            }
        };

        UsageQuery::new(start, end, self.filter_pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_inverted_window_rejected() {
        let result = UsageQuery::new(at(10), at(9), None);
        assert!(matches!(result, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_empty_window_is_valid() {
        let query = UsageQuery::new(at(10), at(10), None).unwrap();
        assert!(query.is_empty());
        assert!(query.contains(at(10)));
    }

    #[test]
    fn test_window_is_inclusive() {
        let query = UsageQuery::new(at(9), at(11), None).unwrap();
        assert!(query.contains(at(9)));
        assert!(query.contains(at(11)));
        assert!(!query.contains(at(12)));
    }

    #[test]
    fn test_blank_filter_is_none() {
        let query = UsageQuery::new(at(9), at(10), Some("   ".into())).unwrap();
        assert_eq!(query.filter(), None);
        let query = query.with_filter("{ $.modelId = \"titan\" }");
        assert_eq!(query.filter(), Some("{ $.modelId = \"titan\" }"));
    }

    #[test]
    fn test_params_default_days() {
        let now = at(12);
        let query = UsageParams::default().into_query(7, now).unwrap();
        assert_eq!(query.end_time, now);
        assert_eq!(query.start_time, now - Duration::days(7));
    }

    #[test]
    fn test_params_explicit_window() {
        let params = UsageParams {
            start_time: Some(at(1)),
            end_time: Some(at(5)),
            ..Default::default()
        };
        let query = params.into_query(7, at(12)).unwrap();
        assert_eq!(query.start_time, at(1));
        assert_eq!(query.end_time, at(5));
    }

    #[test]
    fn test_params_days_and_start_conflict() {
        let params = UsageParams {
            days: Some(1),
            start_time: Some(at(1)),
            ..Default::default()
        };
        assert!(matches!(
            params.into_query(7, at(12)),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_params_inverted_rejected() {
        let params = UsageParams {
            start_time: Some(at(8)),
            end_time: Some(at(2)),
            ..Default::default()
        };
        assert!(matches!(
            params.into_query(7, at(12)),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_params_deserialize_from_tool_arguments() {
        let params: UsageParams = serde_json::from_value(serde_json::json!({
            "start_time": "2025-06-01T01:00:00Z",
            "filter_pattern": "titan"
        }))
        .unwrap();
        assert_eq!(params.start_time, Some(at(1)));
        assert_eq!(params.filter_pattern.as_deref(), Some("titan"));
    }
}
