//! Usage pipeline
//!
//! Validates the query, retrieves every event in the window, then
//! aggregates. Each call runs to completion on its own; nothing is cached
//! between calls.

use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::aggregator;
use crate::config::Config;
use crate::error::Result;
use crate::models::{GroupBy, LogsResponse, UsageParams, UsageQuery, UsageReport, UsageResponse};
use crate::retriever::{CloudWatchLogStore, LogRetriever, LogStore};

/// Retrieval followed by aggregation
pub struct UsagePipeline<S> {
    retriever: LogRetriever<S>,
    default_days: u32,
}

impl UsagePipeline<CloudWatchLogStore> {
    /// Pipeline over the configured CloudWatch log group
    pub async fn from_config(config: &Config) -> Self {
        let store = CloudWatchLogStore::from_config(config).await;
        Self::new(store, config)
    }
}

impl<S: LogStore> UsagePipeline<S> {
    /// Create a pipeline over any log store
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            retriever: LogRetriever::new(store, config.retry.clone()),
            default_days: config.logs.default_days,
        }
    }

    /// Look-back used when a caller gives no window
    pub fn default_days(&self) -> u32 {
        self.default_days
    }

    /// Resolve caller arguments into a window ending now
    pub fn resolve(&self, params: UsageParams) -> Result<UsageQuery> {
        params.into_query(self.default_days, Utc::now())
    }

    /// Retrieve and aggregate everything in the window
    pub async fn report(&self, query: &UsageQuery) -> Result<UsageReport> {
        query.validate()?;
        let started = Instant::now();

        let events = self.retriever.fetch(query).await?;
        let report = aggregator::aggregate_window(&events, query);

        info!(
            start = %query.start_time,
            end = %query.end_time,
            events = events.len(),
            entries = report.entries.len(),
            skipped = report.skipped,
            elapsed_ms = started.elapsed().as_millis(),
            "Usage report built"
        );

        Ok(report)
    }

    /// Normalized invocation rows
    pub async fn get_raw_logs(&self, query: &UsageQuery) -> Result<LogsResponse> {
        let report = self.report(query).await?;

        Ok(LogsResponse {
            query: query.clone(),
            count: report.entries.len(),
            skipped: report.skipped,
            entries: report.entries,
        })
    }

    /// One aggregate table
    pub async fn get_usage(&self, query: &UsageQuery, group_by: GroupBy) -> Result<UsageResponse> {
        let report = self.report(query).await?;
        let skipped = report.skipped;
        let totals = report.totals.clone();

        Ok(UsageResponse {
            query: query.clone(),
            group_by,
            skipped,
            totals,
            rows: report.into_table(group_by),
        })
    }

    /// Usage grouped by model id
    pub async fn get_usage_by_model(&self, query: &UsageQuery) -> Result<UsageResponse> {
        self.get_usage(query, GroupBy::Model).await
    }

    /// Usage grouped by caller identity
    pub async fn get_usage_by_user(&self, query: &UsageQuery) -> Result<UsageResponse> {
        self.get_usage(query, GroupBy::User).await
    }

    /// Usage grouped by UTC day
    pub async fn get_usage_by_day(&self, query: &UsageQuery) -> Result<UsageResponse> {
        self.get_usage(query, GroupBy::Day).await
    }
}
