//! Log retriever - paginated, retried reads from the log store
//!
//! The retriever walks continuation tokens until the store reports no more
//! pages, retrying transient faults with exponential backoff. The store
//! itself sits behind the [`LogStore`] trait so the retriever can be driven
//! by CloudWatch in production and by in-memory stores in tests.

mod cloudwatch;
mod memory;

pub use cloudwatch::CloudWatchLogStore;
pub use memory::{MemoryLogStore, ScriptedLogStore};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{Result, RetrievalError};
use crate::models::{RawLogEvent, UsageQuery};

/// One request for a page of events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Inclusive window start, epoch milliseconds
    pub start_ms: i64,
    /// Inclusive window end, epoch milliseconds
    pub end_ms: i64,
    /// Store-side filter pattern
    pub filter_pattern: Option<String>,
    /// Continuation token from the previous page
    pub next_token: Option<String>,
}

impl PageRequest {
    /// First page request for a query
    pub fn first(query: &UsageQuery) -> Self {
        Self {
            start_ms: query.start_ms(),
            end_ms: query.end_ms(),
            filter_pattern: query.filter().map(str::to_string),
            next_token: None,
        }
    }
}

/// One page of events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    /// Events on this page
    pub events: Vec<RawLogEvent>,
    /// Token for the next page; `None` marks the last page
    pub next_token: Option<String>,
}

/// A remote store of invocation log events
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// Fetch a single page
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<LogPage, RetrievalError>;
}

#[async_trait::async_trait]
impl<S: LogStore + ?Sized> LogStore for Arc<S> {
    async fn fetch_page(&self, request: &PageRequest) -> std::result::Result<LogPage, RetrievalError> {
        (**self).fetch_page(request).await
    }
}

/// Reads every event in a window from a [`LogStore`]
pub struct LogRetriever<S> {
    store: S,
    retry: RetryConfig,
}

impl<S: LogStore> LogRetriever<S> {
    /// Create a retriever over `store` with the given retry policy
    pub fn new(store: S, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Fetch all events in the query window, following every page.
    ///
    /// Events are returned in page order, deduplicated by event id, and
    /// restricted to the inclusive window.
    pub async fn fetch(&self, query: &UsageQuery) -> Result<Vec<RawLogEvent>> {
        query.validate()?;

        if query.is_empty() {
            debug!("Empty window, skipping retrieval");
            return Ok(Vec::new());
        }

        let mut request = PageRequest::first(query);
        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut tokens = HashSet::new();
        let mut pages = 0usize;
        let mut dropped = 0usize;

        loop {
            let page = self.fetch_page_with_retry(&request).await?;
            pages += 1;


            for event in page.events {
                if !(request.start_ms..=request.end_ms).contains(&event.timestamp_ms) {
                    dropped += 1;
                    continue;
                }
                if let Some(id) = &event.event_id {
                    if !seen.insert(id.clone()) {
                        dropped += 1;
                        continue;
                    }
                }
                events.push(event);
            }

            match page.next_token {
                // a token seen before means the store is cycling
                Some(token) if !tokens.insert(token.clone()) => {
                    return Err(RetrievalError::MalformedPage(format!(
                        "continuation token {token:?} was already followed"
                    ))
                    .into());
                }
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }

        info!(
            pages,
            events = events.len(),
            dropped,
            "Retrieved invocation log events"
        );

        Ok(events)
    }

    async fn fetch_page_with_retry(
        &self,
        request: &PageRequest,
    ) -> std::result::Result<LogPage, RetrievalError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_backoff)
            .with_multiplier(self.retry.multiplier)
            .with_max_interval(self.retry.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.retry.max_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let store = &self.store;

        retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

            match store.fetch_page(request).await {
                Ok(page) => Ok(page),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "Transient log store fault, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) if e.is_transient() => Err(backoff::Error::permanent(
                    RetrievalError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    },
                )),
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}
