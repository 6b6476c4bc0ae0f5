//! In-memory log stores
//!
//! [`MemoryLogStore`] serves a fixed set of events (e.g. an exported log
//! dump) with real pagination. [`ScriptedLogStore`] replays a queue of
//! canned responses and records every request, for exercising retry and
//! pagination behavior.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{LogPage, LogStore, PageRequest};
use crate::error::RetrievalError;
use crate::models::RawLogEvent;

/// Serves a fixed event list in pages of `page_size`
#[derive(Debug, Clone)]
pub struct MemoryLogStore {
    events: Vec<RawLogEvent>,
    page_size: usize,
}

impl MemoryLogStore {
    /// Create a store over `events`
    pub fn new(events: Vec<RawLogEvent>) -> Self {
        Self {
            events,
            page_size: 100,
        }
    }

    /// Override the page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryLogStore {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, RetrievalError> {
        let offset = match &request.next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RetrievalError::InvalidRequest(format!("bad token {token:?}")))?,
            None => 0,
        };

        // plain substring match stands in for CloudWatch filter patterns
        let matching: Vec<&RawLogEvent> = self
            .events
            .iter()
            .filter(|e| (request.start_ms..=request.end_ms).contains(&e.timestamp_ms))
            .filter(|e| {
                request
                    .filter_pattern
                    .as_deref()
                    .map_or(true, |f| e.message.contains(f))
            })
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let events = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|e| (*e).clone())
            .collect();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(LogPage { events, next_token })
    }
}

/// Replays canned responses in order and records each request
#[derive(Debug, Default)]
pub struct ScriptedLogStore {
    responses: Mutex<VecDeque<Result<LogPage, RetrievalError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedLogStore {
    /// Create a store that answers with `responses`, one per call
    pub fn new(responses: Vec<Result<LogPage, RetrievalError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LogStore for ScriptedLogStore {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, RetrievalError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(RetrievalError::Unavailable(
                "scripted store has no more responses".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(token: Option<&str>) -> PageRequest {
        PageRequest {
            start_ms: 0,
            end_ms: 1_000,
            filter_pattern: None,
            next_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_memory_store_paginates() {
        let events = (0..5).map(|i| RawLogEvent::new(i * 10, "{}")).collect();
        let store = MemoryLogStore::new(events).with_page_size(2);

        let first = store.fetch_page(&request(None)).await.unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let last = store.fetch_page(&request(Some("4"))).await.unwrap();
        assert_eq!(last.events.len(), 1);
        assert_eq!(last.next_token, None);
    }

    #[tokio::test]
    async fn test_memory_store_applies_window_and_filter() {
        let store = MemoryLogStore::new(vec![
            RawLogEvent::new(10, "titan"),
            RawLogEvent::new(20, "nova"),
            RawLogEvent::new(5_000, "titan"),
        ]);
        let mut req = request(None);
        req.filter_pattern = Some("titan".into());

        let page = store.fetch_page(&req).await.unwrap();
        assert_eq!(page.events, vec![RawLogEvent::new(10, "titan")]);
    }

    #[tokio::test]
    async fn test_scripted_store_records_requests() {
        let store = ScriptedLogStore::new(vec![Ok(LogPage::default())]);
        store.fetch_page(&request(None)).await.unwrap();
        let exhausted = store.fetch_page(&request(Some("x"))).await;

        assert_eq!(store.calls(), 2);
        assert!(matches!(exhausted, Err(RetrievalError::Unavailable(_))));
    }
}
