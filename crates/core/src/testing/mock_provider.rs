//! Mock provider adapter for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::collection::{CanonicalRecord, PageCursor, PageResult};
use crate::provider::{PaginationStyle, ProviderAdapter, ProviderError};

/// A scripted page failure.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: ProviderError,
    /// Failures left before the page succeeds. `None` fails forever.
    remaining: Option<u32>,
}

/// Mock implementation of the ProviderAdapter trait over a fixed set of pages.
///
/// In cursor mode `Offset(n)` and `Token("n")` both select page `n` and the
/// next cursor is `Token("n+1")`. In offset mode cursors are record offsets
/// and the adapter reports `PaginationStyle::Offset`, so the orchestrator may
/// shard it.
///
/// # Example
///
/// ```rust,ignore
/// use harvester_core::testing::{fixtures, MockProviderAdapter};
///
/// let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(3, 2));
/// adapter.fail_page(1, ProviderError::Protocol("bad shape".into())).await;
/// ```
#[derive(Clone)]
pub struct MockProviderAdapter {
    pages: Arc<Vec<Vec<CanonicalRecord>>>,
    /// Records per page in offset mode; `None` means cursor mode.
    page_size: Option<u64>,
    failures: Arc<RwLock<HashMap<usize, ScriptedFailure>>>,
    requested: Arc<RwLock<Vec<PageCursor>>>,
    /// Cancel this token once the given number of pages were served.
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockProviderAdapter {
    /// Cursor-paginated adapter.
    pub fn with_pages(pages: Vec<Vec<CanonicalRecord>>) -> Self {
        Self {
            pages: Arc::new(pages),
            page_size: None,
            failures: Arc::new(RwLock::new(HashMap::new())),
            requested: Arc::new(RwLock::new(Vec::new())),
            cancel_after: None,
        }
    }

    /// Offset-paginated adapter. Every page but the last must hold the same
    /// number of records.
    pub fn with_offset_pages(pages: Vec<Vec<CanonicalRecord>>) -> Self {
        let page_size = pages.first().map(|p| p.len() as u64).unwrap_or(1).max(1);
        Self {
            page_size: Some(page_size),
            ..Self::with_pages(pages)
        }
    }

    /// Cancel `token` after `pages` pages have been served.
    pub fn with_cancel_after(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((pages, token));
        self
    }

    /// Fail every fetch of page `index`.
    pub async fn fail_page(&self, index: usize, error: ProviderError) {
        self.failures.write().await.insert(
            index,
            ScriptedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the first `times` fetches of page `index`.
    pub async fn fail_page_times(&self, index: usize, error: ProviderError, times: u32) {
        self.failures.write().await.insert(
            index,
            ScriptedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Every cursor passed to `fetch_page`, in call order.
    pub async fn requested_cursors(&self) -> Vec<PageCursor> {
        self.requested.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.requested.read().await.len()
    }

    fn total(&self) -> u64 {
        self.pages.iter().map(|p| p.len() as u64).sum()
    }

    fn page_index(&self, cursor: &PageCursor) -> Result<usize, ProviderError> {
        match (self.page_size, cursor) {
            (Some(size), PageCursor::Offset(offset)) => Ok((offset / size) as usize),
            (Some(_), PageCursor::Token(t)) => Err(ProviderError::InvalidCursor(t.clone())),
            (None, PageCursor::Offset(n)) => Ok(*n as usize),
            (None, PageCursor::Token(t)) => t
                .parse()
                .map_err(|_| ProviderError::InvalidCursor(t.clone())),
        }
    }

    fn next_cursor(&self, index: usize) -> Option<PageCursor> {
        match self.page_size {
            Some(size) => {
                let next = (index as u64 + 1) * size;
                (next < self.total()).then_some(PageCursor::Offset(next))
            }
            None => (index + 1 < self.pages.len())
                .then(|| PageCursor::Token((index + 1).to_string())),
        }
    }

    async fn scripted_failure(&self, index: usize) -> Option<ProviderError> {
        let mut failures = self.failures.write().await;
        let failure = failures.get_mut(&index)?;
        match failure.remaining.as_mut() {
            None => Some(failure.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(failure.error.clone())
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn pagination(&self) -> PaginationStyle {
        match self.page_size {
            Some(page_size) => PaginationStyle::Offset {
                page_size,
                total: self.total(),
            },
            None => PaginationStyle::Cursor,
        }
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<PageResult, ProviderError> {
        let served = {
            let mut requested = self.requested.write().await;
            requested.push(cursor.clone());
            requested.len()
        };

        let index = self.page_index(cursor)?;
        if let Some(error) = self.scripted_failure(index).await {
            return Err(error);
        }

        let result = match self.pages.get(index) {
            Some(records) => PageResult {
                records: records.clone(),
                next_cursor: self.next_cursor(index),
                skipped: 0,
            },
            None => PageResult::default(),
        };

        if let Some((after, token)) = &self.cancel_after {
            if served >= *after {
                token.cancel();
            }
        }

        Ok(result)
    }
}
