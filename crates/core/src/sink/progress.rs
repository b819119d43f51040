//! Persisted run progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::{PageCursor, ProviderKind};

/// Progress of one page worker's slice of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardProgress {
    /// Where this shard began.
    pub start: PageCursor,
    /// Exclusive offset bound. `None` means run until the provider stops.
    pub end: Option<u64>,
    /// Next cursor to request. Only moves after a page is fully drained.
    pub cursor: PageCursor,
    pub done: bool,
}

impl ShardProgress {
    pub fn new(start: PageCursor, end: Option<u64>) -> Self {
        Self {
            cursor: start.clone(),
            start,
            end,
            done: false,
        }
    }
}

/// Resumable state of a collection run, written after every drained page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub contract: String,
    pub provider: ProviderKind,
    pub shards: Vec<ShardProgress>,
    #[serde(default)]
    pub records_fetched: u64,
    #[serde(default)]
    pub media_failures: u64,
    #[serde(default)]
    pub metadata_failures: u64,
    #[serde(default)]
    pub failed_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl RunProgress {
    pub fn new(contract: impl Into<String>, provider: ProviderKind, shards: Vec<ShardProgress>) -> Self {
        Self {
            contract: contract.into(),
            provider,
            shards,
            records_fetched: 0,
            media_failures: 0,
            metadata_failures: 0,
            failed_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether this progress was written by a run over the same catalog.
    pub fn matches(&self, contract: &str, provider: ProviderKind) -> bool {
        self.contract.eq_ignore_ascii_case(contract) && self.provider == provider
    }

    pub fn is_complete(&self) -> bool {
        self.shards.iter().all(|s| s.done)
    }

    /// Record a failed id once.
    pub fn record_failure(&mut self, id: &str) {
        if !self.failed_ids.iter().any(|f| f == id) {
            self.failed_ids.push(id.to_string());
        }
    }
}
