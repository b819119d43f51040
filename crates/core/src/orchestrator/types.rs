//! Types for the ingestion orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::PageCursor;
use crate::provider::ProviderError;
use crate::sink::SinkError;

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Page fetch failed fatally or ran out of retries.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Output directory or progress file could not be written.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl OrchestratorError {
    pub fn class(&self) -> FailureClass {
        match self {
            OrchestratorError::Provider(e) => match e {
                ProviderError::RateLimited { .. } => FailureClass::RateLimited,
                ProviderError::Transient(_) => FailureClass::TransientNetwork,
                ProviderError::Protocol(_)
                | ProviderError::Api { .. }
                | ProviderError::InvalidCursor(_) => FailureClass::Protocol,
                ProviderError::NotConfigured(_) => FailureClass::Configuration,
            },
            OrchestratorError::Sink(_) => FailureClass::Io,
        }
    }
}

/// Phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Paging,
    Draining,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Paging => "paging",
            RunPhase::Draining => "draining",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    RateLimited,
    TransientNetwork,
    Protocol,
    Configuration,
    Io,
}

/// The error that ended a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub class: FailureClass,
    pub message: String,
}

impl From<&OrchestratorError> for RunFailure {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Live counters published while a run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: RunPhase,
    pub pages: u64,
    pub records_processed: u64,
    pub media_failures: u64,
    pub metadata_failures: u64,
}

/// Terminal report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RunPhase,
    pub collection: String,
    pub provider: String,
    pub records_processed: u64,
    /// Provider items dropped as malformed.
    pub records_skipped: u64,
    pub media_written: u64,
    pub media_already_present: u64,
    pub media_failures: u64,
    pub metadata_failures: u64,
    pub failed_ids: Vec<String>,
    /// Pages fully drained and committed.
    pub pages: u64,
    /// Last cursor requested from the provider.
    pub final_cursor: Option<PageCursor>,
    /// Where a new run should restart. `None` once every shard is done.
    pub last_committed_cursor: Option<PageCursor>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(collection: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            state: RunPhase::Idle,
            collection: collection.into(),
            provider: provider.into(),
            records_processed: 0,
            records_skipped: 0,
            media_written: 0,
            media_already_present: 0,
            media_failures: 0,
            metadata_failures: 0,
            failed_ids: Vec::new(),
            pages: 0,
            final_cursor: None,
            last_committed_cursor: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunPhase::Completed
    }

    pub fn snapshot(&self, phase: RunPhase) -> ProgressSnapshot {
        ProgressSnapshot {
            phase,
            pages: self.pages,
            records_processed: self.records_processed,
            media_failures: self.media_failures,
            metadata_failures: self.metadata_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let err = OrchestratorError::from(ProviderError::Protocol("bad".into()));
        assert_eq!(err.class(), FailureClass::Protocol);

        let err = OrchestratorError::from(ProviderError::RateLimited {
            retry_after_ms: None,
        });
        assert_eq!(err.class(), FailureClass::RateLimited);

        let err = OrchestratorError::from(ProviderError::Api {
            status: 401,
            message: "bad key".into(),
        });
        let failure = RunFailure::from(&err);
        assert_eq!(failure.class, FailureClass::Protocol);
        assert!(failure.message.contains("401"));
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&RunPhase::Completed).unwrap(),
            "\"completed\""
        );
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::Draining.is_terminal());
    }

    #[test]
    fn test_report_serialization() {
        let mut report = RunReport::new("Test", "mock");
        report.state = RunPhase::Failed;
        report.last_committed_cursor = Some(PageCursor::Token("abc".into()));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["last_committed_cursor"], "abc");
        assert!(!report.is_success());
    }
}
