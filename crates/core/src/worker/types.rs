//! Worker outcome types.

use serde::{Deserialize, Serialize};

/// Where written metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    Inline,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetadataOutcome {
    /// Destination already exists and is non-empty.
    AlreadyPresent,
    Written { source: MetadataSource },
    Unavailable { reason: String },
    /// Neither inline metadata nor a metadata URI. Not a failure.
    NoSource,
}

impl MetadataOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MetadataOutcome::Unavailable { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetadataOutcome::AlreadyPresent => "already_present",
            MetadataOutcome::Written {
                source: MetadataSource::Inline,
            } => "inline",
            MetadataOutcome::Written {
                source: MetadataSource::Remote,
            } => "remote",
            MetadataOutcome::Unavailable { .. } => "unavailable",
            MetadataOutcome::NoSource => "no_source",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaOutcome {
    /// Destination already exists and is non-empty; no network calls made.
    AlreadyPresent,
    Written {
        /// Index into the record's media sources.
        source_index: usize,
        uri: String,
        bytes: u64,
        /// Hex SHA-256 of the written bytes.
        sha256: String,
    },
    /// Every source failed, or there were none.
    Unavailable {
        attempted: usize,
        last_error: Option<String>,
    },
}

impl MediaOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MediaOutcome::Unavailable { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaOutcome::AlreadyPresent => "already_present",
            MediaOutcome::Written { .. } => "written",
            MediaOutcome::Unavailable { .. } => "unavailable",
        }
    }
}

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub id: String,
    pub media: MediaOutcome,
    pub metadata: MetadataOutcome,
}

impl RecordOutcome {
    pub fn is_failure(&self) -> bool {
        self.media.is_failure() || self.metadata.is_failure()
    }
}
