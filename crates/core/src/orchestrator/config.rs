//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for ingestion runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Continue from `.progress.json` when it belongs to the same collection.
    /// A finished progress file is ignored and the run starts over.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Write `.progress.json` after every drained page.
    #[serde(default = "default_true")]
    pub persist_progress: bool,

    /// Ask the provider for the collection's name, supply, first token id
    /// and media format before the run.
    #[serde(default)]
    pub discover: bool,

    /// Only fetch the tokens whose media or metadata file is missing.
    #[serde(default)]
    pub fill_gaps: bool,
}

fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            resume: true,
            persist_progress: true,
            discover: false,
            fill_gaps: false,
        }
    }
}

impl IngestConfig {
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_persist_progress(mut self, persist: bool) -> Self {
        self.persist_progress = persist;
        self
    }
}
