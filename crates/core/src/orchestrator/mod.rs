//! Ingestion orchestrator.
//!
//! Drives one collection run through its phases:
//!
//! ```text
//! Idle -> Paging -> Draining -> Paging ... -> Completed
//!                                          -> Failed
//!                                          -> Cancelled
//! ```
//!
//! - **Paging**: one page in flight per shard, under the central retry policy
//! - **Draining**: the page's records go through a bounded worker pool; the
//!   cursor is committed only once every record has an outcome
//!
//! Cursor providers always run as a single shard. Offset providers with a
//! known total can be split across `page_workers` shards.

mod config;
mod handle;
mod runner;
mod shard;
mod types;

pub use config::IngestConfig;
pub use handle::RunHandle;
pub use runner::IngestionOrchestrator;
pub use shard::plan_shards;
pub use types::{FailureClass, OrchestratorError, ProgressSnapshot, RunFailure, RunPhase, RunReport};
