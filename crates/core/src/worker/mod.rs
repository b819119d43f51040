//! Per-record fetch worker.
//!
//! Persists a record's metadata and media, trying media sources in order.
//! Every failure is folded into a [`RecordOutcome`]; nothing escapes.

mod fetcher;
mod types;

pub use fetcher::FetchWorker;
pub use types::{MediaOutcome, MetadataOutcome, MetadataSource, RecordOutcome};
