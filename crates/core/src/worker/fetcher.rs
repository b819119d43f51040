//! Fetch worker implementation.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::types::{MediaOutcome, MetadataOutcome, MetadataSource, RecordOutcome};
use crate::collection::CanonicalRecord;
use crate::metrics;
use crate::resolver::SourceResolver;
use crate::sink::FsSink;

/// Persists one record's metadata and media.
pub struct FetchWorker {
    resolver: Arc<dyn SourceResolver>,
    sink: Arc<FsSink>,
}

impl FetchWorker {
    pub fn new(resolver: Arc<dyn SourceResolver>, sink: Arc<FsSink>) -> Self {
        Self { resolver, sink }
    }

    /// Process a record. Never fails; problems become outcomes.
    pub async fn process(&self, record: &CanonicalRecord) -> RecordOutcome {
        let metadata = self.persist_metadata(record).await;
        let media = self.persist_media(record).await;

        metrics::MEDIA_OUTCOMES.with_label_values(&[media.label()]).inc();
        metrics::METADATA_OUTCOMES
            .with_label_values(&[metadata.label()])
            .inc();

        RecordOutcome {
            id: record.id.clone(),
            media,
            metadata,
        }
    }

    /// Inline metadata wins; the URI is fetched only when nothing is inline.
    async fn persist_metadata(&self, record: &CanonicalRecord) -> MetadataOutcome {
        if self.sink.has_metadata(&record.id).await {
            return MetadataOutcome::AlreadyPresent;
        }

        if let Some(inline) = &record.metadata_inline {
            return match self.sink.write_metadata(&record.id, inline).await {
                Ok(_) => MetadataOutcome::Written {
                    source: MetadataSource::Inline,
                },
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Failed to write metadata");
                    MetadataOutcome::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
        }

        let Some(uri) = &record.metadata_uri else {
            return MetadataOutcome::NoSource;
        };

        let resolved = match self.resolver.resolve(uri).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(id = %record.id, uri = %uri, error = %e, "Metadata unavailable");
                return MetadataOutcome::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let document: serde_json::Value = match serde_json::from_slice(&resolved.bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(id = %record.id, uri = %uri, error = %e, "Metadata is not JSON");
                return MetadataOutcome::Unavailable {
                    reason: format!("invalid JSON from {}: {}", resolved.fetched_from, e),
                };
            }
        };

        match self.sink.write_metadata(&record.id, &document).await {
            Ok(_) => MetadataOutcome::Written {
                source: MetadataSource::Remote,
            },
            Err(e) => MetadataOutcome::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    /// Try each source once, in order, stopping at the first success.
    async fn persist_media(&self, record: &CanonicalRecord) -> MediaOutcome {
        if self.sink.has_media(&record.id, &record.media_format).await {
            return MediaOutcome::AlreadyPresent;
        }

        let mut attempted = 0;
        let mut last_error = None;

        for (index, uri) in record.media_sources.iter().enumerate() {
            attempted += 1;
            let resolved = match self.resolver.resolve(uri).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!(id = %record.id, source = index, error = %e, "Media source failed");
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let sha256 = format!("{:x}", Sha256::digest(&resolved.bytes));
            match self
                .sink
                .write_media(&record.id, &record.media_format, &resolved.bytes)
                .await
            {
                Ok(_) => {
                    return MediaOutcome::Written {
                        source_index: index,
                        uri: uri.to_string(),
                        bytes: resolved.bytes.len() as u64,
                        sha256,
                    }
                }
                Err(e) => {
                    // Disk errors will not improve with another source.
                    warn!(id = %record.id, error = %e, "Failed to write media");
                    return MediaOutcome::Unavailable {
                        attempted,
                        last_error: Some(e.to_string()),
                    };
                }
            }
        }

        warn!(id = %record.id, attempted, "Media unavailable");
        MediaOutcome::Unavailable {
            attempted,
            last_error,
        }
    }
}
