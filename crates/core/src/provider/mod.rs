//! Provider adapters: page through a remote catalog and normalize each item
//! into a [`CanonicalRecord`](crate::collection::CanonicalRecord).
//!
//! One implementation per upstream protocol:
//! - [`AlchemyContractAdapter`]: cursor-paginated REST listing
//! - [`AlchemyBatchAdapter`]: offset-paginated batch POST
//! - [`NftScanBatchAdapter`]: offset-paginated batch POST

mod alchemy;
mod client;
mod nftscan;
mod plan;

pub use alchemy::{
    describe_collection, AlchemyBatchAdapter, AlchemyConfig, AlchemyContractAdapter, CollectionInfo,
};
pub use nftscan::{NftScanBatchAdapter, NftScanConfig};
pub use plan::TokenIdPlan;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::collection::{CollectionDescriptor, PageCursor, PageResult, ProviderKind};
use crate::retry::{RetryClass, Retryable};
use crate::throttle::RequestThrottle;

/// Errors that can occur when fetching a page from a provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// HTTP 429 or the provider's equivalent.
    #[error("Rate limited by provider")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Timeout, connection failure, or 5xx.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Unexpected content type or top-level response shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Any other non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Cursor kind the adapter cannot handle.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Missing API key or similar.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl Retryable for ProviderError {
    fn retry_class(&self) -> RetryClass {
        match self {
            ProviderError::Transient(_) => RetryClass::Transient,
            ProviderError::RateLimited { retry_after_ms } => RetryClass::RateLimited {
                retry_after_ms: *retry_after_ms,
            },
            _ => RetryClass::Fatal,
        }
    }
}

/// How an adapter walks its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// Opaque continuation tokens; only one page can be in flight.
    Cursor,
    /// Offsets into a known-size id plan; pages can be fetched independently.
    Offset { page_size: u64, total: u64 },
}

/// Trait for provider adapters.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Returns the adapter name for logging.
    fn name(&self) -> &str;

    fn pagination(&self) -> PaginationStyle;

    /// Fetch and normalize one page. Malformed items are skipped and counted,
    /// never fatal.
    async fn fetch_page(&self, cursor: &PageCursor) -> Result<PageResult, ProviderError>;
}

/// Build the adapter named by the descriptor's `provider` field.
pub fn create_adapter(
    descriptor: &CollectionDescriptor,
    alchemy: &AlchemyConfig,
    nftscan: &NftScanConfig,
    throttle: RequestThrottle,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let adapter: Arc<dyn ProviderAdapter> = match descriptor.provider {
        ProviderKind::AlchemyContract => {
            Arc::new(AlchemyContractAdapter::new(descriptor, alchemy, throttle)?)
        }
        ProviderKind::AlchemyBatch => {
            Arc::new(AlchemyBatchAdapter::new(descriptor, alchemy, throttle)?)
        }
        ProviderKind::NftscanBatch => {
            Arc::new(NftScanBatchAdapter::new(descriptor, nftscan, throttle)?)
        }
    };
    Ok(adapter)
}

/// Token ids arrive as strings from most endpoints and as numbers from some.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

/// Keep only non-blank strings.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
