//! Source resolution: turn a media or metadata URI into bytes.
//!
//! Content-addressed URIs are fetched through an ordered list of IPFS
//! gateways; everything else is a direct HTTP(S) GET under the retry policy.

mod config;
mod content_id;
mod http;

pub use config::ResolverConfig;
pub use content_id::ContentAddress;
pub use http::HttpSourceResolver;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{RetryClass, Retryable};

/// Fully read response body.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL the bytes were actually fetched from.
    pub fetched_from: String,
}

/// Errors that can occur when resolving a source.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Rate limited by {url}")]
    RateLimited { url: String, retry_after_ms: Option<u64> },

    /// Timeout, connection failure, or 5xx.
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Empty response body from {0}")]
    EmptyBody(String),

    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("All gateways failed for {cid}: {last_error}")]
    AllGatewaysFailed { cid: String, last_error: String },

    #[error("Response body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },
}

impl Retryable for ResolveError {
    fn retry_class(&self) -> RetryClass {
        match self {
            ResolveError::Transient(_) => RetryClass::Transient,
            ResolveError::RateLimited { retry_after_ms, .. } => RetryClass::RateLimited {
                retry_after_ms: *retry_after_ms,
            },
            _ => RetryClass::Fatal,
        }
    }
}

/// Trait for anything that can fetch the bytes behind a URI.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, uri: &str) -> Result<ResolvedSource, ResolveError>;
}
