//! Mock source resolver for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::resolver::{ResolveError, ResolvedSource, SourceResolver};

/// Mock implementation of the SourceResolver trait.
///
/// URIs without a configured response fail with HTTP 404, unless a fallback
/// body was set with [`serve_all`](Self::serve_all). Every call is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockSourceResolver {
    responses: Arc<RwLock<HashMap<String, Result<ResolvedSource, ResolveError>>>>,
    fallback: Arc<RwLock<Option<Vec<u8>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `uri`.
    pub async fn set_bytes(&self, uri: &str, bytes: Vec<u8>) {
        self.responses.write().await.insert(
            uri.to_string(),
            Ok(ResolvedSource {
                bytes,
                content_type: None,
                fetched_from: uri.to_string(),
            }),
        );
    }

    /// Fail every call for `uri` with `error`.
    pub async fn set_error(&self, uri: &str, error: ResolveError) {
        self.responses
            .write()
            .await
            .insert(uri.to_string(), Err(error));
    }

    /// Serve `bytes` for any URI without its own response.
    pub async fn serve_all(&self, bytes: Vec<u8>) {
        *self.fallback.write().await = Some(bytes);
    }

    /// All resolved URIs, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self, uri: &str) -> usize {
        self.calls.read().await.iter().filter(|c| *c == uri).count()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }
}

#[async_trait]
impl SourceResolver for MockSourceResolver {
    async fn resolve(&self, uri: &str) -> Result<ResolvedSource, ResolveError> {
        self.calls.write().await.push(uri.to_string());

        if let Some(response) = self.responses.read().await.get(uri) {
            return response.clone();
        }
        match self.fallback.read().await.as_ref() {
            Some(bytes) => Ok(ResolvedSource {
                bytes: bytes.clone(),
                content_type: None,
                fetched_from: uri.to_string(),
            }),
            None => Err(ResolveError::Http {
                status: 404,
                url: uri.to_string(),
            }),
        }
    }
}
