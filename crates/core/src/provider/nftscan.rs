//! NFTScan `assets/batch` adapter.
//!
//! NFTScan reports rate limiting inside the body (`"code": 429`) as well as
//! through the HTTP status, so both are checked.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::client::JsonClient;
use super::plan::TokenIdPlan;
use super::{non_blank, string_or_number, PaginationStyle, ProviderAdapter, ProviderError};
use crate::collection::{
    resolve_media_format, CanonicalRecord, CollectionDescriptor, PageCursor, PageResult,
};
use crate::metrics;
use crate::net;
use crate::throttle::RequestThrottle;

/// Most tokens NFTScan accepts per batch call.
const MAX_PAGE_SIZE: u64 = 50;

/// NFTScan client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftScanConfig {
    /// API keys sent as `X-API-KEY`; one is picked at random per request.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Overrides the chain's REST host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Tokens per batch, at most 50.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> u64 {
    MAX_PAGE_SIZE
}

impl Default for NftScanConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: None,
            timeout_secs: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl NftScanConfig {
    pub fn with_api_keys(mut self, keys: Vec<String>) -> Self {
        self.api_keys = keys;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = size;
        self
    }
}

/// Offset-paginated batch lookups against NFTScan.
pub struct NftScanBatchAdapter {
    http: JsonClient,
    base_url: String,
    api_keys: Vec<String>,
    contract: String,
    fallback_format: String,
    page_size: u64,
    plan: TokenIdPlan,
    throttle: RequestThrottle,
}

impl NftScanBatchAdapter {
    pub fn new(
        descriptor: &CollectionDescriptor,
        config: &NftScanConfig,
        throttle: RequestThrottle,
    ) -> Result<Self, ProviderError> {
        let api_keys: Vec<String> = config
            .api_keys
            .iter()
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .collect();
        if api_keys.is_empty() {
            return Err(ProviderError::NotConfigured(
                "nftscan.api_keys is empty".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| descriptor.chain.nftscan_base_url().to_string());

        Ok(Self {
            http: JsonClient::new("nftscan_batch", config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_keys,
            contract: descriptor.contract.clone(),
            fallback_format: descriptor.fallback_format(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            plan: TokenIdPlan::from_descriptor(descriptor),
            throttle,
        })
    }

    fn normalize(&self, items: Vec<Value>) -> (Vec<CanonicalRecord>, usize) {
        let mut records = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for item in items {
            match serde_json::from_value::<NftScanAsset>(item) {
                Ok(asset) => records.push(asset.into_record(&self.fallback_format)),
                Err(e) => {
                    warn!(contract = %self.contract, error = %e, "Skipping malformed NFTScan item");
                    skipped += 1;
                }
            }
        }
        (records, skipped)
    }
}

#[async_trait]
impl ProviderAdapter for NftScanBatchAdapter {
    fn name(&self) -> &str {
        "nftscan_batch"
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::Offset {
            page_size: self.page_size,
            total: self.plan.len(),
        }
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<PageResult, ProviderError> {
        let offset = match cursor {
            PageCursor::Offset(n) => *n,
            PageCursor::Token(t) => {
                return Err(ProviderError::InvalidCursor(format!(
                    "nftscan_batch pages by offset, got token '{}'",
                    t
                )))
            }
        };

        let ids = self.plan.page(offset, self.page_size);
        if ids.is_empty() {
            return Ok(PageResult::default());
        }

        let body = BatchRequest {
            contract_address_with_token_id_list: ids
                .iter()
                .map(|id| BatchToken {
                    contract_address: &self.contract,
                    token_id: id,
                })
                .collect(),
            show_attribute: true,
        };

        self.throttle.acquire().await;
        debug!(contract = %self.contract, offset, count = ids.len(), "Fetching NFTScan batch");

        let key = net::pick_key(&self.api_keys).unwrap_or_default();
        let request = self
            .http
            .post(&format!("{}/api/v2/assets/batch", self.base_url))
            .header("X-API-KEY", key)
            .json(&body);
        let response: BatchResponse = self.http.send(request).await?;

        match response.code {
            Some(200) | None => {}
            Some(429) => {
                warn!("NFTScan rate limit exceeded");
                return Err(ProviderError::RateLimited {
                    retry_after_ms: None,
                });
            }
            Some(code) => {
                return Err(ProviderError::Api {
                    status: code,
                    message: response.msg.unwrap_or_default(),
                })
            }
        }
        metrics::PAGES_FETCHED.with_label_values(&["nftscan_batch"]).inc();

        let items = response.data.unwrap_or_default();
        let page_was_empty = items.is_empty();
        let (records, skipped) = self.normalize(items);
        let next_cursor = if page_was_empty {
            None
        } else {
            self.plan
                .next_offset(offset, self.page_size)
                .map(PageCursor::Offset)
        };

        Ok(PageResult {
            records,
            next_cursor,
            skipped,
        })
    }
}

// ============================================================================
// NFTScan API Types (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    contract_address_with_token_id_list: Vec<BatchToken<'a>>,
    show_attribute: bool,
}

#[derive(Debug, Serialize)]
struct BatchToken<'a> {
    contract_address: &'a str,
    token_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct NftScanAsset {
    #[serde(deserialize_with = "string_or_number")]
    token_id: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    nftscan_uri: Option<String>,
    #[serde(default)]
    content_uri: Option<String>,
    #[serde(default)]
    image_uri: Option<String>,
    #[serde(default)]
    metadata_json: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl NftScanAsset {
    fn into_record(self, fallback_format: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(
            self.token_id,
            resolve_media_format(self.content_type.as_deref(), fallback_format),
        );
        for uri in [self.nftscan_uri, self.content_uri, self.image_uri]
            .into_iter()
            .flatten()
        {
            record.media_sources.push(uri);
        }

        record.metadata_inline = non_blank(self.metadata_json).and_then(|raw| {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) if value.is_object() => Some(value),
                Ok(_) => None,
                Err(e) => {
                    debug!(id = %record.id, error = %e, "metadata_json is not valid JSON");
                    None
                }
            }
        });
        record.metadata_uri = non_blank(self.token_uri);
        record
    }
}
