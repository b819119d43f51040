//! Alchemy NFT API v3 adapters.
//!
//! Two access patterns over the same item schema:
//! - `getNFTsForContract`: GET listing, continued with `pageKey`
//! - `getNFTMetadataBatch`: POST of up to 100 explicit token ids

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::JsonClient;
use super::plan::TokenIdPlan;
use super::{non_blank, string_or_number, PaginationStyle, ProviderAdapter, ProviderError};
use crate::collection::{
    resolve_media_format, CanonicalRecord, CollectionDescriptor, PageCursor, PageResult,
};
use crate::metrics;
use crate::net;
use crate::throttle::RequestThrottle;

/// Most tokens Alchemy returns or accepts per call.
const MAX_PAGE_SIZE: u64 = 100;

/// Alchemy client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlchemyConfig {
    /// API keys; one is picked at random per request.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Overrides the chain's network URL (e.g. "https://eth-mainnet.g.alchemy.com").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Tokens per page, at most 100.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> u64 {
    MAX_PAGE_SIZE
}

impl Default for AlchemyConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: None,
            timeout_secs: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl AlchemyConfig {
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

/// Connection details shared by both Alchemy adapters.
struct AlchemyEndpoint {
    http: JsonClient,
    base_url: String,
    api_keys: Vec<String>,
    contract: String,
    fallback_format: String,
    page_size: u64,
    throttle: RequestThrottle,
}

impl AlchemyEndpoint {
    fn new(
        provider: &'static str,
        descriptor: &CollectionDescriptor,
        config: &AlchemyConfig,
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
                "alchemy.api_keys is empty".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| descriptor.chain.alchemy_base_url().to_string());

        Ok(Self {
            http: JsonClient::new(provider, config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_keys,
            contract: descriptor.contract.clone(),
            fallback_format: descriptor.fallback_format(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            throttle,
        })
    }

    fn url(&self, method: &str) -> String {
        let key = net::pick_key(&self.api_keys).unwrap_or_default();
        format!(
            "{}/nft/v3/{}/{}",
            self.base_url,
            urlencoding::encode(key),
            method
        )
    }

    /// Normalize raw items, skipping any that fail to parse.
    fn normalize(&self, items: Vec<Value>) -> (Vec<CanonicalRecord>, usize) {
        let mut records = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for item in items {
            match serde_json::from_value::<AlchemyNft>(item) {
                Ok(nft) => match nft.into_record(&self.fallback_format) {
                    Some(record) => records.push(record),
                    None => skipped += 1,
                },
                Err(e) => {
                    warn!(contract = %self.contract, error = %e, "Skipping malformed Alchemy item");
                    skipped += 1;
                }
            }
        }
        (records, skipped)
    }
}

// ============================================================================
// getNFTsForContract
// ============================================================================

/// Cursor-paginated listing of a whole contract.
pub struct AlchemyContractAdapter {
    endpoint: AlchemyEndpoint,
}

impl AlchemyContractAdapter {
    pub fn new(
        descriptor: &CollectionDescriptor,
        config: &AlchemyConfig,
        throttle: RequestThrottle,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: AlchemyEndpoint::new("alchemy_contract", descriptor, config, throttle)?,
        })
    }
}

#[async_trait]
impl ProviderAdapter for AlchemyContractAdapter {
    fn name(&self) -> &str {
        "alchemy_contract"
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::Cursor
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<PageResult, ProviderError> {
        let ep = &self.endpoint;
        let start_token = match cursor {
            PageCursor::Offset(n) => n.to_string(),
            PageCursor::Token(t) => t.clone(),
        };
        let limit = ep.page_size.to_string();

        ep.throttle.acquire().await;
        debug!(contract = %ep.contract, cursor = %cursor, "Fetching Alchemy contract page");

        let request = ep.http.get(&ep.url("getNFTsForContract")).query(&[
            ("contractAddress", ep.contract.as_str()),
            ("withMetadata", "true"),
            ("startToken", start_token.as_str()),
            ("limit", limit.as_str()),
        ]);
        let response: ContractResponse = ep.http.send(request).await?;
        metrics::PAGES_FETCHED.with_label_values(&["alchemy_contract"]).inc();

        let page_was_empty = response.nfts.is_empty();
        let (records, skipped) = ep.normalize(response.nfts);
        let next_cursor = if page_was_empty {
            None
        } else {
            non_blank(response.page_key).map(PageCursor::Token)
        };

        Ok(PageResult {
            records,
            next_cursor,
            skipped,
        })
    }
}

// ============================================================================
// getNFTMetadataBatch
// ============================================================================

/// Offset-paginated batch lookups over a token id plan.
pub struct AlchemyBatchAdapter {
    endpoint: AlchemyEndpoint,
    plan: TokenIdPlan,
}

impl AlchemyBatchAdapter {
    pub fn new(
        descriptor: &CollectionDescriptor,
        config: &AlchemyConfig,
        throttle: RequestThrottle,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: AlchemyEndpoint::new("alchemy_batch", descriptor, config, throttle)?,
            plan: TokenIdPlan::from_descriptor(descriptor),
        })
    }
}

#[async_trait]
impl ProviderAdapter for AlchemyBatchAdapter {
    fn name(&self) -> &str {
        "alchemy_batch"
    }

    fn pagination(&self) -> PaginationStyle {
        PaginationStyle::Offset {
            page_size: self.endpoint.page_size,
            total: self.plan.len(),
        }
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<PageResult, ProviderError> {
        let ep = &self.endpoint;
        let offset = match cursor {
            PageCursor::Offset(n) => *n,
            PageCursor::Token(t) => {
                return Err(ProviderError::InvalidCursor(format!(
                    "alchemy_batch pages by offset, got token '{}'",
                    t
                )))
            }
        };

        let ids = self.plan.page(offset, ep.page_size);
        if ids.is_empty() {
            return Ok(PageResult::default());
        }

        let body = BatchRequest {
            tokens: ids
                .iter()
                .map(|id| BatchToken {
                    contract_address: &ep.contract,
                    token_id: id,
                })
                .collect(),
            refresh_cache: false,
        };

        ep.throttle.acquire().await;
        debug!(contract = %ep.contract, offset, count = ids.len(), "Fetching Alchemy batch");

        let request = ep.http.post(&ep.url("getNFTMetadataBatch")).json(&body);
        let response: BatchResponse = ep.http.send(request).await?;
        metrics::PAGES_FETCHED.with_label_values(&["alchemy_batch"]).inc();

        let page_was_empty = response.nfts.is_empty();
        let (records, skipped) = ep.normalize(response.nfts);
        let next_cursor = if page_was_empty {
            None
        } else {
            self.plan
                .next_offset(offset, ep.page_size)
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
// Collection discovery
// ============================================================================

/// What Alchemy reports about a collection, learned by probing token ids 0
/// and 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: Option<String>,
    pub total_supply: Option<u64>,
    /// 0 when token 0 exists, otherwise 1.
    pub start_index: u64,
    /// Media format of the first existing sample token, when reported.
    pub candidate_format: Option<String>,
}

impl CollectionInfo {
    fn from_samples(tokens: &[SampleToken]) -> Self {
        let existing: Vec<&SampleToken> = tokens.iter().filter(|t| t.exists()).collect();
        let zero_exists = existing.iter().any(|t| t.token_id == "0");

        let contract = || tokens.iter().filter_map(|t| t.contract.as_ref());
        let name = contract().find_map(|c| non_blank(c.name.clone()));
        let total_supply = contract().find_map(|c| c.total_supply.as_ref().and_then(parse_supply));
        let candidate_format = existing
            .iter()
            .filter_map(|t| t.image.as_ref())
            .find_map(|image| non_blank(image.content_type.clone()))
            .map(|ct| resolve_media_format(Some(ct.as_str()), ""))
            .filter(|format| !format.is_empty());

        Self {
            name,
            total_supply,
            start_index: if zero_exists { 0 } else { 1 },
            candidate_format,
        }
    }

    /// Fill a descriptor from the discovered info. Name and total only replace blank
    /// values; the discovered start index and format always win.
    pub fn apply(&self, descriptor: &mut CollectionDescriptor) {
        if descriptor.name.trim().is_empty() {
            if let Some(name) = &self.name {
                descriptor.name = name.clone();
            }
        }
        if descriptor.total == 0 {
            if let Some(total) = self.total_supply {
                descriptor.total = total;
            }
        }
        descriptor.start_index = self.start_index;
        if let Some(format) = &self.candidate_format {
            descriptor.candidate_format = format.clone();
        }
    }
}

/// Ask Alchemy for tokens 0 and 1 of the descriptor's contract and derive
/// the collection's name, supply, first token id and media format.
pub async fn describe_collection(
    descriptor: &CollectionDescriptor,
    config: &AlchemyConfig,
    throttle: RequestThrottle,
) -> Result<CollectionInfo, ProviderError> {
    let ep = AlchemyEndpoint::new("alchemy_describe", descriptor, config, throttle)?;
    let body = BatchRequest {
        tokens: ["0", "1"]
            .into_iter()
            .map(|token_id| BatchToken {
                contract_address: &ep.contract,
                token_id,
            })
            .collect(),
        refresh_cache: false,
    };

    ep.throttle.acquire().await;
    debug!(contract = %ep.contract, "Probing collection info");

    let request = ep.http.post(&ep.url("getNFTMetadataBatch")).json(&body);
    let response: SampleResponse = ep.http.send(request).await?;
    let info = CollectionInfo::from_samples(&response.nfts);

    info!(
        contract = %ep.contract,
        name = ?info.name,
        total_supply = ?info.total_supply,
        start_index = info.start_index,
        candidate_format = ?info.candidate_format,
        "Discovered collection info"
    );
    Ok(info)
}

/// `totalSupply` arrives as a decimal string, occasionally as a number.
fn parse_supply(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Alchemy API Types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractResponse {
    nfts: Vec<Value>,
    #[serde(default)]
    page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    nfts: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest<'a> {
    tokens: Vec<BatchToken<'a>>,
    refresh_cache: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchToken<'a> {
    contract_address: &'a str,
    token_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SampleResponse {
    nfts: Vec<SampleToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleToken {
    #[serde(deserialize_with = "string_or_number")]
    token_id: String,
    #[serde(default)]
    contract: Option<AlchemyContractInfo>,
    #[serde(default)]
    image: Option<AlchemyImage>,
    #[serde(default)]
    raw: Option<AlchemyRaw>,
}

impl SampleToken {
    fn exists(&self) -> bool {
        self.raw
            .as_ref()
            .is_none_or(|raw| non_blank(raw.error.clone()).is_none())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlchemyContractInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    total_supply: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlchemyNft {
    #[serde(deserialize_with = "string_or_number")]
    token_id: String,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    image: Option<AlchemyImage>,
    #[serde(default)]
    raw: Option<AlchemyRaw>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlchemyImage {
    #[serde(default)]
    cached_url: Option<String>,
    #[serde(default)]
    original_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    png_url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlchemyRaw {
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl AlchemyNft {
    /// `None` for tokens Alchemy reports as non-existent.
    fn into_record(self, fallback_format: &str) -> Option<CanonicalRecord> {
        let image = self.image.unwrap_or_default();
        let raw = self.raw.unwrap_or_default();

        let metadata = raw
            .metadata
            .filter(|m| m.as_object().is_some_and(|o| !o.is_empty()));

        let mut record = CanonicalRecord::new(
            self.token_id,
            resolve_media_format(image.content_type.as_deref(), fallback_format),
        );
        for uri in [
            image.cached_url,
            image.original_url,
            image.thumbnail_url,
            image.png_url,
        ]
        .into_iter()
        .flatten()
        {
            record.media_sources.push(uri);
        }
        if let Some(uri) = metadata
            .as_ref()
            .and_then(|m| m.get("image"))
            .and_then(Value::as_str)
        {
            record.media_sources.push(uri);
        }

        if non_blank(raw.error).is_some() && record.media_sources.is_empty() {
            debug!(id = %record.id, "Token reported as non-existent, skipping");
            return None;
        }

        record.metadata_inline = metadata;
        record.metadata_uri = non_blank(self.token_uri).or_else(|| non_blank(raw.token_uri));
        Some(record)
    }
}
