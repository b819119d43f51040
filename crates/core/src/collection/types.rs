//! Types for collection descriptors and canonical records.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::format::normalize_format;
use crate::resolver::ContentAddress;

/// Blockchain a collection lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Bnb,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Bnb => "bnb",
        }
    }

    /// Alchemy network base URL for this chain.
    pub fn alchemy_base_url(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://eth-mainnet.g.alchemy.com",
            Chain::Polygon => "https://polygon-mainnet.g.alchemy.com",
            Chain::Arbitrum => "https://arb-mainnet.g.alchemy.com",
            Chain::Optimism => "https://opt-mainnet.g.alchemy.com",
            Chain::Base => "https://base-mainnet.g.alchemy.com",
            Chain::Bnb => "https://bnb-mainnet.g.alchemy.com",
        }
    }

    /// NFTScan REST base URL for this chain.
    pub fn nftscan_base_url(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://restapi.nftscan.com",
            Chain::Polygon => "https://polygonapi.nftscan.com",
            Chain::Arbitrum => "https://arbitrumapi.nftscan.com",
            Chain::Optimism => "https://optimismapi.nftscan.com",
            Chain::Base => "https://baseapi.nftscan.com",
            Chain::Bnb => "https://bnbapi.nftscan.com",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream protocol used to page through a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Alchemy `getNFTsForContract`, paginated by `pageKey`.
    AlchemyContract,
    /// Alchemy `getNFTMetadataBatch`, paginated by offset into the token id plan.
    AlchemyBatch,
    /// NFTScan `assets/batch`, paginated by offset into the token id plan.
    NftscanBatch,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::AlchemyContract => "alchemy_contract",
            ProviderKind::AlchemyBatch => "alchemy_batch",
            ProviderKind::NftscanBatch => "nftscan_batch",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in a paginated catalog.
///
/// Offset adapters interpret `Offset(n)` as the n-th entry of their token id
/// plan. Cursor adapters map `Offset(n)` to a starting token id and otherwise
/// pass the opaque `Token` through to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCursor {
    Offset(u64),
    Token(String),
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCursor::Offset(n) => write!(f, "offset:{}", n),
            PageCursor::Token(t) => write!(f, "token:{}", t),
        }
    }
}

/// Everything the pipeline needs to know about one collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub chain: Chain,
    pub provider: ProviderKind,
    /// Contract address.
    pub contract: String,
    /// Display name, used for the output directory. May be left blank when
    /// collection discovery is enabled.
    #[serde(default)]
    pub name: String,
    /// Declared item count. Advisory for cursor providers, bounds the token id
    /// range for batch providers.
    #[serde(default)]
    pub total: u64,
    /// First token id (collections start at 0 or 1).
    #[serde(default)]
    pub start_index: u64,
    /// Media format used when the provider reports no content type.
    #[serde(default = "default_candidate_format")]
    pub candidate_format: String,
    /// Pagination starting point. Defaults to the beginning of the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<PageCursor>,
    /// Explicit token ids to fetch instead of the contiguous range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ids: Option<Vec<String>>,
    /// Concurrent page workers (offset providers only).
    #[serde(default = "default_page_workers")]
    pub page_workers: usize,
    /// Concurrent record workers per drained page.
    #[serde(default = "default_item_workers")]
    pub item_workers: usize,
}

fn default_candidate_format() -> String {
    ".png".to_string()
}

fn default_page_workers() -> usize {
    1
}

fn default_item_workers() -> usize {
    10
}

impl CollectionDescriptor {
    /// Create a descriptor with default format and concurrency settings.
    pub fn new(
        chain: Chain,
        provider: ProviderKind,
        contract: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            provider,
            contract: contract.into(),
            name: name.into(),
            total: 0,
            start_index: 0,
            candidate_format: default_candidate_format(),
            start_cursor: None,
            token_ids: None,
            page_workers: default_page_workers(),
            item_workers: default_item_workers(),
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_candidate_format(mut self, format: &str) -> Self {
        self.candidate_format = normalize_format(format);
        self
    }

    pub fn with_start_cursor(mut self, cursor: PageCursor) -> Self {
        self.start_cursor = Some(cursor);
        self
    }

    /// Restrict the run to the given token ids (gap filling).
    pub fn with_token_ids(mut self, ids: Vec<String>) -> Self {
        self.token_ids = Some(ids);
        self
    }

    pub fn with_page_workers(mut self, workers: usize) -> Self {
        self.page_workers = workers;
        self
    }

    pub fn with_item_workers(mut self, workers: usize) -> Self {
        self.item_workers = workers;
        self
    }

    /// The candidate format as a leading-dot extension.
    pub fn fallback_format(&self) -> String {
        normalize_format(&self.candidate_format)
    }

    /// Where pagination begins when nothing has been persisted.
    pub fn initial_cursor(&self) -> PageCursor {
        self.start_cursor.clone().unwrap_or(PageCursor::Offset(0))
    }
}

/// Ordered media source URIs, highest preference first.
///
/// Pushing a URI that refers to the same underlying resource as an existing
/// entry (same string, or same content identifier and path) is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaSources(Vec<String>);

impl MediaSources {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a source unless it is blank or already present. Returns whether it was added.
    pub fn push(&mut self, uri: impl AsRef<str>) -> bool {
        let uri = uri.as_ref().trim();
        if uri.is_empty() {
            return false;
        }
        let key = source_key(uri);
        if self.0.iter().any(|existing| source_key(existing) == key) {
            return false;
        }
        self.0.push(uri.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: AsRef<str>> FromIterator<S> for MediaSources {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut sources = MediaSources::new();
        for uri in iter {
            sources.push(uri);
        }
        sources
    }
}

fn source_key(uri: &str) -> String {
    match ContentAddress::parse(uri) {
        Some(addr) => format!("ipfs:{}{}", addr.cid, addr.path),
        None => uri.to_string(),
    }
}

/// Provider-neutral representation of one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Token id, numeric ids kept as their decimal string.
    pub id: String,
    /// Metadata document embedded in the provider response.
    pub metadata_inline: Option<serde_json::Value>,
    /// Remote metadata location.
    pub metadata_uri: Option<String>,
    pub media_sources: MediaSources,
    /// Leading-dot extension for the media file.
    pub media_format: String,
}

impl CanonicalRecord {
    pub fn new(id: impl Into<String>, media_format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata_inline: None,
            metadata_uri: None,
            media_sources: MediaSources::new(),
            media_format: media_format.into(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata_inline = Some(metadata);
        self
    }

    pub fn with_metadata_uri(mut self, uri: impl Into<String>) -> Self {
        self.metadata_uri = Some(uri.into());
        self
    }

    pub fn with_source(mut self, uri: impl AsRef<str>) -> Self {
        self.media_sources.push(uri);
        self
    }
}

/// One page of normalized records.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub records: Vec<CanonicalRecord>,
    /// `None` is the only termination signal.
    pub next_cursor: Option<PageCursor>,
    /// Items dropped because they could not be parsed.
    pub skipped: usize,
}
