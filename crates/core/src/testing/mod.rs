//! Testing utilities and mock implementations.
//!
//! Mocks for the two network-facing traits, so the orchestrator and worker
//! can be exercised end to end against a temporary directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester_core::testing::{fixtures, MockProviderAdapter, MockSourceResolver};
//!
//! let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(3, 2));
//! let resolver = MockSourceResolver::new();
//! resolver.serve_all(b"png".to_vec()).await;
//! ```

mod mock_provider;
mod mock_resolver;

pub use mock_provider::MockProviderAdapter;
pub use mock_resolver::MockSourceResolver;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::collection::{CanonicalRecord, Chain, CollectionDescriptor, ProviderKind};

    /// Contract used by fixture descriptors.
    pub const CONTRACT: &str = "0x00000000000000000000000000000000000c0ffe";

    /// A record with `.png` media, the given sources and no metadata.
    pub fn record(id: &str, sources: &[&str]) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(id, ".png");
        for uri in sources {
            record.media_sources.push(uri);
        }
        record
    }

    /// Media URI served for a fixture record.
    pub fn media_uri(id: &str) -> String {
        format!("https://cdn.test/{}.png", id)
    }

    /// `pages` pages of `per_page` records, ids counting up from 1, each with
    /// one media source and inline metadata.
    pub fn numbered_pages(pages: usize, per_page: usize) -> Vec<Vec<CanonicalRecord>> {
        (0..pages)
            .map(|p| {
                (0..per_page)
                    .map(|i| {
                        let id = (p * per_page + i + 1).to_string();
                        record(&id, &[media_uri(&id).as_str()])
                            .with_metadata(serde_json::json!({ "name": format!("#{}", id) }))
                    })
                    .collect()
            })
            .collect()
    }

    /// A descriptor for the fixture contract.
    pub fn descriptor(provider: ProviderKind) -> CollectionDescriptor {
        CollectionDescriptor::new(Chain::Ethereum, provider, CONTRACT, "Test Collection")
            .with_item_workers(4)
    }
}
