//! Resolver configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`super::HttpSourceResolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// IPFS gateways, tried in order.
    #[serde(default = "default_gateways")]
    pub gateways: Vec<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Largest body accepted, in bytes.
    #[serde(default = "default_max_body")]
    pub max_body_bytes: u64,
}

fn default_gateways() -> Vec<String> {
    vec![
        "https://ipfs.io".to_string(),
        "https://cloudflare-ipfs.com".to_string(),
        "https://gateway.pinata.cloud".to_string(),
        "https://dweb.link".to_string(),
    ]
}

fn default_timeout() -> u64 {
    30
}

fn default_max_body() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            gateways: default_gateways(),
            timeout_secs: default_timeout(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl ResolverConfig {
    pub fn with_gateways(mut self, gateways: Vec<String>) -> Self {
        self.gateways = gateways;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}
