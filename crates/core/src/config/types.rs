use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::collection::CollectionDescriptor;
use crate::orchestrator::IngestConfig;
use crate::provider::{AlchemyConfig, NftScanConfig};
use crate::resolver::ResolverConfig;
use crate::retry::RetryPolicy;
use crate::throttle::ThrottleConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The collection to ingest.
    pub collection: CollectionDescriptor,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub alchemy: AlchemyConfig,
    #[serde(default)]
    pub nftscan: NftScanConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Policy for page fetches and direct source fetches.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Collections are written to `<root>/<collection name>/`.
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("collections")
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here when the run ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textfile: Option<PathBuf>,
}

/// Sanitized config for logging (API keys redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub collection: CollectionDescriptor,
    pub output: OutputConfig,
    pub alchemy: SanitizedProviderConfig,
    pub nftscan: SanitizedProviderConfig,
    pub resolver: ResolverConfig,
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,
    pub ingest: IngestConfig,
}

/// Provider settings with the keys replaced by their count
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub api_keys_configured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            collection: config.collection.clone(),
            output: config.output.clone(),
            alchemy: SanitizedProviderConfig {
                api_keys_configured: config.alchemy.api_keys.len(),
                base_url: config.alchemy.base_url.clone(),
                timeout_secs: config.alchemy.timeout_secs,
                page_size: config.alchemy.page_size,
            },
            nftscan: SanitizedProviderConfig {
                api_keys_configured: config.nftscan.api_keys.len(),
                base_url: config.nftscan.base_url.clone(),
                timeout_secs: config.nftscan.timeout_secs,
                page_size: config.nftscan.page_size,
            },
            resolver: config.resolver.clone(),
            retry: config.retry.clone(),
            throttle: config.throttle.clone(),
            ingest: config.ingest.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Chain, PageCursor, ProviderKind};

    const MINIMAL: &str = r#"
[collection]
chain = "ethereum"
provider = "alchemy_contract"
contract = "0xabc"
name = "Test"
"#;

    #[test]
    fn test_deserialize_minimal() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.collection.chain, Chain::Ethereum);
        assert_eq!(config.collection.provider, ProviderKind::AlchemyContract);
        assert_eq!(config.collection.candidate_format, ".png");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.output.root, PathBuf::from("collections"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.resolver.gateways.len(), 4);
        assert!(config.ingest.resume);
        assert!(config.metrics.textfile.is_none());
    }

    #[test]
    fn test_deserialize_missing_collection_fails() {
        let result: Result<Config, _> = toml::from_str("log_format = \"json\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
log_format = "json"

[collection]
chain = "polygon"
provider = "nftscan_batch"
contract = "0xdef"
name = "Full"
total = 1000
start_index = 1
candidate_format = "gif"
start_cursor = 200
page_workers = 4

[output]
root = "/data/nft"

[nftscan]
api_keys = ["k1", "k2"]
page_size = 25

[throttle]
requests_per_minute = 60

[metrics]
textfile = "/tmp/harvester.prom"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.collection.start_cursor, Some(PageCursor::Offset(200)));
        assert_eq!(config.collection.page_workers, 4);
        assert_eq!(config.nftscan.api_keys.len(), 2);
        assert_eq!(config.nftscan.page_size, 25);
        assert_eq!(config.throttle.requests_per_minute, 60);
        assert_eq!(
            config.metrics.textfile,
            Some(PathBuf::from("/tmp/harvester.prom"))
        );
    }

    #[test]
    fn test_sanitized_config_hides_keys() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.alchemy.api_keys = vec!["secret-key".to_string()];

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.alchemy.api_keys_configured, 1);
        assert_eq!(sanitized.nftscan.api_keys_configured, 0);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
    }
}
