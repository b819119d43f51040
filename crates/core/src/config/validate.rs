use super::{types::Config, ConfigError};
use crate::collection::{PageCursor, ProviderKind};
use crate::sink::sanitize_name;

/// Validate configuration
/// Currently validates:
/// - Contract is not blank and the collection name survives directory-name
///   sanitizing
/// - Worker counts are not 0
/// - The selected provider has at least one API key
/// - Batch providers and gap filling know which ids to request
/// - Batch providers start at an offset
/// - Jitter bounds are ordered
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let collection = &config.collection;

    if collection.contract.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "collection.contract cannot be empty".to_string(),
        ));
    }
    if sanitize_name(&collection.name).is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "collection.name '{}' is empty once reserved characters are removed",
            collection.name
        )));
    }
    if collection.page_workers == 0 || collection.item_workers == 0 {
        return Err(ConfigError::ValidationError(
            "collection.page_workers and collection.item_workers must be at least 1".to_string(),
        ));
    }

    let keys = match collection.provider {
        ProviderKind::AlchemyContract | ProviderKind::AlchemyBatch => &config.alchemy.api_keys,
        ProviderKind::NftscanBatch => &config.nftscan.api_keys,
    };
    if keys.iter().all(|k| k.trim().is_empty()) {
        return Err(ConfigError::ValidationError(format!(
            "no API keys configured for provider {}",
            collection.provider
        )));
    }

    let has_ids = collection.token_ids.as_ref().is_some_and(|ids| !ids.is_empty());
    if config.ingest.fill_gaps && collection.total == 0 && !has_ids {
        return Err(ConfigError::ValidationError(
            "ingest.fill_gaps needs collection.total or collection.token_ids".to_string(),
        ));
    }

    if collection.provider != ProviderKind::AlchemyContract {
        if collection.total == 0 && !has_ids {
            return Err(ConfigError::ValidationError(format!(
                "provider {} needs collection.total or collection.token_ids",
                collection.provider
            )));
        }
        if matches!(collection.start_cursor, Some(PageCursor::Token(_))) {
            return Err(ConfigError::ValidationError(format!(
                "provider {} pages by offset, collection.start_cursor must be a number",
                collection.provider
            )));
        }
    }

    if config.throttle.jitter_min_ms > config.throttle.jitter_max_ms {
        return Err(ConfigError::ValidationError(
            "throttle.jitter_min_ms cannot exceed throttle.jitter_max_ms".to_string(),
        ));
    }

    Ok(())
}
