//! Gap filling: re-fetch only the tokens whose files are missing on disk.

use tracing::info;

use crate::collection::{CollectionDescriptor, ProviderKind};
use crate::provider::TokenIdPlan;
use crate::sink::{FsSink, SinkError};

/// Narrow `descriptor` to the tokens of its id plan that are missing under
/// `sink`. Returns `None` when nothing is missing.
///
/// Cursor listings cannot be restricted to explicit ids, so a contract
/// listing is swapped for the batch adapter of the same provider.
pub async fn plan_gap_fill(
    descriptor: &CollectionDescriptor,
    sink: &FsSink,
) -> Result<Option<CollectionDescriptor>, SinkError> {
    let plan = TokenIdPlan::from_descriptor(descriptor);
    let ids = plan.page(0, plan.len());
    let missing = sink.missing_ids(&ids).await?;

    info!(
        collection = %descriptor.name,
        scanned = ids.len(),
        missing = missing.len(),
        "Scanned output for missing tokens"
    );
    if missing.is_empty() {
        return Ok(None);
    }

    let mut narrowed = descriptor.clone().with_token_ids(missing);
    narrowed.start_cursor = None;
    if narrowed.provider == ProviderKind::AlchemyContract {
        narrowed.provider = ProviderKind::AlchemyBatch;
    }
    Ok(Some(narrowed))
}
