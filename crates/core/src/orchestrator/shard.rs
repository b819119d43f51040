//! Splitting a catalog across page workers.

use crate::collection::PageCursor;
use crate::provider::PaginationStyle;
use crate::sink::ShardProgress;

/// Plan the shards for a run starting at `start`.
///
/// Only offset pagination with a known total is split. Shard bounds are
/// multiples of the page size counted from `start`, so no page straddles two
/// shards. The last shard has no end bound and follows the provider until it
/// reports exhaustion.
pub fn plan_shards(
    style: PaginationStyle,
    start: &PageCursor,
    page_workers: usize,
) -> Vec<ShardProgress> {
    let single = vec![ShardProgress::new(start.clone(), None)];

    let (page_size, total) = match style {
        PaginationStyle::Offset { page_size, total } if page_size > 0 && total > 0 => {
            (page_size, total)
        }
        _ => return single,
    };
    let first = match start {
        PageCursor::Offset(n) if *n < total => *n,
        _ => return single,
    };

    let pages = (total - first).div_ceil(page_size);
    let shard_count = (page_workers.max(1) as u64).min(pages);
    if shard_count <= 1 {
        return single;
    }
    let pages_per_shard = pages.div_ceil(shard_count);
    let span = pages_per_shard * page_size;

    (0..shard_count)
        .map(|i| first + i * span)
        .take_while(|offset| *offset < total)
        .map(|offset| {
            let end = offset + span;
            let end = (end < total).then_some(end);
            ShardProgress::new(PageCursor::Offset(offset), end)
        })
        .collect()
}
