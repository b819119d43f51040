//! Token id plans for offset-paginated batch providers.

use crate::collection::CollectionDescriptor;

/// The ids an offset adapter will request, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenIdPlan {
    /// `start .. start + count`.
    Range { start: u64, count: u64 },
    /// An explicit id list, e.g. ids found missing on disk.
    Explicit(Vec<String>),
}

impl TokenIdPlan {
    pub fn from_descriptor(descriptor: &CollectionDescriptor) -> Self {
        match &descriptor.token_ids {
            Some(ids) => TokenIdPlan::Explicit(ids.clone()),
            None => TokenIdPlan::Range {
                start: descriptor.start_index,
                count: descriptor.total,
            },
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            TokenIdPlan::Range { count, .. } => *count,
            TokenIdPlan::Explicit(ids) => ids.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids at positions `offset .. offset + size`, clipped to the plan.
    pub fn page(&self, offset: u64, size: u64) -> Vec<String> {
        let end = offset.saturating_add(size).min(self.len());
        if offset >= end {
            return Vec::new();
        }
        match self {
            TokenIdPlan::Range { start, .. } => {
                (start + offset..start + end).map(|id| id.to_string()).collect()
            }
            TokenIdPlan::Explicit(ids) => ids[offset as usize..end as usize].to_vec(),
        }
    }

    /// Offset of the page after the one at `offset`, if any ids remain.
    pub fn next_offset(&self, offset: u64, size: u64) -> Option<u64> {
        let next = offset.saturating_add(size);
        (next < self.len()).then_some(next)
    }
}
