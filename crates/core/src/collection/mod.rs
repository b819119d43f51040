//! Collection descriptors and the canonical record model.
//!
//! Every provider adapter normalizes its responses into [`CanonicalRecord`]s;
//! nothing downstream of the adapters sees provider-specific shapes.

mod format;
mod types;

pub use format::{normalize_format, resolve_media_format};
pub use types::*;
