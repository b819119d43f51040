//! Filesystem sink and run progress store.
//!
//! Layout for a collection `C` under the output root:
//! - `C/img/<id><fmt>`: media
//! - `C/metadata/<id>.json`: metadata, pretty-printed
//! - `C/.progress.json`: resumable run progress

mod fs_sink;
mod progress;

pub use fs_sink::FsSink;
pub use progress::{RunProgress, ShardProgress};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while writing to the output tree.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Failed to create a directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or rename a file.
    #[error("Failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a file.
    #[error("Failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("Invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },
}

/// Replace characters that are not allowed in file names with spaces and trim.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
