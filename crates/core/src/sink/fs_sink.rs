//! File system sink implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::progress::RunProgress;
use super::{sanitize_name, SinkError};

const PROGRESS_FILE: &str = ".progress.json";

/// Writes media, metadata and progress for one collection.
///
/// Records are partitioned by id, so concurrent workers never touch the same
/// file and no locking is needed.
#[derive(Debug, Clone)]
pub struct FsSink {
    collection_dir: PathBuf,
}

impl FsSink {
    /// Sink for the collection `name` under `output_root`.
    pub fn new(output_root: impl AsRef<Path>, name: &str) -> Self {
        Self {
            collection_dir: output_root.as_ref().join(sanitize_name(name)),
        }
    }

    pub fn collection_dir(&self) -> &Path {
        &self.collection_dir
    }

    pub fn media_dir(&self) -> PathBuf {
        self.collection_dir.join("img")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.collection_dir.join("metadata")
    }

    pub fn media_path(&self, id: &str, format: &str) -> PathBuf {
        self.media_dir().join(format!("{}{}", sanitize_name(id), format))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", sanitize_name(id)))
    }

    pub fn progress_path(&self) -> PathBuf {
        self.collection_dir.join(PROGRESS_FILE)
    }

    /// Create `C/img` and `C/metadata`.
    pub async fn prepare(&self) -> Result<(), SinkError> {
        for dir in [self.media_dir(), self.metadata_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| SinkError::DirectoryCreationFailed {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        Ok(())
    }

    pub async fn has_media(&self, id: &str, format: &str) -> bool {
        is_non_empty(&self.media_path(id, format)).await
    }

    pub async fn has_metadata(&self, id: &str) -> bool {
        is_non_empty(&self.metadata_path(id)).await
    }

    /// Atomically write a media file, returning its path.
    pub async fn write_media(&self, id: &str, format: &str, bytes: &[u8]) -> Result<PathBuf, SinkError> {
        let path = self.media_path(id, format);
        write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Atomically write a metadata document as pretty-printed UTF-8 JSON.
    pub async fn write_metadata(&self, id: &str, metadata: &serde_json::Value) -> Result<PathBuf, SinkError> {
        let path = self.metadata_path(id);
        let body = serde_json::to_vec_pretty(metadata).map_err(|e| SinkError::Json {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &body).await?;
        Ok(path)
    }

    /// Ids whose media or metadata file is missing or empty. Media counts as
    /// present under any extension.
    pub async fn missing_ids(&self, ids: &[String]) -> Result<Vec<String>, SinkError> {
        let media = present_stems(&self.media_dir()).await?;
        let metadata = present_stems(&self.metadata_dir()).await?;
        Ok(ids
            .iter()
            .filter(|id| {
                let stem = sanitize_name(id);
                !media.contains(&stem) || !metadata.contains(&stem)
            })
            .cloned()
            .collect())
    }

    /// Load persisted progress, if any.
    pub async fn load_progress(&self) -> Result<Option<RunProgress>, SinkError> {
        let path = self.progress_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::ReadFailed { path, source: e }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SinkError::Json {
                path,
                message: e.to_string(),
            })
    }

    pub async fn save_progress(&self, progress: &RunProgress) -> Result<(), SinkError> {
        let path = self.progress_path();
        let body = serde_json::to_vec_pretty(progress).map_err(|e| SinkError::Json {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &body).await
    }
}

/// File stems of the non-empty files in `dir`, skipping dotfiles.
async fn present_stems(dir: &Path) -> Result<HashSet<String>, SinkError> {
    let mut stems = HashSet::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stems),
        Err(e) => {
            return Err(SinkError::ReadFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SinkError::ReadFailed {
            path: dir.to_path_buf(),
            source: e,
        })?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if !matches!(entry.metadata().await, Ok(meta) if meta.is_file() && meta.len() > 0) {
            continue;
        }
        let stem = match name.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => name,
        };
        stems.insert(stem);
    }
    Ok(stems)
}

async fn is_non_empty(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Write to a uniquely named sibling, then rename over the destination.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| SinkError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let write_err = |e| SinkError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Err(e) = write_then_rename(&tmp, path, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

async fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}
