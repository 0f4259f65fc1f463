use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::Feed;
use crate::util::atomic_write;

/// Maximum accepted size of `feeds.json` (4 MB).
const MAX_FEEDS_FILE_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FeedStoreError {
    #[error("Failed to access feed list: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in feed list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Feed list too large: {0} bytes")]
    TooLarge(u64),
}

/// The list of configured feeds, kept as a JSON array on disk.
///
/// The store is read-only from the pipeline's point of view. The only write
/// it ever performs is seeding a template when the file does not exist yet.
#[derive(Debug, Clone)]
pub struct FeedStore {
    path: PathBuf,
}

impl FeedStore {
    pub const FILE_NAME: &'static str = "feeds.json";

    /// Store backed by `<data_dir>/feeds.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a template with one disabled feed if no feed list exists yet.
    ///
    /// Returns `true` when the template was written.
    pub async fn ensure_exists(&self) -> Result<bool, FeedStoreError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }

        let template = serde_json::to_vec_pretty(&vec![Feed::default()])?;
        atomic_write(&self.path, &template).await?;
        tracing::info!(path = %self.path.display(), "Created feed list template");
        Ok(true)
    }

    /// Load every configured feed, enabled or not.
    ///
    /// A missing file is an empty list. A whitespace-only file is too.
    pub async fn load(&self) -> Result<Vec<Feed>, FeedStoreError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.len() > MAX_FEEDS_FILE_SIZE => {
                return Err(FeedStoreError::TooLarge(meta.len()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No feed list found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let feeds: Vec<Feed> = serde_json::from_str(&content)?;
        tracing::debug!(path = %self.path.display(), count = feeds.len(), "Loaded feed list");
        Ok(feeds)
    }
}
