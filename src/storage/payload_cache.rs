use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::{atomic_write, content_key};

/// Directory name for cached payloads inside the cache directory.
const PAYLOAD_DIR: &str = "torrent";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Refusing to cache an empty payload for {0}")]
    EmptyPayload(String),

    #[error("Failed to write cached payload {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A payload that is safely on disk and ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    /// Item link the payload was downloaded from.
    pub link: String,
    /// Cache file holding the raw bytes.
    pub path: PathBuf,
    pub size_bytes: usize,
}

impl CachedPayload {
    /// File name to present to a download client, e.g. `<hash>.torrent`.
    pub fn file_name(&self) -> String {
        let stem = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| content_key(&self.link));
        format!("{stem}.torrent")
    }
}

/// Local copies of downloaded payloads, addressed by the SHA-256 of their link.
///
/// There is at most one file per link and re-downloading overwrites it.
/// Nothing is ever evicted here.
#[derive(Debug, Clone)]
pub struct PayloadCache {
    root: PathBuf,
}

impl PayloadCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join(PAYLOAD_DIR),
        }
    }

    pub fn path_for(&self, link: &str) -> PathBuf {
        self.root.join(content_key(link))
    }

    /// Store `bytes` as the cached copy of `link`.
    ///
    /// Zero-length payloads are rejected without touching the disk: an empty
    /// file is never a usable torrent.
    pub async fn store(&self, link: &str, bytes: &[u8]) -> Result<CachedPayload, CacheError> {
        if bytes.is_empty() {
            return Err(CacheError::EmptyPayload(link.to_string()));
        }

        let path = self.path_for(link);
        atomic_write(&path, bytes)
            .await
            .map_err(|source| CacheError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(CachedPayload {
            link: link.to_string(),
            path,
            size_bytes: bytes.len(),
        })
    }
}
