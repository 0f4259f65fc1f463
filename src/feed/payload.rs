use std::time::Duration;
use thiserror::Error;

use super::fetcher::{get_bytes, FetchError};
use crate::storage::{CacheError, CachedPayload, PayloadCache};

/// Payloads larger than this are rejected (20MB).
pub const MAX_PAYLOAD_SIZE: usize = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl AcquireError {
    /// True when the payload reached us but could not be written locally.
    pub fn is_persistence(&self) -> bool {
        matches!(self, AcquireError::Cache(CacheError::Write { .. }))
    }
}

/// Download the payload behind `link` and store it in the cache.
///
/// Any failure means "no payload": the item is not submitted and stays out
/// of the ledger, so the next cycle tries again.
pub async fn acquire_payload(
    client: &reqwest::Client,
    cache: &PayloadCache,
    link: &str,
    timeout: Duration,
) -> Result<CachedPayload, AcquireError> {
    let bytes = match get_bytes(client, link, timeout, MAX_PAYLOAD_SIZE).await {
        Ok(bytes) => bytes,
        // Never cache an empty file
        Err(FetchError::EmptyBody) => {
            return Err(CacheError::EmptyPayload(link.to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };

    let cached = cache.store(link, &bytes).await?;
    tracing::debug!(
        link = %link,
        size_bytes = cached.size_bytes,
        path = %cached.path.display(),
        "Payload cached"
    );
    Ok(cached)
}
