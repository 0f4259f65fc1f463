//! Download clients that accept a cached torrent plus placement metadata.

mod noop;
mod qbittorrent;

pub use noop::NoopClient;
pub use qbittorrent::QbittorrentClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::{CachedPayload, Feed};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to read cached payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    #[error("Payload rejected: {0}")]
    Rejected(String),

    #[error("{0} does not accept placement submissions")]
    Unsupported(&'static str),
}

/// Where and how a submitted payload should be placed by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub save_path: String,
    pub category: String,
    /// Tags joined with `,`.
    pub tags: String,
}

impl Placement {
    pub fn for_feed(feed: &Feed) -> Self {
        Self {
            save_path: feed.path.clone(),
            category: feed.category.clone(),
            tags: feed.tags.join(","),
        }
    }
}

/// Unified download client interface.
#[async_trait]
pub trait AcquisitionClient: Send + Sync {
    /// Client type name (for logging).
    fn client_type(&self) -> &'static str;

    /// Whether [`add_payload`](Self::add_payload) can be used at all.
    ///
    /// Clients answering `false` never receive submissions.
    fn supports_placement_submission(&self) -> bool;

    /// Hand a cached payload to the client. `Ok` means the client took it.
    async fn add_payload(
        &self,
        payload: &CachedPayload,
        placement: &Placement,
    ) -> Result<(), ClientError>;
}
