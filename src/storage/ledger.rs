//! Durable per-feed record of links that were already submitted.
//!
//! Each feed owns one partition file named after the SHA-256 of its link,
//! grouped in a directory per feed host:
//!
//! ```text
//! <data_dir>/downloaded/<host>/<sha256(feed link)>
//! ```
//!
//! A partition holds one link per line. Line order carries no meaning and
//! empty lines are never written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use super::types::CandidateItem;
use crate::util::{atomic_write, content_key};

/// Directory name for ledger partitions inside the data directory.
const LEDGER_DIR: &str = "downloaded";

/// Host directory used when a feed link has no parseable host.
const UNKNOWN_HOST: &str = "_unknown";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger partition {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write ledger partition {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File-backed ledger store.
///
/// Cloning is cheap and clones share the per-feed locks, so every handle
/// serializes access to the same partition.
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Ledger {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(LEDGER_DIR),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire exclusive access to a feed's partition.
    ///
    /// The guard must be held for the whole read-modify-write of one refresh;
    /// a second refresh of the same feed waits here until the first is done.
    pub async fn lock(&self, feed_link: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(feed_link.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Location of the partition for `feed_link`.
    pub fn partition_path(&self, feed_link: &str) -> PathBuf {
        self.root
            .join(host_dir(feed_link))
            .join(content_key(feed_link))
    }

    /// Links already submitted for `feed_link`. Empty if nothing was recorded yet.
    pub async fn load(&self, feed_link: &str) -> Result<HashSet<String>, LedgerError> {
        let path = self.partition_path(feed_link);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(parse_partition(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(source) => Err(LedgerError::Read { path, source }),
        }
    }

    /// Merge `submitted` into the partition for `feed_link`.
    ///
    /// The current on-disk contents are re-read and unioned with `submitted`
    /// before the partition is atomically replaced, so links recorded by an
    /// earlier refresh are never dropped. Empty links and links containing a
    /// line break are not recorded. Returns the size of the merged set.
    pub async fn save(
        &self,
        feed_link: &str,
        submitted: &HashSet<String>,
    ) -> Result<usize, LedgerError> {
        let path = self.partition_path(feed_link);

        let mut merged = self.load(feed_link).await?;
        for link in submitted {
            if link.is_empty() {
                continue;
            }
            // A line break would split the link into two entries that never match again
            if link.contains(['\n', '\r']) {
                tracing::warn!(link = %link.escape_debug(), "Refusing to record link containing a line break");
                continue;
            }
            merged.insert(link.clone());
        }

        let mut lines: Vec<&str> = merged.iter().map(String::as_str).collect();
        lines.sort_unstable();
        let text = lines.join("\n");

        atomic_write(&path, text.as_bytes())
            .await
            .map_err(|source| LedgerError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            added = submitted.len(),
            total = merged.len(),
            "Ledger partition saved"
        );
        Ok(merged.len())
    }
}

/// Candidates whose link has not been submitted yet.
///
/// Pure set difference keyed on the link; titles play no part.
pub fn filter_downloaded(
    downloaded: &HashSet<String>,
    candidates: Vec<CandidateItem>,
) -> Vec<CandidateItem> {
    candidates
        .into_iter()
        .filter(|item| !downloaded.contains(&item.link))
        .collect()
}

fn parse_partition(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn host_dir(feed_link: &str) -> String {
    let host = url::Url::parse(feed_link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));

    match host {
        Some(host) if !host.is_empty() => host
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
        _ => UNKNOWN_HOST.to_string(),
    }
}
