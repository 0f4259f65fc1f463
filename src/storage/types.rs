use serde::{Deserialize, Serialize};

// ============================================================================
// Feed
// ============================================================================

/// A configured feed subscription, as stored in `feeds.json`.
///
/// Every field is optional in the JSON document and falls back to its
/// default, so a hand-edited file only needs the keys it cares about.
/// The refresh pipeline only reads feeds; it never writes them back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feed {
    /// Display name, only used in logs.
    pub title: String,
    /// Feed URL. Also the key of the feed's ledger partition.
    pub link: String,
    /// Save path handed to the download client.
    pub path: String,
    /// Category handed to the download client.
    pub category: String,
    /// Tags handed to the download client, joined with `,`.
    pub tags: Vec<String>,
    /// Item titles must match at least one of these (when non-empty).
    pub includes: Vec<String>,
    /// Item titles matching any of these are dropped.
    pub excludes: Vec<String>,
    /// Treat `includes`/`excludes` as regular expressions instead of substrings.
    pub regex: bool,
    /// Disabled feeds are skipped entirely.
    pub enabled: bool,
}

impl Feed {
    /// Name used in log output: the title when set, otherwise the link.
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.link
        } else {
            &self.title
        }
    }
}

// ============================================================================
// Candidate Item
// ============================================================================

/// One entry extracted from a feed document.
///
/// Equality covers both fields: an item that carries an enclosure and a
/// permalink yields two candidates with the same title and distinct links.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateItem {
    pub title: String,
    pub link: String,
}

impl CandidateItem {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }
}
