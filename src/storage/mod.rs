//! On-disk state: the feed list, the submission ledger and the payload cache.

mod feeds;
mod ledger;
mod payload_cache;
mod types;

pub use feeds::{FeedStore, FeedStoreError};
pub use ledger::{filter_downloaded, Ledger, LedgerError};
pub use payload_cache::{CacheError, CachedPayload, PayloadCache};
pub use types::{CandidateItem, Feed};
