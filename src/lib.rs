//! Polls RSS feeds, filters new items and hands their torrents to a download client.
//!
//! A refresh cycle runs fetch → parse → dedup → filter → acquire → submit →
//! persist for every enabled feed. The ledger in [`storage`] remembers which
//! links were submitted so repeated cycles never submit the same item twice.

pub mod client;
pub mod config;
pub mod feed;
pub mod refresh;
pub mod storage;
pub mod util;

pub use refresh::{CycleReport, FeedError, FeedReport, FeedStats, Refresher};
