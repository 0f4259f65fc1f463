//! Feed pipeline stages: fetching, parsing, filtering and payload download.
//!
//! - [`fetcher`] - Shared HTTP client and bounded single-shot GETs
//! - [`parser`] - RSS 2.0 documents into deduplicated candidate items
//! - [`filter`] - Include/exclude rules, literal or regular expression
//! - [`payload`] - Download and cache the torrent behind an item
//!
//! # Example
//!
//! ```ignore
//! use crate::feed::{fetch_feed, parse_feed, ContentFilter};
//!
//! let bytes = fetch_feed(&client, &feed.link, timeout).await?;
//! let items = parse_feed(&bytes)?;
//! let filter = ContentFilter::new(&feed.includes, &feed.excludes, feed.regex)?;
//! let accepted = filter.apply(items);
//! ```

mod fetcher;
mod filter;
mod parser;
mod payload;

pub use fetcher::{build_http_client, fetch_feed, FetchError, MAX_FEED_SIZE};
pub use filter::{ContentFilter, FilterError};
pub use parser::{parse_feed, ParseError};
pub use payload::{acquire_payload, AcquireError, MAX_PAYLOAD_SIZE};
