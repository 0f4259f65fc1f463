//! Utility functions shared by the storage layers.
//!
//! - **Content addressing**: SHA-256 keys for ledger partitions and cached payloads
//! - **Atomic writes**: write-to-temp-then-rename so a crash never leaves a torn file

mod fs;

pub use fs::atomic_write;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
///
/// Used as the on-disk name for anything keyed by a URL, so names stay
/// filesystem-safe regardless of what the URL contains.
///
/// ```
/// use feedpull::util::content_key;
///
/// assert_eq!(
///     content_key("abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn content_key(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
