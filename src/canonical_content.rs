//! Canonical content transformation for deterministic hashing.
//!
//! ## Canonical Content Specification
//!
//! ```text
//! normalize(text) = collapse_ws(strip_punct(lowercase(text)))
//! content_hash(text) = hex(SHA256(UTF-8(normalize(text))))
//! ```
//!
//! Where:
//! - `lowercase`: Unicode lowercase
//! - `strip_punct`: every character that is neither alphanumeric nor
//!   whitespace is removed
//! - `collapse_ws`: runs of whitespace become one space, ends trimmed
//!
//! Two bodies differing only in case, punctuation or spacing share a hash.
//! Only the body is hashed; title, dates and metadata are excluded so that
//! metadata-only regenerations are recognized as unchanged content.

use sha2::{Digest, Sha256};

/// Version of the canonical content specification.
///
/// Changes to the normalization invalidate all stored content hashes.
pub const CANONICAL_CONTENT_VERSION: &str = "2.0.0";

/// Normalize text to canonical form.
///
/// # Example
///
/// ```rust
/// use publish_kernel::canonical_content::normalize_text;
///
/// assert_eq!(normalize_text("  Hello,\r\n  WORLD!  "), "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
        } else if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// Normalized tokens of `text`, in order.
pub fn tokens(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of whitespace-separated words containing at least one
/// alphanumeric character.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Compute the SHA-256 content hash of canonical content.
///
/// Returned as a 64-character lowercase hex string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify that a stored hash matches the hash of `text`.
///
/// Uses constant-time comparison.
pub fn verify_content_hash(text: &str, expected_hash: &str) -> bool {
    let computed = content_hash(text);
    if computed.len() != expected_hash.len() {
        return false;
    }
    computed
        .bytes()
        .zip(expected_hash.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
