//! Exact and near-duplicate detection against the topic ledger.
//!
//! ## Fingerprints
//!
//! ```text
//! sketch(text) = k smallest distinct xxh64(token) over tokens(normalize(text))
//! J(A, B) ≈ |S_k(A ∪ B) ∩ S(A) ∩ S(B)| / |S_k(A ∪ B)|
//! ```
//!
//! The exact hash comparison is authoritative. The sketch estimate is a
//! pre-filter: a hit produces a warning, not a rejection.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::canonical::token_hash;
use crate::canonical_content::{content_hash, tokens};
use crate::error::{PublishError, Result};
use crate::ledger::TopicLedger;
use crate::store::StorageBackend;
use crate::types::{PageType, TopicKey, TopicLedgerRecord, TopicStatus};

/// Number of hashes kept per sketch.
pub const SKETCH_SIZE: usize = 128;

/// Highest numeric suffix tried by slug collision resolution.
pub const MAX_SLUG_SUFFIX: u32 = 100;

/// Bottom-k sketch of the distinct normalized tokens of `text`, ascending.
pub fn token_sketch(text: &str) -> Vec<u64> {
    let hashes: BTreeSet<u64> = tokens(text).iter().map(|t| token_hash(t)).collect();
    hashes.into_iter().take(SKETCH_SIZE).collect()
}

/// Estimated Jaccard similarity of two sketches, in `[0, 1]`.
///
/// Exact when both token sets together hold at most [`SKETCH_SIZE`] tokens.
pub fn sketch_similarity(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: BTreeSet<u64> = a.iter().copied().collect();
    let b: BTreeSet<u64> = b.iter().copied().collect();
    let union: Vec<u64> = a.union(&b).copied().take(SKETCH_SIZE).collect();
    let shared = union
        .iter()
        .filter(|h| a.contains(h) && b.contains(h))
        .count();
    shared as f64 / union.len() as f64
}

/// Closest published topic by sketch similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicate {
    /// Topic holding the similar body.
    pub topic_key: TopicKey,
    /// Estimated Jaccard similarity.
    pub similarity: f64,
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    /// Hash of the checked text.
    pub content_hash: String,
    /// Sketch of the checked text.
    pub fingerprint: Vec<u64>,
    /// Published topic with an identical hash.
    pub exact: Option<TopicKey>,
    /// Most similar published topic.
    pub nearest: Option<NearDuplicate>,
}

impl DuplicateCheck {
    /// Whether the text is an exact or near duplicate at `threshold`.
    pub fn is_near_duplicate(&self, threshold: f64) -> bool {
        self.exact.is_some()
            || self
                .nearest
                .as_ref()
                .map(|n| n.similarity >= threshold)
                .unwrap_or(false)
    }
}

/// Duplicate checks backed by the ledger.
pub struct Deduplicator<B: StorageBackend> {
    ledger: Arc<TopicLedger<B>>,
    threshold: f64,
}

impl<B: StorageBackend> Deduplicator<B> {
    /// Create a deduplicator with a near-duplicate threshold.
    pub fn new(ledger: Arc<TopicLedger<B>>, threshold: f64) -> Self {
        Self { ledger, threshold }
    }

    /// Near-duplicate threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `text` against every published record except `exclude`.
    pub fn find_duplicate(&self, text: &str, exclude: Option<&TopicKey>) -> Result<DuplicateCheck> {
        let records = self.ledger.all()?;
        Ok(check_against(&records, text, exclude))
    }

    /// Whether `text` duplicates any published topic.
    pub fn is_near_duplicate(&self, text: &str) -> Result<bool> {
        Ok(self.find_duplicate(text, None)?.is_near_duplicate(self.threshold))
    }

    /// Whether `topic_key` is currently published.
    pub fn topic_key_exists(&self, topic_key: &TopicKey) -> Result<bool> {
        Ok(self
            .ledger
            .get(topic_key)?
            .map(|r| r.status == TopicStatus::Published)
            .unwrap_or(false))
    }

    /// First slug, starting at `desired`, not published by another topic.
    ///
    /// Candidates are `desired`, `desired-2`, `desired-3`, ...
    pub fn resolve_slug_collision(
        &self,
        page_type: PageType,
        desired: &str,
        topic_key: &TopicKey,
    ) -> Result<String> {
        let records = self.ledger.all()?;
        let taken = |slug: &str| {
            records.iter().any(|r| {
                r.page_type == page_type && r.is_published_as(slug) && &r.topic_key != topic_key
            })
        };

        if !taken(desired) {
            return Ok(desired.to_string());
        }
        for suffix in 2..=MAX_SLUG_SUFFIX {
            let candidate = format!("{desired}-{suffix}");
            if !taken(&candidate) {
                tracing::debug!(desired = desired, resolved = %candidate, "slug collision resolved");
                return Ok(candidate);
            }
        }
        Err(PublishError::SlugExhausted(desired.to_string()))
    }
}

/// Duplicate check over an in-memory record set.
pub fn check_against(
    records: &[TopicLedgerRecord],
    text: &str,
    exclude: Option<&TopicKey>,
) -> DuplicateCheck {
    let hash = content_hash(text);
    let fingerprint = token_sketch(text);

    let mut exact = None;
    let mut nearest: Option<NearDuplicate> = None;
    for record in records {
        if record.status != TopicStatus::Published || Some(&record.topic_key) == exclude {
            continue;
        }
        if exact.is_none() && record.content_hash == hash {
            exact = Some(record.topic_key.clone());
        }
        let similarity = sketch_similarity(&fingerprint, &record.fingerprint);
        if nearest.as_ref().map_or(true, |n| similarity > n.similarity) && similarity > 0.0 {
            nearest = Some(NearDuplicate {
                topic_key: record.topic_key.clone(),
                similarity,
            });
        }
    }

    DuplicateCheck {
        content_hash: hash,
        fingerprint,
        exact,
        nearest,
    }
}
