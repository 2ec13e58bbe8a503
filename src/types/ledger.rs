//! Topic ledger record types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{PageType, TopicKey};

/// Publication status of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    /// Live: file and index entry exist.
    Published,
    /// Written but not listed.
    Draft,
    /// Last attempt failed.
    Failed,
    /// Retired.
    Archived,
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published => write!(f, "published"),
            Self::Draft => write!(f, "draft"),
            Self::Failed => write!(f, "failed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// Latest known state of a topic. History is not kept beyond `attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicLedgerRecord {
    /// Topic identity.
    pub topic_key: TopicKey,
    /// Page type.
    pub page_type: PageType,
    /// Slug of the last successful publish (empty if never published).
    #[serde(default)]
    pub slug: String,
    /// Status.
    pub status: TopicStatus,
    /// SHA-256 of the normalized body (empty if never published).
    #[serde(default)]
    pub content_hash: String,
    /// Source URLs used by the last publish.
    #[serde(default)]
    pub sources_used: Vec<String>,
    /// Last successful publish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_published_at: Option<DateTime<Utc>>,
    /// Last mutation time.
    pub last_updated_at: DateTime<Utc>,
    /// Error from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of publish attempts recorded.
    #[serde(default)]
    pub attempts: u32,
    /// Bottom-k token sketch of the normalized body, for near-duplicate checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<u64>,
}

impl TopicLedgerRecord {
    /// Fresh record with no publish history.
    pub fn new(topic_key: TopicKey, page_type: PageType, status: TopicStatus) -> Self {
        Self {
            topic_key,
            page_type,
            slug: String::new(),
            status,
            content_hash: String::new(),
            sources_used: Vec::new(),
            last_published_at: None,
            last_updated_at: Utc::now(),
            last_error: None,
            attempts: 0,
            fingerprint: Vec::new(),
        }
    }

    /// Whether this record is live under `slug`.
    pub fn is_published_as(&self, slug: &str) -> bool {
        self.status == TopicStatus::Published && self.slug == slug
    }

    /// Whether a previous publish succeeded at some point.
    pub fn has_published_before(&self) -> bool {
        self.last_published_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TopicStatus::Published).unwrap();
        assert_eq!(json, "\"published\"");
    }

    #[test]
    fn test_record_decodes_without_optional_fields() {
        let json = serde_json::json!({
            "topicKey": "blog::redfish-101",
            "pageType": "blog",
            "status": "failed",
            "lastUpdatedAt": "2026-03-01T12:00:00Z"
        });
        let record: TopicLedgerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, TopicStatus::Failed);
        assert!(record.slug.is_empty());
        assert!(!record.has_published_before());
    }
}
