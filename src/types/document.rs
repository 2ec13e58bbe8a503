//! Document, page type and topic key types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};

/// Kind of page a document renders as.
///
/// Each page type owns one directory under `documents/` and one bucket in
/// the content index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    /// Blog post.
    Blog,
    /// Species profile.
    Species,
    /// How-to guide.
    #[serde(rename = "howto")]
    HowTo,
    /// Location page (state/city).
    Location,
}

impl PageType {
    /// All page types, in index bucket order.
    pub fn all() -> [PageType; 4] {
        [Self::Blog, Self::Species, Self::HowTo, Self::Location]
    }

    /// Parse a page type from its serialized name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "blog" => Some(Self::Blog),
            "species" => Some(Self::Species),
            "howto" => Some(Self::HowTo),
            "location" => Some(Self::Location),
            _ => None,
        }
    }

    /// Serialized name, also used as the topic key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blog => "blog",
            Self::Species => "species",
            Self::HowTo => "howto",
            Self::Location => "location",
        }
    }

    /// Directory under `documents/`.
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    /// Bucket name inside `contentIndex.json`.
    pub fn bucket_name(&self) -> &'static str {
        match self {
            Self::Blog => "blogPosts",
            Self::Species => "species",
            Self::HowTo => "howTo",
            Self::Location => "locations",
        }
    }

    /// URL prefix used for cache revalidation.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            Self::Blog => "/blog",
            Self::Species => "/species",
            Self::HowTo => "/how-to",
            Self::Location => "/locations",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable logical identity of a content item: `"<pageType>::<identifier...>"`.
///
/// Survives regenerations and retries; independent of the current slug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicKey(String);

impl TopicKey {
    /// Separator between the page type prefix and identifier parts.
    pub const SEPARATOR: &'static str = "::";

    /// Derive a topic key from a page type and identifier parts.
    ///
    /// Parts are lowercased and non-alphanumeric runs collapse to `-`.
    pub fn derive(page_type: PageType, parts: &[&str]) -> Self {
        let mut key = String::from(page_type.as_str());
        for part in parts {
            let normalized = normalize_identifier(part);
            if normalized.is_empty() {
                continue;
            }
            key.push_str(Self::SEPARATOR);
            key.push_str(&normalized);
        }
        Self(key)
    }

    /// Parse and validate an existing topic key.
    pub fn parse(s: &str) -> Result<Self> {
        let (prefix, rest) = s
            .split_once(Self::SEPARATOR)
            .ok_or_else(|| PublishError::validation("topicKey", format!("`{s}` has no `::` separator")))?;
        if PageType::from_str(prefix).is_none() {
            return Err(PublishError::validation(
                "topicKey",
                format!("unknown page type prefix `{prefix}`"),
            ));
        }
        if rest.trim().is_empty() {
            return Err(PublishError::validation("topicKey", "empty identifier"));
        }
        Ok(Self(s.to_string()))
    }

    /// Page type encoded in the prefix.
    pub fn page_type(&self) -> Option<PageType> {
        self.0
            .split_once(Self::SEPARATOR)
            .and_then(|(prefix, _)| PageType::from_str(prefix))
    }

    /// Borrow the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_identifier(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut pending_dash = false;
    for ch in part.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Check that a slug is `[a-z0-9]+(-[a-z0-9]+)*`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A cited source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Source title.
    pub title: String,
    /// Source URL.
    pub url: String,
}

/// A frequently asked question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    /// Question text.
    pub question: String,
    /// Answer text.
    pub answer: String,
}

/// Publication dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDates {
    /// First publication time.
    pub published_at: DateTime<Utc>,
    /// Last content update.
    pub updated_at: DateTime<Utc>,
}

impl DocumentDates {
    /// Both dates set to `now`.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            published_at: now,
            updated_at: now,
        }
    }
}

/// Visibility flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFlags {
    /// Not ready for listing.
    #[serde(default)]
    pub draft: bool,
    /// Excluded from search engines and the listing index.
    #[serde(default)]
    pub noindex: bool,
    /// Pulled for review; excluded from the listing index.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub quarantined: bool,
}

impl DocumentFlags {
    /// Whether a document with these flags belongs in the listing index.
    pub fn is_listable(&self) -> bool {
        !self.draft && !self.noindex && !self.quarantined
    }
}

/// A machine-generated page handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Generator-assigned id.
    pub id: String,
    /// Explicit topic key; derived from `page_type` and `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_key: Option<TopicKey>,
    /// URL-facing identifier; also the file and index key.
    pub slug: String,
    /// Page type.
    pub page_type: PageType,
    /// Title.
    pub title: String,
    /// Listing description.
    #[serde(default)]
    pub description: String,
    /// Body text (markdown).
    pub body: String,
    /// Cited sources.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// FAQs.
    #[serde(default)]
    pub faqs: Vec<Faq>,
    /// Dates.
    pub dates: DocumentDates,
    /// Flags.
    #[serde(default)]
    pub flags: DocumentFlags,
    /// SEO keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Category (blog/howto).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// State (location/species range).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// City (location).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Type-specific fields carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Document {
    /// Create a minimal document. Listing fields default to empty.
    pub fn new(
        id: impl Into<String>,
        slug: impl Into<String>,
        page_type: PageType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic_key: None,
            slug: slug.into(),
            page_type,
            title: title.into(),
            description: String::new(),
            body: body.into(),
            sources: Vec::new(),
            faqs: Vec::new(),
            dates: DocumentDates::now(),
            flags: DocumentFlags::default(),
            keywords: Vec::new(),
            tags: Vec::new(),
            category: None,
            state: None,
            city: None,
            extra: BTreeMap::new(),
        }
    }

    /// Set an explicit topic key.
    pub fn with_topic_key(mut self, topic_key: TopicKey) -> Self {
        self.topic_key = Some(topic_key);
        self
    }

    /// Topic key, explicit or derived from `page_type` and `id`.
    pub fn topic_key(&self) -> TopicKey {
        self.topic_key
            .clone()
            .unwrap_or_else(|| TopicKey::derive(self.page_type, &[&self.id]))
    }

    /// Source URLs, in order.
    pub fn source_urls(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.url.clone()).collect()
    }

    /// Validate required fields.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PublishError::validation("id", "must not be empty"));
        }
        if !is_valid_slug(&self.slug) {
            return Err(PublishError::validation(
                "slug",
                format!("`{}` is not a lowercase hyphenated slug", self.slug),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(PublishError::validation("title", "must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(PublishError::validation("body", "must not be empty"));
        }
        if let Some(key) = &self.topic_key {
            match key.page_type() {
                Some(pt) if pt == self.page_type => {}
                _ => {
                    return Err(PublishError::validation(
                        "topicKey",
                        format!("`{key}` does not match page type `{}`", self.page_type),
                    ))
                }
            }
        }
        for source in &self.sources {
            if source.url.trim().is_empty() {
                return Err(PublishError::validation("sources", "source url must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_key_derive_normalizes_parts() {
        let key = TopicKey::derive(PageType::Location, &["Texas", "Port Aransas"]);
        assert_eq!(key.as_str(), "location::texas::port-aransas");
        assert_eq!(key.page_type(), Some(PageType::Location));
    }

    #[test]
    fn test_topic_key_parse_rejects_unknown_prefix() {
        assert!(TopicKey::parse("blog::redfish-101").is_ok());
        assert!(TopicKey::parse("podcast::episode-1").is_err());
        assert!(TopicKey::parse("redfish-101").is_err());
        assert!(TopicKey::parse("blog::  ").is_err());
    }

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("redfish-101"));
        assert!(!is_valid_slug("Redfish-101"));
        assert!(!is_valid_slug("redfish--101"));
        assert!(!is_valid_slug("-redfish"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn test_derived_topic_key_uses_id() {
        let doc = Document::new("redfish-101", "redfish-101", PageType::Blog, "Redfish", "body");
        assert_eq!(doc.topic_key().as_str(), "blog::redfish-101");
    }

    #[test]
    fn test_validate_rejects_mismatched_topic_prefix() {
        let doc = Document::new("x", "x", PageType::Blog, "X", "body")
            .with_topic_key(TopicKey::parse("species::x").unwrap());
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, PublishError::Validation { field: "topicKey", .. }));
    }

    #[test]
    fn test_document_json_roundtrip_keeps_extra_fields() {
        let json = serde_json::json!({
            "id": "red-drum",
            "slug": "red-drum",
            "pageType": "species",
            "title": "Red Drum",
            "body": "text",
            "dates": {"publishedAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-02T00:00:00Z"},
            "scientificName": "Sciaenops ocellatus"
        });
        let doc: Document = serde_json::from_value(json).unwrap();
        assert_eq!(doc.page_type, PageType::Species);
        assert_eq!(
            doc.extra.get("scientificName").and_then(|v| v.as_str()),
            Some("Sciaenops ocellatus")
        );
        assert!(doc.flags.is_listable());
    }
}
