//! Content index types.
//!
//! The index holds listing projections only. Bodies, FAQs and sources never
//! enter it: [`ContentIndexEntry`] has no field for them and
//! [`sanitize_entry`] strips anything outside the allowed set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentFlags, PageType};
use crate::canonical_content::word_count;
use crate::error::{PublishError, Result};

/// Maximum keywords kept per entry.
pub const MAX_KEYWORDS: usize = 10;

/// Maximum tags kept per entry.
pub const MAX_TAGS: usize = 5;

/// Current index schema version.
pub const CONTENT_INDEX_VERSION: u32 = 1;

/// Fields an index entry may carry.
pub const ALLOWED_ENTRY_FIELDS: &[&str] = &[
    "slug",
    "title",
    "description",
    "category",
    "state",
    "city",
    "keywords",
    "tags",
    "wordCount",
    "flags",
];

/// Listing flags carried by an index entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryFlags {
    /// Draft flag.
    #[serde(default)]
    pub draft: bool,
    /// Noindex flag.
    #[serde(default)]
    pub noindex: bool,
}

impl From<DocumentFlags> for EntryFlags {
    fn from(flags: DocumentFlags) -> Self {
        Self {
            draft: flags.draft,
            noindex: flags.noindex,
        }
    }
}

/// Minimal listing projection of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContentIndexEntry {
    /// Slug (unique per bucket).
    pub slug: String,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// State.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// City.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Keywords (at most [`MAX_KEYWORDS`]).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Tags (at most [`MAX_TAGS`]).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Body word count.
    #[serde(default)]
    pub word_count: usize,
    /// Flags.
    #[serde(default)]
    pub flags: EntryFlags,
}

impl ContentIndexEntry {
    /// Project a document into its listing entry.
    pub fn project(doc: &Document) -> Self {
        Self {
            slug: doc.slug.clone(),
            title: doc.title.clone(),
            description: doc.description.clone(),
            category: doc.category.clone(),
            state: doc.state.clone(),
            city: doc.city.clone(),
            keywords: doc.keywords.clone(),
            tags: doc.tags.clone(),
            word_count: word_count(&doc.body),
            flags: doc.flags.into(),
        }
        .sanitized()
    }

    /// Truncate array fields to their caps.
    pub fn sanitized(mut self) -> Self {
        self.keywords.truncate(MAX_KEYWORDS);
        self.tags.truncate(MAX_TAGS);
        self
    }

    /// Names of fields whose values differ from `other`.
    pub fn diff_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.slug != other.slug {
            fields.push("slug");
        }
        if self.title != other.title {
            fields.push("title");
        }
        if self.description != other.description {
            fields.push("description");
        }
        if self.category != other.category {
            fields.push("category");
        }
        if self.state != other.state {
            fields.push("state");
        }
        if self.city != other.city {
            fields.push("city");
        }
        if self.keywords != other.keywords {
            fields.push("keywords");
        }
        if self.tags != other.tags {
            fields.push("tags");
        }
        if self.word_count != other.word_count {
            fields.push("wordCount");
        }
        if self.flags != other.flags {
            fields.push("flags");
        }
        fields
    }
}

/// Build an index entry from an arbitrary JSON object, dropping disallowed
/// fields and truncating arrays.
pub fn sanitize_entry(raw: &serde_json::Value) -> Result<ContentIndexEntry> {
    let object = raw
        .as_object()
        .ok_or_else(|| PublishError::validation("entry", "index entry must be a JSON object"))?;

    let mut kept = serde_json::Map::new();
    let mut stripped = 0usize;
    for (key, value) in object {
        if ALLOWED_ENTRY_FIELDS.contains(&key.as_str()) {
            kept.insert(key.clone(), value.clone());
        } else {
            stripped += 1;
        }
    }
    if stripped > 0 {
        tracing::debug!(stripped = stripped, "stripped non-listing fields from index entry");
    }

    let entry: ContentIndexEntry = serde_json::from_value(serde_json::Value::Object(kept))
        .map_err(|e| PublishError::validation("entry", e.to_string()))?;
    Ok(entry.sanitized())
}

/// Aggregate listing projection, one bucket per page type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContentIndex {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Last mutation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Blog posts.
    #[serde(default)]
    pub blog_posts: Vec<ContentIndexEntry>,
    /// Species profiles.
    #[serde(default)]
    pub species: Vec<ContentIndexEntry>,
    /// How-to guides.
    #[serde(default)]
    pub how_to: Vec<ContentIndexEntry>,
    /// Location pages.
    #[serde(default)]
    pub locations: Vec<ContentIndexEntry>,
}

fn default_version() -> u32 {
    CONTENT_INDEX_VERSION
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl ContentIndex {
    /// Empty but valid index.
    pub fn empty() -> Self {
        Self {
            version: CONTENT_INDEX_VERSION,
            last_updated: None,
            blog_posts: Vec::new(),
            species: Vec::new(),
            how_to: Vec::new(),
            locations: Vec::new(),
        }
    }

    /// Entries for one page type.
    pub fn bucket(&self, page_type: PageType) -> &[ContentIndexEntry] {
        match page_type {
            PageType::Blog => &self.blog_posts,
            PageType::Species => &self.species,
            PageType::HowTo => &self.how_to,
            PageType::Location => &self.locations,
        }
    }

    /// Mutable entries for one page type.
    pub fn bucket_mut(&mut self, page_type: PageType) -> &mut Vec<ContentIndexEntry> {
        match page_type {
            PageType::Blog => &mut self.blog_posts,
            PageType::Species => &mut self.species,
            PageType::HowTo => &mut self.how_to,
            PageType::Location => &mut self.locations,
        }
    }

    /// Find an entry by slug.
    pub fn find(&self, page_type: PageType, slug: &str) -> Option<&ContentIndexEntry> {
        self.bucket(page_type).iter().find(|e| e.slug == slug)
    }

    /// Whether an entry exists for `slug`.
    pub fn contains(&self, page_type: PageType, slug: &str) -> bool {
        self.find(page_type, slug).is_some()
    }

    /// Insert or replace the entry with the same slug. Returns `true` if replaced.
    pub fn upsert(&mut self, page_type: PageType, entry: ContentIndexEntry) -> bool {
        let bucket = self.bucket_mut(page_type);
        let before = bucket.len();
        bucket.retain(|e| e.slug != entry.slug);
        let replaced = bucket.len() != before;
        bucket.push(entry);
        replaced
    }

    /// Remove the entry for `slug`. Returns `true` if something was removed.
    pub fn remove(&mut self, page_type: PageType, slug: &str) -> bool {
        let bucket = self.bucket_mut(page_type);
        let before = bucket.len();
        bucket.retain(|e| e.slug != slug);
        bucket.len() != before
    }

    /// Total entries across all buckets.
    pub fn len(&self) -> usize {
        PageType::all().iter().map(|pt| self.bucket(*pt).len()).sum()
    }

    /// Whether every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sort each bucket by slug for stable output.
    pub fn sort(&mut self) {
        for pt in PageType::all() {
            self.bucket_mut(pt).sort_by(|a, b| a.slug.cmp(&b.slug));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(slug: &str) -> ContentIndexEntry {
        sanitize_entry(&json!({"slug": slug, "title": slug})).unwrap()
    }

    #[test]
    fn test_sanitize_strips_body_and_truncates_arrays() {
        let raw = json!({
            "slug": "redfish-101",
            "title": "Redfish 101",
            "body": "long body text",
            "faqs": [{"question": "q", "answer": "a"}],
            "sources": ["https://example.com"],
            "keywords": (0..15).map(|i| format!("k{i}")).collect::<Vec<_>>(),
            "tags": (0..8).map(|i| format!("t{i}")).collect::<Vec<_>>(),
            "wordCount": 950
        });
        let entry = sanitize_entry(&raw).unwrap();
        assert_eq!(entry.keywords.len(), MAX_KEYWORDS);
        assert_eq!(entry.tags.len(), MAX_TAGS);
        let back = serde_json::to_value(&entry).unwrap();
        assert!(back.get("body").is_none());
        assert!(back.get("faqs").is_none());
        assert!(back.get("sources").is_none());
    }

    #[test]
    fn test_sanitize_rejects_non_object() {
        assert!(sanitize_entry(&json!(["slug"])).is_err());
    }

    #[test]
    fn test_missing_arrays_default_to_empty() {
        let index: ContentIndex = serde_json::from_value(json!({"blogPosts": []})).unwrap();
        assert!(index.species.is_empty());
        assert!(index.locations.is_empty());
        assert_eq!(index.version, CONTENT_INDEX_VERSION);
    }

    #[test]
    fn test_unknown_shape_fails_closed() {
        assert!(serde_json::from_value::<ContentIndex>(json!({"blogPosts": "oops"})).is_err());
        assert!(serde_json::from_value::<ContentIndex>(json!({"podcasts": []})).is_err());
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_slug() {
        let mut index = ContentIndex::empty();
        assert!(!index.upsert(PageType::Blog, entry("a")));
        assert!(index.upsert(PageType::Blog, entry("a")));
        index.upsert(PageType::Blog, entry("b"));
        assert_eq!(index.bucket(PageType::Blog).len(), 2);
        assert!(index.remove(PageType::Blog, "a"));
        assert!(!index.contains(PageType::Blog, "a"));
    }
}
