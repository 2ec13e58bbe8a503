//! Core types for the publish kernel.

pub mod document;
pub mod ledger;
pub mod index;
pub mod job;

pub use document::{
    Document, DocumentDates, DocumentFlags, Faq, PageType, Source, TopicKey, is_valid_slug,
};
pub use ledger::{TopicLedgerRecord, TopicStatus};
pub use index::{
    ContentIndex, ContentIndexEntry, EntryFlags, sanitize_entry,
    ALLOWED_ENTRY_FIELDS, CONTENT_INDEX_VERSION, MAX_KEYWORDS, MAX_TAGS,
};
pub use job::{Job, JobStatus, JobType, JobUpdate, DEFAULT_MAX_ATTEMPTS};
