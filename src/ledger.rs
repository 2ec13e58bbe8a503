//! Topic ledger: one status record per topic key.
//!
//! Persisted as a single JSON array in `system/topicLedger.json` and
//! rewritten whole on every mutation through the [`AtomicFileStore`].
//! Mutations run under the same [`LockManager`] as the content index, so
//! two processes publishing distinct topics never lose each other's
//! records.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::config::StoreConfig;
use crate::error::{PublishError, Result};
use crate::lock::LockManager;
use crate::store::{AtomicFileStore, StorageBackend};
use crate::types::{PageType, TopicKey, TopicLedgerRecord, TopicStatus};

/// Facts recorded by a successful write of a topic's file.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Page type.
    pub page_type: PageType,
    /// Slug the file was written under.
    pub slug: String,
    /// Normalized body hash.
    pub content_hash: String,
    /// Source URLs.
    pub sources_used: Vec<String>,
    /// Token sketch of the body.
    pub fingerprint: Vec<u64>,
}

/// Ledger store.
pub struct TopicLedger<B: StorageBackend> {
    store: AtomicFileStore<B>,
    lock: Arc<LockManager<B>>,
    path: PathBuf,
}

impl<B: StorageBackend> TopicLedger<B> {
    /// Create a ledger for `config.ledger_path()`.
    pub fn new(config: &StoreConfig, store: AtomicFileStore<B>, lock: Arc<LockManager<B>>) -> Self {
        Self {
            store,
            lock,
            path: config.ledger_path(),
        }
    }

    /// All records, in file order. A missing ledger is empty.
    pub fn all(&self) -> Result<Vec<TopicLedgerRecord>> {
        match self.store.read_json::<Vec<TopicLedgerRecord>>(&self.path) {
            Ok(records) => Ok(records),
            Err(PublishError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Record for `topic_key`.
    pub fn get(&self, topic_key: &TopicKey) -> Result<Option<TopicLedgerRecord>> {
        Ok(self.all()?.into_iter().find(|r| &r.topic_key == topic_key))
    }

    /// Published record owning `slug` within `page_type`.
    pub fn find_published_by_slug(
        &self,
        page_type: PageType,
        slug: &str,
    ) -> Result<Option<TopicLedgerRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|r| r.page_type == page_type && r.is_published_as(slug)))
    }

    /// Any record, whatever its status, that claims `slug` within `page_type`.
    pub fn find_by_slug(&self, page_type: PageType, slug: &str) -> Result<Option<TopicLedgerRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|r| r.page_type == page_type && !r.slug.is_empty() && r.slug == slug))
    }

    /// Merge `record` into the ledger.
    ///
    /// Empty slug, hash, sources and fingerprint on the incoming record keep
    /// the stored values; `attempts` never decreases.
    pub fn upsert(&self, record: TopicLedgerRecord) -> Result<TopicLedgerRecord> {
        let topic_key = record.topic_key.clone();
        self.mutate(&topic_key, move |existing| {
            let merged = match existing {
                Some(old) => merge(old, record),
                None => record,
            };
            Ok(merged)
        })
    }

    /// Mark a topic published and clear its last error.
    pub fn mark_published(
        &self,
        topic_key: &TopicKey,
        publication: Publication,
    ) -> Result<TopicLedgerRecord> {
        self.lock
            .with_lock(|| self.mark_published_held(topic_key, publication))
    }

    /// Record a written-but-unlisted topic as `draft`.
    pub fn mark_draft(&self, topic_key: &TopicKey, publication: Publication) -> Result<TopicLedgerRecord> {
        self.lock.with_lock(|| self.mark_draft_held(topic_key, publication))
    }

    /// [`Self::mark_published`] for a caller already holding the store lock.
    pub(crate) fn mark_published_held(
        &self,
        topic_key: &TopicKey,
        publication: Publication,
    ) -> Result<TopicLedgerRecord> {
        let record = self.mutate_held(topic_key, |existing| {
            let mut record = existing
                .unwrap_or_else(|| TopicLedgerRecord::new(topic_key.clone(), publication.page_type, TopicStatus::Published));
            apply(&mut record, publication, TopicStatus::Published);
            record.last_published_at = Some(record.last_updated_at);
            Ok(record)
        })?;
        tracing::info!(
            topic_key = %record.topic_key,
            slug = %record.slug,
            attempts = record.attempts,
            "ledger marked published"
        );
        Ok(record)
    }

    /// [`Self::mark_draft`] for a caller already holding the store lock.
    pub(crate) fn mark_draft_held(
        &self,
        topic_key: &TopicKey,
        publication: Publication,
    ) -> Result<TopicLedgerRecord> {
        self.mutate_held(topic_key, |existing| {
            let mut record = existing
                .unwrap_or_else(|| TopicLedgerRecord::new(topic_key.clone(), publication.page_type, TopicStatus::Draft));
            apply(&mut record, publication, TopicStatus::Draft);
            Ok(record)
        })
    }

    /// Mark a topic failed. Prior slug and hash are kept.
    pub fn mark_failed(
        &self,
        topic_key: &TopicKey,
        page_type: PageType,
        error: impl Into<String>,
    ) -> Result<TopicLedgerRecord> {
        let error = error.into();
        let record = self.mutate(topic_key, |existing| {
            let mut record = existing
                .unwrap_or_else(|| TopicLedgerRecord::new(topic_key.clone(), page_type, TopicStatus::Failed));
            record.status = TopicStatus::Failed;
            record.last_error = Some(error);
            record.attempts += 1;
            record.last_updated_at = Utc::now();
            Ok(record)
        })?;
        tracing::warn!(
            topic_key = %record.topic_key,
            attempts = record.attempts,
            retried = record.has_published_before(),
            "ledger marked failed"
        );
        Ok(record)
    }

    /// Change the status of an existing record.
    pub fn set_status(&self, topic_key: &TopicKey, status: TopicStatus) -> Result<TopicLedgerRecord> {
        self.mutate(topic_key, |existing| {
            let mut record = existing.ok_or_else(|| {
                PublishError::validation("topicKey", format!("no ledger record for `{topic_key}`"))
            })?;
            record.status = status;
            record.last_updated_at = Utc::now();
            Ok(record)
        })
    }

    fn mutate<F>(&self, topic_key: &TopicKey, f: F) -> Result<TopicLedgerRecord>
    where
        F: FnOnce(Option<TopicLedgerRecord>) -> Result<TopicLedgerRecord>,
    {
        self.lock.with_lock(|| self.mutate_held(topic_key, f))
    }

    fn mutate_held<F>(&self, topic_key: &TopicKey, f: F) -> Result<TopicLedgerRecord>
    where
        F: FnOnce(Option<TopicLedgerRecord>) -> Result<TopicLedgerRecord>,
    {
        let mut records = self.all()?;
        let position = records.iter().position(|r| &r.topic_key == topic_key);
        let existing = position.map(|i| records[i].clone());
        let updated = f(existing)?;
        match position {
            Some(i) => records[i] = updated.clone(),
            None => records.push(updated.clone()),
        }
        self.store.write_json(&self.path, &records)?;
        Ok(updated)
    }
}

fn apply(record: &mut TopicLedgerRecord, publication: Publication, status: TopicStatus) {
    record.page_type = publication.page_type;
    record.status = status;
    record.slug = publication.slug;
    record.content_hash = publication.content_hash;
    record.sources_used = publication.sources_used;
    record.fingerprint = publication.fingerprint;
    record.last_error = None;
    record.attempts += 1;
    record.last_updated_at = Utc::now();
}

fn merge(old: TopicLedgerRecord, new: TopicLedgerRecord) -> TopicLedgerRecord {
    TopicLedgerRecord {
        topic_key: new.topic_key,
        page_type: new.page_type,
        slug: if new.slug.is_empty() { old.slug } else { new.slug },
        status: new.status,
        content_hash: if new.content_hash.is_empty() {
            old.content_hash
        } else {
            new.content_hash
        },
        sources_used: if new.sources_used.is_empty() {
            old.sources_used
        } else {
            new.sources_used
        },
        last_published_at: new.last_published_at.or(old.last_published_at),
        last_updated_at: Utc::now(),
        last_error: new.last_error,
        attempts: new.attempts.max(old.attempts),
        fingerprint: if new.fingerprint.is_empty() {
            old.fingerprint
        } else {
            new.fingerprint
        },
    }
}
