//! Publish coordinator.
//!
//! ## State Machine
//!
//! ```text
//!              observe(file, index entry, ledger record)
//!                              │
//!        ┌──────────────┬──────┴──────────┬────────────────────┐
//!        ▼              ▼                 ▼                    ▼
//!    Conflict    AlreadyPublished  PartiallyPublished     NotPublished
//!   (reject)        (no-op)        (missing steps only)   (gate, dedup,
//!                                                          file, ledger,
//!                                                          index)
//! ```
//!
//! The observed facts are turned into a [`PublishPlan`]; executing the plan
//! is the only place durable writes happen. The ledger and index steps run
//! under a single lock acquisition. If either fails after this call wrote
//! the document file, the file is restored to its previous bytes (or deleted
//! if it did not exist) and the ledger records the failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::canonical_content::content_hash;
use crate::collaborators::{
    CacheRevalidator, LinkSuggester, LinkSuggestion, NoopLinkSuggester, NoopRevalidator,
};
use crate::config::StoreConfig;
use crate::dedup::Deduplicator;
use crate::error::{PublishError, Result};
use crate::incident::{raise, Incident, IncidentType, NoOpMetrics, PublishAttempt, PublishMetrics};
use crate::index::ContentIndexStore;
use crate::ledger::{Publication, TopicLedger};
use crate::lock::LockManager;
use crate::quality::{QualityGate, QualityPolicy, QualityReport, QualityWarning};
use crate::store::{AtomicFileStore, StorageBackend};
use crate::types::{ContentIndexEntry, Document, PageType, TopicKey, TopicLedgerRecord, TopicStatus};

/// Publication state derived from the observed facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    /// File, index entry and ledger record all present and current.
    AlreadyPublished,
    /// Some but not all of the three are present or current.
    PartiallyPublished,
    /// None of the three are present.
    NotPublished,
}

/// Steps a publish will execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishPlan {
    /// Write the document file.
    pub write_file: bool,
    /// Record the topic in the ledger.
    pub write_ledger: bool,
    /// Upsert the index entry.
    pub write_index: bool,
    /// Remove a stale index entry (document no longer listable).
    pub remove_index_entry: bool,
}

impl PublishPlan {
    /// Whether nothing needs to be written.
    pub fn is_noop(&self) -> bool {
        !self.write_file && !self.write_ledger && !self.write_index && !self.remove_index_entry
    }
}

/// What a publish call did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    /// Topic key.
    pub topic_key: TopicKey,
    /// Page type.
    pub page_type: PageType,
    /// Slug.
    pub slug: String,
    /// Canonical file path.
    pub path: PathBuf,
    /// Normalized body hash.
    pub content_hash: String,
    /// State observed before executing.
    pub state: PublishState,
    /// Steps executed.
    pub plan: PublishPlan,
    /// Ledger status after the call.
    pub status: TopicStatus,
    /// Quality and near-duplicate warnings.
    pub warnings: Vec<QualityWarning>,
    /// Suggestions from the link suggester.
    pub link_suggestions: Vec<LinkSuggestion>,
}

impl PublishOutcome {
    /// Metrics outcome label.
    pub fn label(&self) -> &'static str {
        if self.plan.is_noop() {
            "skipped"
        } else if self.status == TopicStatus::Draft {
            "draft"
        } else {
            "published"
        }
    }
}

/// Facts observed before planning.
struct Observation {
    /// Bytes of the file at the canonical path, parseable or not.
    prior_bytes: Option<Vec<u8>>,
    /// The file, if it parses as a valid document of this topic.
    on_disk: Option<Document>,
    index_entry: Option<ContentIndexEntry>,
    record: Option<TopicLedgerRecord>,
}

/// Coordinates file, ledger and index writes for one store.
pub struct PublishCoordinator<B: StorageBackend> {
    config: StoreConfig,
    backend: Arc<B>,
    store: AtomicFileStore<B>,
    lock: Arc<LockManager<B>>,
    ledger: Arc<TopicLedger<B>>,
    index: ContentIndexStore<B>,
    dedup: Deduplicator<B>,
    gate: QualityGate,
    metrics: Arc<dyn PublishMetrics>,
    revalidator: Arc<dyn CacheRevalidator>,
    link_suggester: Arc<dyn LinkSuggester>,
}

impl<B: StorageBackend> PublishCoordinator<B> {
    /// Create a coordinator with the default quality policy and no-op
    /// metrics and collaborators.
    pub fn new(config: StoreConfig, backend: Arc<B>) -> Result<Self> {
        let metrics: Arc<dyn PublishMetrics> = Arc::new(NoOpMetrics);
        let (store, lock, ledger, index, dedup) = assemble(&config, &backend, &metrics);
        Ok(Self {
            config,
            backend,
            store,
            lock,
            ledger,
            index,
            dedup,
            gate: QualityGate::new(QualityPolicy::default())?,
            metrics,
            revalidator: Arc::new(NoopRevalidator),
            link_suggester: Arc::new(NoopLinkSuggester),
        })
    }

    /// Report attempts and incidents to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn PublishMetrics>) -> Self {
        let (store, lock, ledger, index, dedup) = assemble(&self.config, &self.backend, &metrics);
        self.store = store;
        self.lock = lock;
        self.ledger = ledger;
        self.index = index;
        self.dedup = dedup;
        self.metrics = metrics;
        self
    }

    /// Call `revalidator` after each commit.
    pub fn with_revalidator(mut self, revalidator: Arc<dyn CacheRevalidator>) -> Self {
        self.revalidator = revalidator;
        self
    }

    /// Call `suggester` after each listable commit.
    pub fn with_link_suggester(mut self, suggester: Arc<dyn LinkSuggester>) -> Self {
        self.link_suggester = suggester;
        self
    }

    /// Replace the quality policy.
    pub fn with_quality_policy(mut self, policy: QualityPolicy) -> Result<Self> {
        self.gate = QualityGate::new(policy)?;
        Ok(self)
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Topic ledger.
    pub fn ledger(&self) -> &TopicLedger<B> {
        &self.ledger
    }

    /// Content index.
    pub fn index(&self) -> &ContentIndexStore<B> {
        &self.index
    }

    /// Deduplicator.
    pub fn dedup(&self) -> &Deduplicator<B> {
        &self.dedup
    }

    /// Run the quality gate without publishing.
    pub fn check_quality(&self, doc: &Document) -> QualityReport {
        self.gate.check(doc)
    }

    /// Publish `doc`. Safe to call repeatedly with the same document.
    pub fn publish(&self, doc: &Document) -> Result<PublishOutcome> {
        let started = Instant::now();
        let result = self.execute(doc);
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                self.metrics.record_attempt(&PublishAttempt {
                    page_type: doc.page_type.as_str(),
                    outcome: outcome.label(),
                    failure_kind: None,
                    duration_ms,
                });
                tracing::info!(
                    topic_key = %outcome.topic_key,
                    slug = %outcome.slug,
                    state = ?outcome.state,
                    outcome = outcome.label(),
                    duration_ms = duration_ms,
                    "publish finished"
                );
            }
            Err(err) => {
                self.metrics.record_attempt(&PublishAttempt {
                    page_type: doc.page_type.as_str(),
                    outcome: "failed",
                    failure_kind: Some(err.kind()),
                    duration_ms,
                });
                tracing::error!(
                    topic_key = %doc.topic_key(),
                    slug = %doc.slug,
                    failure_kind = err.kind(),
                    error = %err,
                    duration_ms = duration_ms,
                    "publish failed"
                );
                self.record_failure(doc, err);
            }
        }
        result
    }

    fn execute(&self, doc: &Document) -> Result<PublishOutcome> {
        doc.validate()?;
        let topic_key = doc.topic_key();
        let page_type = doc.page_type;
        let path = self.config.document_path(page_type, &doc.slug);
        let hash = content_hash(&doc.body);
        let listable = doc.flags.is_listable();
        let target_status = if listable {
            TopicStatus::Published
        } else {
            TopicStatus::Draft
        };

        let observed = self.observe(doc, &topic_key, &path)?;

        let file_current = observed
            .on_disk
            .as_ref()
            .map(|d| same_content(d, doc))
            .unwrap_or(false);
        let write_file = !file_current;

        let published_doc = if write_file {
            let mut next = doc.clone();
            if let Some(previous) = &observed.on_disk {
                next.dates.published_at = previous.dates.published_at;
            }
            next
        } else {
            // Unchanged content: the file on disk keeps its dates.
            observed.on_disk.clone().unwrap_or_else(|| doc.clone())
        };
        let entry = ContentIndexEntry::project(&published_doc);

        let ledger_current = observed
            .record
            .as_ref()
            .map(|r| r.status == target_status && r.slug == doc.slug && r.content_hash == hash)
            .unwrap_or(false);

        let plan = PublishPlan {
            write_file,
            write_ledger: !ledger_current,
            write_index: listable && observed.index_entry.as_ref() != Some(&entry),
            remove_index_entry: !listable && observed.index_entry.is_some(),
        };

        let state = {
            let file_present = observed.on_disk.is_some();
            let index_present = observed.index_entry.is_some();
            let ledger_present = observed
                .record
                .as_ref()
                .map(|r| r.is_published_as(&doc.slug))
                .unwrap_or(false);
            if plan.is_noop() {
                PublishState::AlreadyPublished
            } else if !file_present && !index_present && !ledger_present {
                PublishState::NotPublished
            } else {
                PublishState::PartiallyPublished
            }
        };

        let mut outcome = PublishOutcome {
            topic_key: topic_key.clone(),
            page_type,
            slug: doc.slug.clone(),
            path: path.clone(),
            content_hash: hash.clone(),
            state,
            plan,
            status: target_status,
            warnings: Vec::new(),
            link_suggestions: Vec::new(),
        };

        if plan.is_noop() {
            tracing::debug!(topic_key = %topic_key, slug = %doc.slug, "already published, skipping");
            return Ok(outcome);
        }

        let mut fingerprint = observed
            .record
            .as_ref()
            .map(|r| r.fingerprint.clone())
            .unwrap_or_default();

        if plan.write_file {
            let report = self.gate.check(doc).into_result()?;
            outcome.warnings = report.warnings;

            let check = self.dedup.find_duplicate(&doc.body, Some(&topic_key))?;
            if let Some(owner) = check.exact {
                raise(
                    self.metrics.as_ref(),
                    Incident::new(
                        IncidentType::DuplicateContentRejected {
                            topic_key: topic_key.to_string(),
                            existing_topic_key: owner.to_string(),
                        },
                        "coordinator",
                    ),
                );
                return Err(PublishError::DuplicateContent {
                    topic_key: topic_key.to_string(),
                    existing_topic_key: owner.to_string(),
                });
            }
            if let Some(near) = check.nearest.filter(|n| n.similarity >= self.dedup.threshold()) {
                tracing::warn!(
                    topic_key = %topic_key,
                    similar_to = %near.topic_key,
                    similarity = near.similarity,
                    "near-duplicate content"
                );
                outcome.warnings.push(QualityWarning::NearDuplicate {
                    topic_key: near.topic_key.to_string(),
                    similarity: near.similarity,
                });
            }
            fingerprint = check.fingerprint;

            self.store.write_json(&path, &published_doc)?;
            tracing::info!(path = %path.display(), "document file written");
        } else if fingerprint.is_empty() {
            fingerprint = crate::dedup::token_sketch(&published_doc.body);
        }

        let publication = Publication {
            page_type,
            slug: doc.slug.clone(),
            content_hash: hash,
            sources_used: published_doc.source_urls(),
            fingerprint,
        };

        if let Err(err) = self.commit_metadata(&topic_key, &plan, publication, entry, listable) {
            if plan.write_file {
                self.rollback(&path, observed.prior_bytes.as_deref());
            }
            return Err(err);
        }

        self.notify(&published_doc, &mut outcome);
        Ok(outcome)
    }

    fn observe(&self, doc: &Document, topic_key: &TopicKey, path: &std::path::Path) -> Result<Observation> {
        let prior_bytes = match self.store.read(path) {
            Ok(bytes) => Some(bytes),
            Err(PublishError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let parsed = prior_bytes.as_deref().and_then(|bytes| {
            match serde_json::from_slice::<Document>(bytes) {
                Ok(existing) if existing.validate().is_ok() => Some(existing),
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "existing document unreadable, treating as absent");
                    None
                }
            }
        });

        if let Some(existing) = &parsed {
            let owner = existing.topic_key();
            if &owner != topic_key {
                return Err(PublishError::SlugTopicKeyConflict {
                    slug: doc.slug.clone(),
                    topic_key: topic_key.to_string(),
                    existing_topic_key: owner.to_string(),
                });
            }
        }
        if let Some(owner) = self.ledger.find_by_slug(doc.page_type, &doc.slug)? {
            if &owner.topic_key != topic_key {
                return Err(PublishError::SlugTopicKeyConflict {
                    slug: doc.slug.clone(),
                    topic_key: topic_key.to_string(),
                    existing_topic_key: owner.topic_key.to_string(),
                });
            }
        }

        let index = self.index.try_load()?;
        Ok(Observation {
            prior_bytes,
            on_disk: parsed,
            index_entry: index.find(doc.page_type, &doc.slug).cloned(),
            record: self.ledger.get(topic_key)?,
        })
    }

    /// Ledger and index steps under one lock acquisition.
    fn commit_metadata(
        &self,
        topic_key: &TopicKey,
        plan: &PublishPlan,
        publication: Publication,
        entry: ContentIndexEntry,
        listable: bool,
    ) -> Result<()> {
        if !plan.write_ledger && !plan.write_index && !plan.remove_index_entry {
            return Ok(());
        }
        let page_type = publication.page_type;
        let slug = entry.slug.clone();

        let guard = self.lock.acquire()?;
        let committed = (|| -> Result<()> {
            if plan.write_ledger {
                if listable {
                    self.ledger.mark_published_held(topic_key, publication)?;
                } else {
                    self.ledger.mark_draft_held(topic_key, publication)?;
                }
            }
            if plan.write_index {
                self.index.append_held(page_type, entry)?;
            }
            if plan.remove_index_entry {
                self.index.remove_held(page_type, &slug)?;
            }
            Ok(())
        })();
        let released = guard.release();

        committed?;
        // The metadata landed; rolling the file back now would orphan it.
        if let Err(e) = released {
            tracing::error!(topic_key = %topic_key, error = %e, "lock ownership lost during commit");
        }
        Ok(())
    }

    fn rollback(&self, path: &std::path::Path, prior: Option<&[u8]>) {
        let result = match prior {
            Some(bytes) => self.store.write(path, bytes),
            None => self.store.remove(path),
        };
        match result {
            Ok(()) => tracing::warn!(
                path = %path.display(),
                restored = prior.is_some(),
                "rolled back document file"
            ),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "document rollback failed"),
        }
    }

    fn notify(&self, doc: &Document, outcome: &mut PublishOutcome) {
        let prefix = doc.page_type.route_prefix();
        let paths = vec![format!("{}/{}", prefix, doc.slug), prefix.to_string()];
        if let Err(e) = self.revalidator.revalidate(&paths) {
            tracing::warn!(paths = ?paths, error = %e, "cache revalidation failed");
        }

        if outcome.status == TopicStatus::Published {
            match self.link_suggester.suggest(doc) {
                Ok(suggestions) => outcome.link_suggestions = suggestions,
                Err(e) => tracing::warn!(slug = %doc.slug, error = %e, "link suggestion failed"),
            }
        }
    }

    fn record_failure(&self, doc: &Document, err: &PublishError) {
        // The ledger needs the same lock that just timed out.
        if matches!(err, PublishError::LockTimeout { .. }) {
            return;
        }
        if let Err(e) = self
            .ledger
            .mark_failed(&doc.topic_key(), doc.page_type, err.to_string())
        {
            tracing::warn!(error = %e, "failed to record publish failure in ledger");
        }
    }
}

/// Equal apart from dates.
fn same_content(on_disk: &Document, doc: &Document) -> bool {
    if content_hash(&on_disk.body) != content_hash(&doc.body) {
        return false;
    }
    let mut candidate = doc.clone();
    candidate.body = on_disk.body.clone();
    candidate.dates = on_disk.dates.clone();
    &candidate == on_disk
}

type Components<B> = (
    AtomicFileStore<B>,
    Arc<LockManager<B>>,
    Arc<TopicLedger<B>>,
    ContentIndexStore<B>,
    Deduplicator<B>,
);

fn assemble<B: StorageBackend>(
    config: &StoreConfig,
    backend: &Arc<B>,
    metrics: &Arc<dyn PublishMetrics>,
) -> Components<B> {
    let store = AtomicFileStore::new(Arc::clone(backend));
    let lock = Arc::new(LockManager::new(config, Arc::clone(backend), Arc::clone(metrics)));
    let ledger = Arc::new(TopicLedger::new(config, store.clone(), Arc::clone(&lock)));
    let index = ContentIndexStore::new(config, store.clone(), Arc::clone(&lock), Arc::clone(metrics));
    let dedup = Deduplicator::new(Arc::clone(&ledger), config.near_duplicate_threshold);
    (store, lock, ledger, index, dedup)
}
