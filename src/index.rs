//! Content index store with ordered recovery.
//!
//! ## Recovery Chain
//!
//! ```text
//! Primary ──fail──▶ Backup ──fail──▶ RebuildFromSource ──fail──▶ empty index
//!    │                 │                    │
//!    ▼                 ▼                    ▼
//!  index        restore primary      write primary + backup
//! ```
//!
//! Each [`RecoveryStrategy`] returns `Result<ContentIndex, RecoveryFailure>`
//! and the next one runs only when the previous failed. [`ContentIndexStore::load`]
//! never fails; an exhausted chain yields an empty index and a critical
//! incident. Mutations go through [`ContentIndexStore::append`] and
//! [`ContentIndexStore::remove`], which run under the lock and back up the
//! current index first.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::{PublishError, Result};
use crate::incident::{raise, Incident, IncidentType, PublishMetrics};
use crate::lock::LockManager;
use crate::store::{AtomicFileStore, StorageBackend};
use crate::types::{sanitize_entry, ContentIndex, ContentIndexEntry, Document, PageType};

/// One step of the recovery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Decode the primary file.
    Primary,
    /// Decode the backup and restore it as primary.
    Backup,
    /// Scan document files and rebuild.
    RebuildFromSource,
}

impl RecoveryStrategy {
    /// Strategies in the order they are tried.
    pub const CHAIN: [RecoveryStrategy; 3] = [Self::Primary, Self::Backup, Self::RebuildFromSource];

    /// Stable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::RebuildFromSource => "rebuild_from_source",
        }
    }
}

/// Why a strategy did not produce an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFailure {
    /// Strategy that failed.
    pub strategy: RecoveryStrategy,
    /// Failure description.
    pub reason: String,
    /// The input file did not exist.
    pub missing: bool,
}

impl std::fmt::Display for RecoveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy.label(), self.reason)
    }
}

/// How a load was satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Strategy that produced the index; `None` means the empty fallback.
    pub source: Option<RecoveryStrategy>,
    /// Strategies that failed before `source`.
    pub failures: Vec<RecoveryFailure>,
    /// Buckets that were absent and defaulted to empty.
    pub repaired_arrays: Vec<&'static str>,
    /// Documents skipped during a rebuild.
    pub invalid_documents: usize,
}

impl RecoveryReport {
    /// Whether the primary served the load untouched.
    pub fn is_clean(&self) -> bool {
        self.source == Some(RecoveryStrategy::Primary) && self.repaired_arrays.is_empty()
    }
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New slug.
    Inserted,
    /// Existing slug with different fields.
    Replaced,
    /// Identical entry already present; nothing written.
    Unchanged,
}

/// Result of a rebuild scan.
#[derive(Debug, Clone)]
pub struct RebuildScan {
    /// Rebuilt index.
    pub index: ContentIndex,
    /// Files that failed to decode or validate.
    pub invalid: Vec<(std::path::PathBuf, String)>,
    /// Valid documents excluded by flags.
    pub unlisted: usize,
}

/// Decode index bytes strictly, repairing only missing buckets.
pub fn decode_index(bytes: &[u8]) -> std::result::Result<(ContentIndex, Vec<&'static str>), String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "index root is not a JSON object".to_string())?;
    let repaired = PageType::all()
        .iter()
        .map(|pt| pt.bucket_name())
        .filter(|name| !object.contains_key(*name))
        .collect::<Vec<_>>();
    let index: ContentIndex = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok((index, repaired))
}

/// Content index store.
pub struct ContentIndexStore<B: StorageBackend> {
    config: StoreConfig,
    store: AtomicFileStore<B>,
    lock: Arc<LockManager<B>>,
    metrics: Arc<dyn PublishMetrics>,
}

impl<B: StorageBackend> ContentIndexStore<B> {
    /// Create an index store.
    pub fn new(
        config: &StoreConfig,
        store: AtomicFileStore<B>,
        lock: Arc<LockManager<B>>,
        metrics: Arc<dyn PublishMetrics>,
    ) -> Self {
        Self {
            config: config.clone(),
            store,
            lock,
            metrics,
        }
    }

    /// Load the index. Never fails; see [`Self::load_with_report`].
    pub fn load(&self) -> ContentIndex {
        self.load_with_report().0
    }

    /// Load the index and describe how it was obtained.
    pub fn load_with_report(&self) -> (ContentIndex, RecoveryReport) {
        let (index, report) = self.run_chain(false);
        (index.unwrap_or_default(), report)
    }

    /// Load the index, failing with `IndexRecoveryExhausted` instead of
    /// falling back to an empty index.
    pub fn try_load(&self) -> Result<ContentIndex> {
        self.load_checked(false)
    }

    fn load_checked(&self, lock_held: bool) -> Result<ContentIndex> {
        match self.run_chain(lock_held) {
            (Some(index), _) => Ok(index),
            (None, report) => Err(PublishError::IndexRecoveryExhausted {
                attempts: report.failures.iter().map(|f| f.to_string()).collect(),
            }),
        }
    }

    /// Decode the primary file without recovery or side effects.
    pub fn read_primary(&self) -> Result<ContentIndex> {
        let path = self.config.index_path();
        let bytes = self.store.read(&path)?;
        decode_index(&bytes)
            .map(|(index, _)| index)
            .map_err(|message| PublishError::Serialization { path, message })
    }

    /// Insert or replace `entry` in the `page_type` bucket.
    pub fn append(&self, page_type: PageType, entry: ContentIndexEntry) -> Result<AppendOutcome> {
        self.lock.with_lock(|| self.append_held(page_type, entry))
    }

    /// [`Self::append`] for a caller already holding the store lock.
    pub(crate) fn append_held(&self, page_type: PageType, entry: ContentIndexEntry) -> Result<AppendOutcome> {
        let entry = entry.sanitized();
        let mut index = self.load_checked(true)?;
        let outcome = match index.find(page_type, &entry.slug) {
            Some(existing) if *existing == entry => return Ok(AppendOutcome::Unchanged),
            Some(_) => AppendOutcome::Replaced,
            None => AppendOutcome::Inserted,
        };
        self.backup(&index);
        let slug = entry.slug.clone();
        index.upsert(page_type, entry);
        self.commit(&mut index)?;
        tracing::info!(
            page_type = %page_type,
            slug = %slug,
            outcome = ?outcome,
            entries = index.len(),
            "index entry committed"
        );
        Ok(outcome)
    }

    /// Sanitize an arbitrary JSON object and append it.
    pub fn append_value(&self, page_type: PageType, raw: &serde_json::Value) -> Result<AppendOutcome> {
        self.append(page_type, sanitize_entry(raw)?)
    }

    /// Remove the entry for `slug`. Returns `true` if one was removed.
    pub fn remove(&self, page_type: PageType, slug: &str) -> Result<bool> {
        self.lock.with_lock(|| self.remove_held(page_type, slug))
    }

    /// [`Self::remove`] for a caller already holding the store lock.
    pub(crate) fn remove_held(&self, page_type: PageType, slug: &str) -> Result<bool> {
        let mut index = self.load_checked(true)?;
        if !index.contains(page_type, slug) {
            return Ok(false);
        }
        self.backup(&index);
        index.remove(page_type, slug);
        self.commit(&mut index)?;
        tracing::info!(page_type = %page_type, slug = %slug, "index entry removed");
        Ok(true)
    }

    /// Rebuild from document files and overwrite primary and backup.
    pub fn rebuild(&self) -> Result<ContentIndex> {
        self.lock.with_lock(|| {
            let mut scan = self.scan_documents()?;
            self.commit(&mut scan.index)?;
            self.store.write_json(&self.config.index_backup_path(), &scan.index)?;
            Ok(scan.index)
        })
    }

    /// Project every listable, valid document on disk into a fresh index.
    pub fn scan_documents(&self) -> Result<RebuildScan> {
        let mut index = ContentIndex::empty();
        let mut invalid = Vec::new();
        let mut unlisted = 0usize;

        for page_type in PageType::all() {
            let dir = self.config.documents_dir(page_type);
            let files = self
                .store
                .backend()
                .list_files(&dir)
                .map_err(|e| PublishError::io(&dir, e))?;
            for path in files.iter().filter(|p| is_document_file(p)) {
                match self.read_document(path, page_type) {
                    Ok(doc) if doc.flags.is_listable() => {
                        index.upsert(page_type, ContentIndexEntry::project(&doc));
                    }
                    Ok(_) => unlisted += 1,
                    Err(reason) => invalid.push((path.clone(), reason)),
                }
            }
        }
        index.sort();
        index.last_updated = Some(Utc::now());
        Ok(RebuildScan {
            index,
            invalid,
            unlisted,
        })
    }

    /// Decode and validate one document file.
    pub fn read_document(&self, path: &Path, page_type: PageType) -> std::result::Result<Document, String> {
        let doc: Document = self.store.read_json(path).map_err(|e| e.to_string())?;
        doc.validate().map_err(|e| e.to_string())?;
        if doc.page_type != page_type {
            return Err(format!("page type `{}` stored under `{}`", doc.page_type, page_type));
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != doc.slug {
            return Err(format!("slug `{}` does not match file name `{stem}`", doc.slug));
        }
        Ok(doc)
    }

    fn run_chain(&self, lock_held: bool) -> (Option<ContentIndex>, RecoveryReport) {
        let mut report = RecoveryReport::default();
        for strategy in RecoveryStrategy::CHAIN {
            match self.attempt(strategy, &mut report, lock_held) {
                Ok(index) => {
                    report.source = Some(strategy);
                    if !report.failures.is_empty() {
                        tracing::warn!(
                            source = strategy.label(),
                            failures = report.failures.len(),
                            "content index recovered"
                        );
                    }
                    return (Some(index), report);
                }
                Err(failure) => {
                    tracing::debug!(strategy = strategy.label(), reason = %failure.reason, "recovery strategy failed");
                    report.failures.push(failure);
                }
            }
        }

        let attempts: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
        raise(
            self.metrics.as_ref(),
            Incident::new(IncidentType::IndexRecoveryExhausted { attempts }, "index")
                .with_context("root", self.config.root().display().to_string()),
        );
        (None, report)
    }

    fn attempt(
        &self,
        strategy: RecoveryStrategy,
        report: &mut RecoveryReport,
        lock_held: bool,
    ) -> std::result::Result<ContentIndex, RecoveryFailure> {
        match strategy {
            RecoveryStrategy::Primary => {
                let (index, repaired) = self.decode_file(&self.config.index_path(), strategy)?;
                if !repaired.is_empty() {
                    tracing::warn!(buckets = ?repaired, "index buckets missing, defaulted to empty");
                }
                report.repaired_arrays = repaired;
                Ok(index)
            }
            RecoveryStrategy::Backup => {
                let (index, _) = self.decode_file(&self.config.index_backup_path(), strategy)?;
                self.write_back(&index, &[self.config.index_path()], lock_held);
                let primary_error = report
                    .failures
                    .last()
                    .map(|f| f.reason.clone())
                    .unwrap_or_default();
                raise(
                    self.metrics.as_ref(),
                    Incident::new(IncidentType::IndexRestoredFromBackup { primary_error }, "index"),
                );
                Ok(index)
            }
            RecoveryStrategy::RebuildFromSource => {
                let scan = self.scan_documents().map_err(|e| RecoveryFailure {
                    strategy,
                    reason: e.to_string(),
                    missing: false,
                })?;
                for (path, reason) in &scan.invalid {
                    tracing::warn!(path = %path.display(), reason = %reason, "skipping invalid document during rebuild");
                }
                report.invalid_documents = scan.invalid.len();

                let index = scan.index;
                self.write_back(
                    &index,
                    &[self.config.index_path(), self.config.index_backup_path()],
                    lock_held,
                );

                let fresh_store = report.failures.iter().all(|f| f.missing);
                if fresh_store && index.is_empty() {
                    tracing::info!(root = %self.config.root().display(), "initialized empty content index");
                } else {
                    raise(
                        self.metrics.as_ref(),
                        Incident::new(
                            IncidentType::IndexRebuiltFromSource {
                                entries: index.len(),
                                invalid_documents: report.invalid_documents,
                            },
                            "index",
                        ),
                    );
                }
                Ok(index)
            }
        }
    }

    fn decode_file(
        &self,
        path: &Path,
        strategy: RecoveryStrategy,
    ) -> std::result::Result<(ContentIndex, Vec<&'static str>), RecoveryFailure> {
        let bytes = self.store.read(path).map_err(|e| RecoveryFailure {
            strategy,
            missing: matches!(e, PublishError::NotFound(_)),
            reason: e.to_string(),
        })?;
        decode_index(&bytes).map_err(|reason| RecoveryFailure {
            strategy,
            reason,
            missing: false,
        })
    }

    /// Persist a recovered index under the store lock.
    ///
    /// Skipped when the primary became readable in the meantime, so a commit
    /// made by another process is never overwritten with the recovered copy.
    fn write_back(&self, index: &ContentIndex, targets: &[std::path::PathBuf], lock_held: bool) {
        let persist = || -> Result<()> {
            if self.read_primary().is_ok() {
                tracing::info!("primary index readable again, skipping recovery write-back");
                return Ok(());
            }
            for path in targets {
                if let Err(e) = self.store.write_json(path, index) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to persist recovered index");
                }
            }
            Ok(())
        };

        let result = if lock_held {
            persist()
        } else {
            self.lock.with_lock(persist)
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "recovered index not persisted");
        }
    }

    fn backup(&self, index: &ContentIndex) {
        if let Err(e) = self.store.write_json(&self.config.index_backup_path(), index) {
            tracing::warn!(error = %e, "index backup failed, continuing with mutation");
        }
    }

    fn commit(&self, index: &mut ContentIndex) -> Result<()> {
        index.last_updated = Some(Utc::now());
        self.store.write_json(&self.config.index_path(), index)
    }
}

pub(crate) fn is_document_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::TestMetrics;
    use crate::store::InMemoryBackend;
    use serde_json::json;

    struct Fixture {
        config: StoreConfig,
        backend: Arc<InMemoryBackend>,
        metrics: Arc<TestMetrics>,
        index: ContentIndexStore<InMemoryBackend>,
    }

    fn fixture() -> Fixture {
        let config = StoreConfig::new("/store");
        let backend = Arc::new(InMemoryBackend::new());
        let metrics = Arc::new(TestMetrics::default());
        let lock = Arc::new(LockManager::new(&config, Arc::clone(&backend), metrics.clone()));
        let index = ContentIndexStore::new(
            &config,
            AtomicFileStore::new(Arc::clone(&backend)),
            lock,
            metrics.clone(),
        );
        Fixture {
            config,
            backend,
            metrics,
            index,
        }
    }

    fn entry(slug: &str) -> ContentIndexEntry {
        sanitize_entry(&json!({"slug": slug, "title": slug})).unwrap()
    }

    #[test]
    fn test_fresh_store_loads_empty_without_incident() {
        let f = fixture();
        let (index, report) = f.index.load_with_report();
        assert!(index.is_empty());
        assert_eq!(report.source, Some(RecoveryStrategy::RebuildFromSource));
        assert_eq!(f.metrics.get_count("publish_kernel_index_rebuilds_total"), 0);
        assert!(f.backend.exists(&f.config.index_path()));
    }

    #[test]
    fn test_recovery_write_back_waits_for_lock() {
        let config = StoreConfig::new("/store")
            .with_lock_timeout(std::time::Duration::from_millis(30))
            .with_lock_poll_interval(std::time::Duration::from_millis(2));
        let backend = Arc::new(InMemoryBackend::new());
        let metrics = Arc::new(TestMetrics::default());
        let lock = Arc::new(LockManager::new(&config, Arc::clone(&backend), metrics.clone()));
        let index = ContentIndexStore::new(
            &config,
            AtomicFileStore::new(Arc::clone(&backend)),
            lock,
            metrics.clone(),
        );
        index.append(PageType::Blog, entry("a")).unwrap();
        index.append(PageType::Blog, entry("b")).unwrap();
        backend.write(&config.index_path(), b"{ torn").unwrap();

        let foreign = serde_json::to_vec(&crate::lock::LockRecord::new()).unwrap();
        backend.create_new(&config.lock_path(), &foreign).unwrap();

        // Recovered in memory, but the primary is left alone while the lock is held elsewhere.
        let (recovered, report) = index.load_with_report();
        assert_eq!(report.source, Some(RecoveryStrategy::Backup));
        assert!(recovered.contains(PageType::Blog, "a"));
        assert_eq!(backend.read(&config.index_path()).unwrap(), b"{ torn");

        backend.remove(&config.lock_path()).unwrap();
        index.load();
        assert!(index.read_primary().unwrap().contains(PageType::Blog, "a"));
        assert!(!backend.exists(&config.lock_path()));
    }

    #[test]
    fn test_append_upserts_by_slug() {
        let f = fixture();
        assert_eq!(f.index.append(PageType::Blog, entry("a")).unwrap(), AppendOutcome::Inserted);
        assert_eq!(f.index.append(PageType::Blog, entry("a")).unwrap(), AppendOutcome::Unchanged);

        let mut changed = entry("a");
        changed.title = "A, revised".to_string();
        assert_eq!(f.index.append(PageType::Blog, changed).unwrap(), AppendOutcome::Replaced);
        assert_eq!(f.index.load().bucket(PageType::Blog).len(), 1);
        assert!(!f.backend.exists(&f.config.lock_path()));
    }

    #[test]
    fn test_backup_taken_before_mutation() {
        let f = fixture();
        f.index.append(PageType::Blog, entry("a")).unwrap();
        f.index.append(PageType::Blog, entry("b")).unwrap();

        let backup: ContentIndex = AtomicFileStore::new(Arc::clone(&f.backend))
            .read_json(&f.config.index_backup_path())
            .unwrap();
        assert!(backup.contains(PageType::Blog, "a"));
        assert!(!backup.contains(PageType::Blog, "b"));
    }

    #[test]
    fn test_missing_bucket_is_repaired() {
        let f = fixture();
        f.backend
            .write(&f.config.index_path(), br#"{"version": 1, "blogPosts": []}"#)
            .unwrap();
        let (_, report) = f.index.load_with_report();
        assert_eq!(report.source, Some(RecoveryStrategy::Primary));
        assert_eq!(report.repaired_arrays, vec!["species", "howTo", "locations"]);
    }

    #[test]
    fn test_unknown_shape_falls_through_to_backup() {
        let f = fixture();
        f.index.append(PageType::Blog, entry("a")).unwrap();
        f.index.append(PageType::Blog, entry("b")).unwrap();
        f.backend
            .write(&f.config.index_path(), br#"{"blogPosts": {"not": "an array"}}"#)
            .unwrap();

        let (index, report) = f.index.load_with_report();
        assert_eq!(report.source, Some(RecoveryStrategy::Backup));
        assert!(index.contains(PageType::Blog, "a"));
        assert_eq!(f.index.read_primary().unwrap(), index);
        assert_eq!(f.metrics.get_count("publish_kernel_index_backup_restores_total"), 1);
    }

    #[test]
    fn test_exhausted_chain_serves_empty_index() {
        let f = fixture();
        f.backend.write(&f.config.index_path(), b"{").unwrap();
        f.backend.fail_listings(true);

        let err = f.index.try_load().unwrap_err();
        match &err {
            PublishError::IndexRecoveryExhausted { attempts } => assert_eq!(attempts.len(), 3),
            other => panic!("unexpected error: {other}"),
        }

        let (index, report) = f.index.load_with_report();
        assert!(index.is_empty());
        assert_eq!(report.source, None);
        assert_eq!(f.metrics.get_count("publish_kernel_index_recovery_exhausted_total"), 2);

        // Mutations refuse to overwrite the index with an empty one.
        assert!(f.index.append(PageType::Blog, entry("a")).is_err());
    }

    #[test]
    fn test_append_value_sanitizes() {
        let f = fixture();
        f.index
            .append_value(
                PageType::Species,
                &json!({"slug": "red-drum", "title": "Red Drum", "body": "secret"}),
            )
            .unwrap();
        let raw = f.backend.read(&f.config.index_path()).unwrap();
        assert!(!String::from_utf8(raw).unwrap().contains("secret"));
    }

    #[test]
    fn test_remove_entry() {
        let f = fixture();
        f.index.append(PageType::HowTo, entry("tie-a-knot")).unwrap();
        assert!(f.index.remove(PageType::HowTo, "tie-a-knot").unwrap());
        assert!(!f.index.remove(PageType::HowTo, "tie-a-knot").unwrap());
    }
}
