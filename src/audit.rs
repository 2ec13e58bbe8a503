//! Offline drift audit.
//!
//! Compares the ledger, the primary index file and the document files
//! without taking the lock or writing anything. Drift is reported, never
//! repaired; `ContentIndexStore::rebuild` is the repair path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::{PublishError, Result};
use crate::incident::{raise, Incident, IncidentType, PublishMetrics};
use crate::index::{is_document_file, ContentIndexStore};
use crate::ledger::TopicLedger;
use crate::lock::LockManager;
use crate::store::{AtomicFileStore, StorageBackend};
use crate::types::{ContentIndex, ContentIndexEntry, Document, PageType, TopicLedgerRecord, TopicStatus};

/// A published ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRef {
    /// Topic key.
    pub topic_key: String,
    /// Page type.
    pub page_type: PageType,
    /// Recorded slug.
    pub slug: String,
}

/// A page identified by type and slug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRef {
    /// Page type.
    pub page_type: PageType,
    /// Slug.
    pub slug: String,
}

/// Index entry whose fields differ from the file projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMismatch {
    /// Page type.
    pub page_type: PageType,
    /// Slug.
    pub slug: String,
    /// Differing field names.
    pub fields: Vec<&'static str>,
}

/// Slug published by more than one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSlug {
    /// Page type.
    pub page_type: PageType,
    /// Contested slug.
    pub slug: String,
    /// Owning topics, sorted.
    pub topic_keys: Vec<String>,
}

/// Document file that failed to decode or validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidFile {
    /// File path.
    pub path: PathBuf,
    /// Decode or validation error.
    pub reason: String,
}

/// Audit findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    /// Published ledger records examined.
    pub published_records: usize,
    /// Valid document files found.
    pub documents_scanned: usize,
    /// Published records with no valid file.
    pub missing_files: Vec<PublishedRef>,
    /// Published listable records with no index entry.
    pub missing_index_entries: Vec<PublishedRef>,
    /// Index entries that disagree with their file.
    pub field_mismatches: Vec<FieldMismatch>,
    /// Index entries with no valid file.
    pub index_only: Vec<PageRef>,
    /// Listable files with neither an index entry nor a published record.
    pub file_only: Vec<PageRef>,
    /// Slugs published by more than one topic.
    pub duplicate_slugs: Vec<DuplicateSlug>,
    /// Files that failed to decode or validate.
    pub invalid_files: Vec<InvalidFile>,
    /// Decode error of the primary index, if it could not be read.
    pub primary_index_error: Option<String>,
}

impl DriftReport {
    /// Number of findings.
    pub fn findings(&self) -> usize {
        self.missing_files.len()
            + self.missing_index_entries.len()
            + self.field_mismatches.len()
            + self.index_only.len()
            + self.file_only.len()
            + self.duplicate_slugs.len()
            + self.invalid_files.len()
            + usize::from(self.primary_index_error.is_some())
    }

    /// Whether nothing drifted.
    pub fn is_clean(&self) -> bool {
        self.findings() == 0
    }
}

/// Read-only auditor.
pub struct DriftAuditor<B: StorageBackend> {
    config: StoreConfig,
    store: AtomicFileStore<B>,
    ledger: TopicLedger<B>,
    index: ContentIndexStore<B>,
    metrics: Arc<dyn PublishMetrics>,
}

impl<B: StorageBackend> DriftAuditor<B> {
    /// Create an auditor over the store in `config`.
    pub fn new(config: &StoreConfig, backend: Arc<B>, metrics: Arc<dyn PublishMetrics>) -> Self {
        let store = AtomicFileStore::new(Arc::clone(&backend));
        let lock = Arc::new(LockManager::new(config, backend, Arc::clone(&metrics)));
        Self {
            config: config.clone(),
            ledger: TopicLedger::new(config, store.clone(), Arc::clone(&lock)),
            index: ContentIndexStore::new(config, store.clone(), lock, Arc::clone(&metrics)),
            store,
            metrics,
        }
    }

    /// Run the audit.
    pub fn audit(&self) -> Result<DriftReport> {
        let mut report = DriftReport::default();

        let published: Vec<TopicLedgerRecord> = self
            .ledger
            .all()?
            .into_iter()
            .filter(|r| r.status == TopicStatus::Published)
            .collect();
        report.published_records = published.len();

        let index = match self.index.read_primary() {
            Ok(index) => Some(index),
            Err(PublishError::NotFound(_)) => {
                report.primary_index_error = Some("primary index missing".to_string());
                None
            }
            Err(e) => {
                report.primary_index_error = Some(e.to_string());
                None
            }
        };

        let documents = self.scan(&mut report)?;
        report.documents_scanned = documents.len();

        self.check_records(&published, &documents, index.as_ref(), &mut report);
        if let Some(index) = &index {
            check_index(index, &published, &documents, &mut report);
        }
        report.duplicate_slugs = duplicate_slugs(&published);

        let findings = report.findings();
        if findings > 0 {
            raise(
                self.metrics.as_ref(),
                Incident::new(IncidentType::DriftDetected { findings }, "audit")
                    .with_context("missing_files", report.missing_files.len().to_string())
                    .with_context("index_only", report.index_only.len().to_string())
                    .with_context("invalid_files", report.invalid_files.len().to_string()),
            );
        } else {
            tracing::info!(
                published = report.published_records,
                documents = report.documents_scanned,
                "audit clean"
            );
        }
        Ok(report)
    }

    fn scan(&self, report: &mut DriftReport) -> Result<BTreeMap<PageRef, Document>> {
        let mut documents = BTreeMap::new();
        for page_type in PageType::all() {
            let dir = self.config.documents_dir(page_type);
            let files = self
                .store
                .backend()
                .list_files(&dir)
                .map_err(|e| PublishError::io(&dir, e))?;
            for path in files.into_iter().filter(|p| is_document_file(p)) {
                match self.index.read_document(&path, page_type) {
                    Ok(doc) => {
                        let key = PageRef {
                            page_type,
                            slug: doc.slug.clone(),
                        };
                        documents.insert(key, doc);
                    }
                    Err(reason) => report.invalid_files.push(InvalidFile { path, reason }),
                }
            }
        }
        Ok(documents)
    }

    fn check_records(
        &self,
        published: &[TopicLedgerRecord],
        documents: &BTreeMap<PageRef, Document>,
        index: Option<&ContentIndex>,
        report: &mut DriftReport,
    ) {
        for record in published {
            let reference = PublishedRef {
                topic_key: record.topic_key.to_string(),
                page_type: record.page_type,
                slug: record.slug.clone(),
            };
            let doc = documents.get(&PageRef {
                page_type: record.page_type,
                slug: record.slug.clone(),
            });
            if doc.is_none() {
                report.missing_files.push(reference.clone());
            }

            let Some(index) = index else { continue };
            match (index.find(record.page_type, &record.slug), doc) {
                (None, _) => report.missing_index_entries.push(reference),
                (Some(entry), Some(doc)) => {
                    let fields = entry.diff_fields(&ContentIndexEntry::project(doc));
                    if !fields.is_empty() {
                        report.field_mismatches.push(FieldMismatch {
                            page_type: record.page_type,
                            slug: record.slug.clone(),
                            fields,
                        });
                    }
                }
                (Some(_), None) => {}
            }
        }
    }
}

fn check_index(
    index: &ContentIndex,
    published: &[TopicLedgerRecord],
    documents: &BTreeMap<PageRef, Document>,
    report: &mut DriftReport,
) {
    for page_type in PageType::all() {
        for entry in index.bucket(page_type) {
            let key = PageRef {
                page_type,
                slug: entry.slug.clone(),
            };
            if !documents.contains_key(&key) {
                report.index_only.push(key);
            }
        }
    }

    for (key, doc) in documents {
        if !doc.flags.is_listable() || index.contains(key.page_type, &key.slug) {
            continue;
        }
        let recorded = published
            .iter()
            .any(|r| r.page_type == key.page_type && r.slug == key.slug);
        if !recorded {
            report.file_only.push(key.clone());
        }
    }
}

fn duplicate_slugs(published: &[TopicLedgerRecord]) -> Vec<DuplicateSlug> {
    let mut owners: BTreeMap<(PageType, &str), BTreeSet<String>> = BTreeMap::new();
    for record in published {
        owners
            .entry((record.page_type, record.slug.as_str()))
            .or_default()
            .insert(record.topic_key.to_string());
    }
    owners
        .into_iter()
        .filter(|(_, keys)| keys.len() > 1)
        .map(|((page_type, slug), keys)| DuplicateSlug {
            page_type,
            slug: slug.to_string(),
            topic_keys: keys.into_iter().collect(),
        })
        .collect()
}
