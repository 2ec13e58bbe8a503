//! # publish-kernel
//!
//! Atomic, idempotent document publication over a flat-file JSON store.
//!
//! The kernel answers one question:
//!
//! > Given a document, what must be written so that its file, its index
//! > entry and its ledger record all agree?
//!
//! ## Core Contract
//!
//! 1. Every durable write is temp-file, readback, rename: readers never see
//!    a partial file
//! 2. Index and ledger mutations are serialized by a cross-process lock file
//!    with ownership verification and stale-holder reclaim
//! 3. Publishing the same document twice writes nothing the second time
//!
//! ## Architecture
//!
//! ```text
//! JobScheduler → BatchRunner → DocumentSource → Document
//!                                                  ↓
//!                         QualityGate + Deduplicator
//!                                                  ↓
//!                                  PublishCoordinator (PublishPlan)
//!                                   ↓           ↓              ↓
//!                          AtomicFileStore  TopicLedger  ContentIndexStore
//!                                               └── LockManager ──┘
//! ```
//!
//! ## Recovery Guarantees
//!
//! - A crash mid-write leaves the previous file intact
//! - A corrupt index is restored from its backup, then rebuilt from the
//!   document files
//! - Drift between files, index and ledger is reported by [`DriftAuditor`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod canonical;
pub mod canonical_content;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod incident;
pub mod index;
pub mod ledger;
pub mod lock;
pub mod quality;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod testing;
pub mod types;

// Re-exports
pub use types::{
    ContentIndex, ContentIndexEntry, Document, DocumentDates, DocumentFlags, EntryFlags, Faq, Job,
    JobStatus, JobType, JobUpdate, PageType, Source, TopicKey, TopicLedgerRecord, TopicStatus,
};
pub use error::{PublishError, Result};
pub use config::StoreConfig;
pub use store::{AtomicFileStore, InMemoryBackend, OsBackend, StorageBackend};
pub use lock::{LockGuard, LockManager, LockRecord};
pub use incident::{
    Incident, IncidentType, NoOpMetrics, PublishAttempt, PublishMetrics, Severity, TestMetrics,
};
pub use ledger::{Publication, TopicLedger};
pub use index::{
    AppendOutcome, ContentIndexStore, RecoveryFailure, RecoveryReport, RecoveryStrategy,
};
pub use dedup::{DuplicateCheck, Deduplicator, NearDuplicate};
pub use quality::{
    run_quality_gate, ContentMetrics, QualityGate, QualityPolicy, QualityReport,
    QualityViolation, QualityWarning,
};
pub use collaborators::{
    BackoffPolicy, CacheRevalidator, CollaboratorError, DocumentSource, LinkSuggester,
    LinkSuggestion, RetryingRevalidator,
};
pub use coordinator::{PublishCoordinator, PublishOutcome, PublishPlan, PublishState};
pub use scheduler::JobScheduler;
pub use runner::{BatchRunner, BatchSummary, StopReason};
pub use audit::{DriftAuditor, DriftReport};
pub use canonical_content::{content_hash, normalize_text, verify_content_hash};
