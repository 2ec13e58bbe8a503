//! Integration tests for index recovery and write atomicity.

use std::collections::BTreeSet;
use std::sync::Arc;

use publish_kernel::index::decode_index;
use publish_kernel::testing::sample_document;
use publish_kernel::{
    AtomicFileStore, InMemoryBackend, OsBackend, PageType, PublishCoordinator, PublishError,
    RecoveryStrategy, StorageBackend, StoreConfig, TestMetrics,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn config() -> StoreConfig {
    StoreConfig::new("/content")
}

/// Store with two listable blog posts, one draft and one broken file.
fn populated() -> (Arc<InMemoryBackend>, Arc<TestMetrics>, PublishCoordinator<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let metrics = Arc::new(TestMetrics::default());
    let coordinator = PublishCoordinator::new(config(), Arc::clone(&backend))
        .unwrap()
        .with_metrics(metrics.clone());

    coordinator
        .publish(&sample_document(PageType::Blog, "redfish-101", 0))
        .unwrap();
    coordinator
        .publish(&sample_document(PageType::Species, "snook", 1))
        .unwrap();
    let mut draft = sample_document(PageType::HowTo, "rig-a-popping-cork", 2);
    draft.flags.draft = true;
    coordinator.publish(&draft).unwrap();

    backend
        .write(&config().document_path(PageType::Blog, "half-written"), b"{\"id\":")
        .unwrap();
    (backend, metrics, coordinator)
}

fn slugs(index: &publish_kernel::ContentIndex) -> BTreeSet<String> {
    PageType::all()
        .iter()
        .flat_map(|pt| index.bucket(*pt).iter().map(|e| e.slug.clone()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery Chain
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_corrupt_primary_restored_from_backup() {
    let (backend, metrics, coordinator) = populated();
    let backup_bytes = backend.read(&config().index_backup_path()).unwrap();
    let (backup, _) = decode_index(&backup_bytes).unwrap();

    backend.write(&config().index_path(), b"{ not an index").unwrap();

    let (index, report) = coordinator.index().load_with_report();
    assert_eq!(report.source, Some(RecoveryStrategy::Backup));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(index, backup);

    let (restored, _) = decode_index(&backend.read(&config().index_path()).unwrap()).unwrap();
    assert_eq!(restored, backup);
    assert_eq!(metrics.get_count("publish_kernel_index_backup_restores_total"), 1);
}

#[test]
fn test_unknown_keys_rejected_at_decode() {
    let (backend, _, coordinator) = populated();
    backend
        .write(&config().index_path(), br#"{"version":1,"blogPosts":[],"featured":[]}"#)
        .unwrap();

    let (_, report) = coordinator.index().load_with_report();
    assert_eq!(report.source, Some(RecoveryStrategy::Backup));
    assert_eq!(report.failures[0].strategy, RecoveryStrategy::Primary);
}

#[test]
fn test_corrupt_primary_without_backup_rebuilds_from_documents() {
    let (backend, metrics, coordinator) = populated();
    backend.write(&config().index_path(), b"[]").unwrap();
    backend.remove(&config().index_backup_path()).unwrap();

    let (index, report) = coordinator.index().load_with_report();
    assert_eq!(report.source, Some(RecoveryStrategy::RebuildFromSource));
    assert_eq!(report.invalid_documents, 1);

    let expected: BTreeSet<String> = ["redfish-101", "snook"].iter().map(|s| s.to_string()).collect();
    assert_eq!(slugs(&index), expected);
    assert_eq!(
        index.find(PageType::Species, "snook").unwrap().title,
        "Snook Field Guide"
    );

    // Both files now hold the rebuilt index.
    for path in [config().index_path(), config().index_backup_path()] {
        let (on_disk, _) = decode_index(&backend.read(&path).unwrap()).unwrap();
        assert_eq!(slugs(&on_disk), expected);
    }
    assert_eq!(metrics.get_count("publish_kernel_index_rebuilds_total"), 1);
}

#[test]
fn test_publish_continues_after_recovery() {
    let (backend, _, coordinator) = populated();
    backend.write(&config().index_path(), b"garbage").unwrap();
    backend.remove(&config().index_backup_path()).unwrap();

    coordinator
        .publish(&sample_document(PageType::Location, "port-aransas", 3))
        .unwrap();
    let index = coordinator.index().read_primary().unwrap();
    assert!(index.contains(PageType::Location, "port-aransas"));
    assert!(index.contains(PageType::Blog, "redfish-101"));
}

#[test]
fn test_exhausted_chain_blocks_index_mutation() {
    let (backend, metrics, coordinator) = populated();
    backend.write(&config().index_path(), b"garbage").unwrap();
    backend.remove(&config().index_backup_path()).unwrap();
    backend.fail_listings(true);

    let err = coordinator
        .publish(&sample_document(PageType::Blog, "trout-basics", 4))
        .unwrap_err();
    let PublishError::IndexRecoveryExhausted { attempts } = err else {
        panic!("expected exhausted recovery");
    };
    assert_eq!(attempts.len(), 3);
    assert!(!backend.exists(&config().document_path(PageType::Blog, "trout-basics")));
    assert!(metrics.get_count("publish_kernel_index_recovery_exhausted_total") >= 1);

    // load() still answers with an empty index.
    assert!(coordinator.index().load().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Atomic Writes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_interrupted_rename_keeps_previous_file() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = AtomicFileStore::new(Arc::clone(&backend));
    let path = config().document_path(PageType::Blog, "redfish-101");
    store.write(&path, b"{\"complete\":true}\n").unwrap();

    backend.fail_next_rename();
    assert!(store.write(&path, b"{\"complete\":false,\"longer\":true}\n").is_err());

    assert_eq!(backend.read(&path).unwrap(), b"{\"complete\":true}\n");
    assert_eq!(backend.num_files(), 1);
}

#[test]
fn test_interrupted_first_write_leaves_no_file() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = AtomicFileStore::new(Arc::clone(&backend));
    let path = config().document_path(PageType::Blog, "redfish-101");

    backend.fail_next_rename();
    assert!(store.write(&path, b"{}\n").is_err());
    assert!(!backend.exists(&path));
    assert_eq!(backend.num_files(), 0);
}

#[test]
fn test_corrupted_write_detected_by_readback() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = AtomicFileStore::new(Arc::clone(&backend));
    let path = config().document_path(PageType::Blog, "redfish-101");
    store.write(&path, b"old\n").unwrap();

    backend.corrupt_next_write();
    let err = store.write(&path, b"new\n").unwrap_err();
    assert!(matches!(err, PublishError::WriteVerificationFailed { .. }));
    assert_eq!(backend.read(&path).unwrap(), b"old\n");
    assert_eq!(backend.num_files(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem Backend
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_publish_and_rebuild_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path());
    let coordinator = PublishCoordinator::new(config.clone(), Arc::new(OsBackend::new())).unwrap();

    coordinator
        .publish(&sample_document(PageType::Blog, "redfish-101", 0))
        .unwrap();
    coordinator
        .publish(&sample_document(PageType::HowTo, "tie-a-uni-knot", 5))
        .unwrap();
    assert!(config.document_path(PageType::Blog, "redfish-101").is_file());
    assert!(!config.lock_path().exists());

    std::fs::remove_file(config.index_path()).unwrap();
    std::fs::remove_file(config.index_backup_path()).unwrap();
    let rebuilt = coordinator.index().rebuild().unwrap();
    assert_eq!(rebuilt.len(), 2);
    assert!(config.index_path().is_file());

    let leftovers: Vec<_> = walk(dir.path())
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}
