//! Integration tests for the job queue and the batch runner.

use std::sync::Arc;
use std::time::Duration;

use publish_kernel::collaborators::StaticDocumentSource;
use publish_kernel::testing::sample_document;
use publish_kernel::{
    AtomicFileStore, BatchRunner, InMemoryBackend, Job, JobScheduler, JobStatus, JobType,
    LockRecord, PageType, PublishCoordinator, StopReason, StorageBackend, StoreConfig, TopicKey,
    TopicStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    config: StoreConfig,
    backend: Arc<InMemoryBackend>,
    coordinator: PublishCoordinator<InMemoryBackend>,
    source: StaticDocumentSource,
}

impl Harness {
    fn new(config: StoreConfig) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        Self {
            coordinator: PublishCoordinator::new(config.clone(), Arc::clone(&backend)).unwrap(),
            config,
            backend,
            source: StaticDocumentSource::new(),
        }
    }

    /// A fresh scheduler over the same queue file.
    fn scheduler(&self) -> JobScheduler<InMemoryBackend> {
        JobScheduler::new(&self.config, AtomicFileStore::new(Arc::clone(&self.backend)))
    }

    fn enqueue(&self, page_type: PageType, slug: &str, seed: usize, priority: i32) -> Job {
        let doc = sample_document(page_type, slug, seed);
        let job = Job::new(JobType::Publish, doc.topic_key(), priority);
        self.source.insert(doc);
        self.scheduler().add_job(job).unwrap()
    }

    fn run(&self) -> publish_kernel::BatchSummary {
        let scheduler = self.scheduler();
        BatchRunner::new(&scheduler, &self.coordinator, &self.source)
            .run()
            .unwrap()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue Persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_queue_survives_new_scheduler_instance() {
    let harness = Harness::new(StoreConfig::new("/content"));
    let job = harness.enqueue(PageType::Blog, "redfish-101", 0, 3);

    let reopened = harness.scheduler();
    assert_eq!(reopened.get_job(&job.job_id).unwrap(), job);

    let raw: serde_json::Value = AtomicFileStore::new(Arc::clone(&harness.backend))
        .read_json(&harness.config.job_queue_path())
        .unwrap();
    assert_eq!(raw[0]["type"], "publish");
    assert_eq!(raw[0]["status"], "pending");
    assert_eq!(raw[0]["topicKey"], "blog::redfish-101");
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch Runs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_runner_publishes_in_priority_order() {
    let harness = Harness::new(StoreConfig::new("/content"));
    let low = harness.enqueue(PageType::Species, "snook", 1, 1);
    let high = harness.enqueue(PageType::Blog, "redfish-101", 0, 9);

    let summary = harness.run();
    assert_eq!(summary.stop_reason, StopReason::Drained);
    assert_eq!(summary.published, 2);

    let scheduler = harness.scheduler();
    let high = scheduler.get_job(&high.job_id).unwrap();
    let low = scheduler.get_job(&low.job_id).unwrap();
    assert!(high.completed_at.unwrap() <= low.run_at.unwrap());
    assert_eq!(high.outputs.as_ref().unwrap()["slug"], "redfish-101");
    assert_eq!(high.outputs.as_ref().unwrap()["outcome"], "published");

    let record = harness
        .coordinator
        .ledger()
        .get(&TopicKey::parse("species::snook").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TopicStatus::Published);
}

#[test]
fn test_daily_cap_holds_across_runs() {
    let harness = Harness::new(StoreConfig::new("/content").with_daily_publish_limit(2));
    harness.enqueue(PageType::Blog, "redfish-101", 0, 0);
    harness.enqueue(PageType::Blog, "snook-basics", 1, 0);
    harness.enqueue(PageType::Blog, "trout-basics", 2, 0);

    let first = harness.run();
    assert_eq!(first.stop_reason, StopReason::DailyCapReached);
    assert_eq!(first.published, 2);

    let second = harness.run();
    assert_eq!(second.stop_reason, StopReason::DailyCapReached);
    assert_eq!(second.processed, 0);
    assert!(harness.scheduler().get_next_job().unwrap().is_some());
}

#[test]
fn test_blocked_document_fails_job_and_continues() {
    let harness = Harness::new(StoreConfig::new("/content"));
    let mut thin = sample_document(PageType::Blog, "thin-post", 3);
    thin.body = "Cast early. Fish late.".to_string();
    let bad = harness
        .scheduler()
        .add_job(Job::new(JobType::Publish, thin.topic_key(), 5))
        .unwrap();
    harness.source.insert(thin);
    harness.enqueue(PageType::Blog, "redfish-101", 0, 1);

    let summary = harness.run();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.requeued, 0);
    assert_eq!(summary.failures[0].kind, "quality_gate_blocked");

    let failed = harness.scheduler().get_job(&bad.job_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.last_error.unwrap().contains("Quality gate"));
}

#[test]
fn test_retryable_failure_requeued_until_attempts_exhausted() {
    let config = StoreConfig::new("/content")
        .with_lock_timeout(Duration::from_millis(20))
        .with_lock_poll_interval(Duration::from_millis(2));
    let harness = Harness::new(config);
    let job = harness.enqueue(PageType::Blog, "redfish-101", 0, 0);

    harness.coordinator.index().load();
    let bytes = serde_json::to_vec(&LockRecord::new()).unwrap();
    harness
        .backend
        .create_new(&harness.config.lock_path(), &bytes)
        .unwrap();

    let summary = harness.run();
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.requeued, 2);
    assert!(summary.failures.iter().all(|f| f.kind == "lock_timeout"));

    let job = harness.scheduler().get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, job.max_attempts);
    assert!(!harness
        .backend
        .exists(&harness.config.document_path(PageType::Blog, "redfish-101")));
}

#[test]
fn test_circuit_breaker_halts_run() {
    let harness = Harness::new(StoreConfig::new("/content").with_max_consecutive_failures(2));
    for topic in ["blog::ghost-one", "blog::ghost-two"] {
        harness
            .scheduler()
            .add_job(Job::new(JobType::Publish, TopicKey::parse(topic).unwrap(), 5))
            .unwrap();
    }
    harness.enqueue(PageType::Blog, "redfish-101", 0, 0);

    let summary = harness.run();
    assert_eq!(summary.stop_reason, StopReason::CircuitOpen);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.published, 0);
    assert!(harness.scheduler().should_halt().unwrap());
}
