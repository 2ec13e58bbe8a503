//! Sequential batch driver over the job queue.

use serde::Serialize;

use crate::collaborators::DocumentSource;
use crate::coordinator::PublishCoordinator;
use crate::error::{PublishError, Result};
use crate::store::StorageBackend;
use crate::scheduler::JobScheduler;
use crate::types::{Job, JobStatus, JobUpdate};

/// Why a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Today's completed jobs reached the daily limit.
    DailyCapReached,
    /// Consecutive failures reached the threshold.
    CircuitOpen,
    /// No pending jobs remain.
    Drained,
    /// The run processed its configured maximum.
    JobLimit,
}

/// Failed job in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Job id.
    pub job_id: String,
    /// Topic key.
    pub topic_key: String,
    /// Failure taxonomy label.
    pub kind: String,
    /// Error message.
    pub message: String,
}

/// Totals for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Jobs taken from the queue.
    pub processed: usize,
    /// Jobs that wrote something.
    pub published: usize,
    /// Jobs whose topic was already published.
    pub skipped: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Failed jobs put back in the queue.
    pub requeued: usize,
    /// Failure details in run order.
    pub failures: Vec<JobFailure>,
    /// Why the run ended.
    pub stop_reason: StopReason,
}

/// Runs queued jobs one at a time through the coordinator.
pub struct BatchRunner<'a, B: StorageBackend> {
    scheduler: &'a JobScheduler<B>,
    coordinator: &'a PublishCoordinator<B>,
    source: &'a dyn DocumentSource,
    max_jobs: Option<usize>,
    requeue_retryable: bool,
}

impl<'a, B: StorageBackend> BatchRunner<'a, B> {
    /// Create a runner.
    pub fn new(
        scheduler: &'a JobScheduler<B>,
        coordinator: &'a PublishCoordinator<B>,
        source: &'a dyn DocumentSource,
    ) -> Self {
        Self {
            scheduler,
            coordinator,
            source,
            max_jobs: None,
            requeue_retryable: true,
        }
    }

    /// Stop after `max` jobs.
    pub fn with_max_jobs(mut self, max: usize) -> Self {
        self.max_jobs = Some(max);
        self
    }

    /// Whether retryable failures go back in the queue.
    pub fn with_requeue(mut self, requeue: bool) -> Self {
        self.requeue_retryable = requeue;
        self
    }

    /// Process jobs until a stop condition holds.
    pub fn run(&self) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            processed: 0,
            published: 0,
            skipped: 0,
            failed: 0,
            requeued: 0,
            failures: Vec::new(),
            stop_reason: StopReason::Drained,
        };

        summary.stop_reason = loop {
            if self.max_jobs.is_some_and(|max| summary.processed >= max) {
                break StopReason::JobLimit;
            }
            if !self.scheduler.can_publish_today()? {
                break StopReason::DailyCapReached;
            }
            if self.scheduler.should_halt()? {
                break StopReason::CircuitOpen;
            }
            let Some(job) = self.scheduler.get_next_job()? else {
                break StopReason::Drained;
            };

            let job = self
                .scheduler
                .update_job_status(&job.job_id, JobStatus::Running, JobUpdate::default())?;
            summary.processed += 1;
            self.run_job(&job, &mut summary)?;
        };

        tracing::info!(
            processed = summary.processed,
            published = summary.published,
            skipped = summary.skipped,
            failed = summary.failed,
            stop_reason = ?summary.stop_reason,
            "batch run finished"
        );
        Ok(summary)
    }

    fn run_job(&self, job: &Job, summary: &mut BatchSummary) -> Result<()> {
        let published = self
            .source
            .build(job)
            .map_err(|e| PublishError::validation("document", e.to_string()))
            .and_then(|doc| {
                if doc.topic_key() != job.topic_key {
                    return Err(PublishError::validation(
                        "topicKey",
                        format!("document is `{}`, job is `{}`", doc.topic_key(), job.topic_key),
                    ));
                }
                self.coordinator.publish(&doc)
            });

        match published {
            Ok(outcome) => {
                if outcome.plan.is_noop() {
                    summary.skipped += 1;
                } else {
                    summary.published += 1;
                }
                let outputs = serde_json::json!({
                    "slug": outcome.slug,
                    "path": outcome.path.display().to_string(),
                    "contentHash": outcome.content_hash,
                    "state": outcome.state,
                    "outcome": outcome.label(),
                    "warnings": outcome.warnings.len(),
                });
                self.scheduler
                    .update_job_status(&job.job_id, JobStatus::Completed, JobUpdate::outputs(outputs))?;
            }
            Err(err) => {
                summary.failed += 1;
                summary.failures.push(JobFailure {
                    job_id: job.job_id.clone(),
                    topic_key: job.topic_key.to_string(),
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                tracing::warn!(
                    job_id = %job.job_id,
                    topic_key = %job.topic_key,
                    failure_kind = err.kind(),
                    error = %err,
                    "job failed"
                );
                let failed = self.scheduler.update_job_status(
                    &job.job_id,
                    JobStatus::Failed,
                    JobUpdate::error(err.to_string()),
                )?;
                if self.requeue_retryable && err.is_retryable() && failed.attempts < failed.max_attempts {
                    self.scheduler.requeue_failed(&job.job_id)?;
                    summary.requeued += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticDocumentSource;
    use crate::config::StoreConfig;
    use crate::store::{AtomicFileStore, InMemoryBackend};
    use crate::testing::sample_document;
    use crate::types::{JobType, PageType, TopicKey};
    use std::sync::Arc;

    struct Fixture {
        scheduler: JobScheduler<InMemoryBackend>,
        coordinator: PublishCoordinator<InMemoryBackend>,
        source: StaticDocumentSource,
    }

    fn fixture(config: StoreConfig) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        Fixture {
            scheduler: JobScheduler::new(&config, AtomicFileStore::new(Arc::clone(&backend))),
            coordinator: PublishCoordinator::new(config, backend).unwrap(),
            source: StaticDocumentSource::new(),
        }
    }

    fn enqueue(f: &Fixture, slug: &str, seed: usize) {
        let doc = sample_document(PageType::Blog, slug, seed);
        f.scheduler
            .add_job(Job::new(JobType::Publish, doc.topic_key(), 0))
            .unwrap();
        f.source.insert(doc);
    }

    #[test]
    fn test_drains_queue() {
        let f = fixture(StoreConfig::new("/store"));
        enqueue(&f, "redfish-101", 0);
        enqueue(&f, "snook-basics", 1);

        let summary = BatchRunner::new(&f.scheduler, &f.coordinator, &f.source).run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Drained);
        assert_eq!(summary.published, 2);
        assert!(f
            .scheduler
            .jobs()
            .unwrap()
            .iter()
            .all(|j| j.status == JobStatus::Completed));
    }

    #[test]
    fn test_stops_at_daily_cap() {
        let f = fixture(StoreConfig::new("/store").with_daily_publish_limit(1));
        enqueue(&f, "redfish-101", 0);
        enqueue(&f, "snook-basics", 1);

        let summary = BatchRunner::new(&f.scheduler, &f.coordinator, &f.source).run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::DailyCapReached);
        assert_eq!(summary.processed, 1);
        assert!(f.scheduler.get_next_job().unwrap().is_some());
    }

    #[test]
    fn test_circuit_opens_after_consecutive_failures() {
        let f = fixture(StoreConfig::new("/store").with_max_consecutive_failures(2));
        for topic in ["blog::missing-a", "blog::missing-b", "blog::missing-c"] {
            f.scheduler
                .add_job(Job::new(JobType::Publish, TopicKey::parse(topic).unwrap(), 0))
                .unwrap();
        }

        let summary = BatchRunner::new(&f.scheduler, &f.coordinator, &f.source).run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::CircuitOpen);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures[0].kind, "validation_error");
    }

    #[test]
    fn test_republish_counts_as_skipped() {
        let f = fixture(StoreConfig::new("/store"));
        enqueue(&f, "redfish-101", 0);
        enqueue(&f, "redfish-101", 0);

        let summary = BatchRunner::new(&f.scheduler, &f.coordinator, &f.source).run().unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_job_limit() {
        let f = fixture(StoreConfig::new("/store"));
        enqueue(&f, "redfish-101", 0);
        enqueue(&f, "snook-basics", 1);

        let summary = BatchRunner::new(&f.scheduler, &f.coordinator, &f.source)
            .with_max_jobs(1)
            .run()
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::JobLimit);
        assert_eq!(summary.processed, 1);
    }
}
