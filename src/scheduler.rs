//! Persistent priority job queue.
//!
//! The queue is a flat JSON array at `system/jobQueue.json`, rewritten
//! whole through the atomic store on every change. It has a single writer
//! (the batch runner) and is not guarded by the store lock.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::StoreConfig;
use crate::error::{PublishError, Result};
use crate::store::{AtomicFileStore, StorageBackend};
use crate::types::{Job, JobStatus, JobUpdate};

/// Priority queue of publish jobs with a daily cap and circuit breaker.
pub struct JobScheduler<B: StorageBackend> {
    store: AtomicFileStore<B>,
    path: PathBuf,
    daily_limit: usize,
    max_consecutive_failures: usize,
    failure_window: usize,
}

impl<B: StorageBackend> JobScheduler<B> {
    /// Create a scheduler over the queue file in `config`.
    pub fn new(config: &StoreConfig, store: AtomicFileStore<B>) -> Self {
        Self {
            store,
            path: config.job_queue_path(),
            daily_limit: config.daily_publish_limit,
            max_consecutive_failures: config.max_consecutive_failures,
            failure_window: config.failure_window,
        }
    }

    /// Every job in insertion order. A missing queue file is empty.
    pub fn jobs(&self) -> Result<Vec<Job>> {
        match self.store.read_json(&self.path) {
            Ok(jobs) => Ok(jobs),
            Err(PublishError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Job by id.
    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs()?
            .into_iter()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| PublishError::JobNotFound(job_id.to_string()))
    }

    /// Enqueue a pending job.
    pub fn add_job(&self, job: Job) -> Result<Job> {
        if job.status != JobStatus::Pending {
            return Err(PublishError::validation(
                "status",
                format!("new jobs must be pending, got {}", job.status),
            ));
        }
        let mut jobs = self.jobs()?;
        if jobs.iter().any(|j| j.job_id == job.job_id) {
            return Err(PublishError::validation(
                "jobId",
                format!("job `{}` already queued", job.job_id),
            ));
        }
        jobs.push(job.clone());
        self.save(&jobs)?;
        tracing::info!(
            job_id = %job.job_id,
            topic_key = %job.topic_key,
            priority = job.priority,
            "job queued"
        );
        Ok(job)
    }

    /// Highest-priority pending job, earliest `scheduled_at` first on ties.
    pub fn get_next_job(&self) -> Result<Option<Job>> {
        Ok(self
            .jobs()?
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
            }))
    }

    /// Move a job to `status`.
    ///
    /// Entering `running` increments `attempts` and stamps `run_at`;
    /// entering a terminal status stamps `completed_at`. Failures record
    /// the update's error and completions its outputs.
    pub fn update_job_status(&self, job_id: &str, status: JobStatus, update: JobUpdate) -> Result<Job> {
        self.update_job_status_at(job_id, status, update, Utc::now())
    }

    /// [`update_job_status`](Self::update_job_status) with an explicit clock.
    pub fn update_job_status_at(
        &self,
        job_id: &str,
        status: JobStatus,
        update: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut jobs = self.jobs()?;
        let job = jobs
            .iter_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| PublishError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition_to(status) {
            return Err(PublishError::InvalidJobTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }

        job.status = status;
        match status {
            JobStatus::Running => {
                job.attempts += 1;
                job.run_at = Some(now);
            }
            JobStatus::Completed => {
                job.completed_at = Some(now);
                job.last_error = None;
                if update.outputs.is_some() {
                    job.outputs = update.outputs;
                }
            }
            JobStatus::Failed => {
                job.completed_at = Some(now);
                job.last_error = update.error;
            }
            JobStatus::Cancelled => {
                job.completed_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        let updated = job.clone();
        self.save(&jobs)?;
        tracing::debug!(job_id = %job_id, status = %status, attempts = updated.attempts, "job status updated");
        Ok(updated)
    }

    /// Put a failed job back in the queue while it has attempts left.
    pub fn requeue_failed(&self, job_id: &str) -> Result<Job> {
        let mut jobs = self.jobs()?;
        let job = jobs
            .iter_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| PublishError::JobNotFound(job_id.to_string()))?;

        if job.status != JobStatus::Failed || job.attempts >= job.max_attempts {
            return Err(PublishError::InvalidJobTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        job.status = JobStatus::Pending;
        job.completed_at = None;

        let updated = job.clone();
        self.save(&jobs)?;
        tracing::info!(job_id = %job_id, attempts = updated.attempts, "job requeued");
        Ok(updated)
    }

    /// Jobs completed on `date` (UTC).
    pub fn completed_on(&self, date: NaiveDate) -> Result<usize> {
        Ok(self
            .jobs()?
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .filter(|j| j.completed_at.map(|t| t.date_naive()) == Some(date))
            .count())
    }

    /// Whether today's completed jobs are under the daily limit.
    pub fn can_publish_today(&self) -> Result<bool> {
        self.can_publish_on(Utc::now())
    }

    /// Whether the UTC day of `now` is under the daily limit.
    pub fn can_publish_on(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.completed_on(now.date_naive())? < self.daily_limit)
    }

    /// Length of the run of failures among the most recent terminal jobs.
    ///
    /// Looks at up to `failure_window` completed or failed jobs, newest
    /// first, and stops at the first completion. Cancelled jobs are skipped.
    pub fn check_consecutive_failures(&self) -> Result<usize> {
        let mut finished: Vec<Job> = self
            .jobs()?
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Completed | JobStatus::Failed))
            .collect();
        finished.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

        Ok(finished
            .iter()
            .take(self.failure_window)
            .take_while(|j| j.status == JobStatus::Failed)
            .count())
    }

    /// Whether the consecutive-failure threshold has been reached.
    pub fn should_halt(&self) -> Result<bool> {
        let failures = self.check_consecutive_failures()?;
        if failures >= self.max_consecutive_failures {
            tracing::warn!(
                consecutive_failures = failures,
                threshold = self.max_consecutive_failures,
                "circuit breaker open"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn save(&self, jobs: &[Job]) -> Result<()> {
        self.store.write_json(&self.path, &jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBackend;
    use crate::types::{JobType, TopicKey};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn scheduler() -> JobScheduler<InMemoryBackend> {
        let config = StoreConfig::new("/store")
            .with_daily_publish_limit(2)
            .with_max_consecutive_failures(2);
        JobScheduler::new(&config, AtomicFileStore::new(Arc::new(InMemoryBackend::new())))
    }

    fn job(key: &str, priority: i32, scheduled_at: DateTime<Utc>) -> Job {
        Job::new(JobType::Publish, TopicKey::parse(key).unwrap(), priority).with_scheduled_at(scheduled_at)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn finish(s: &JobScheduler<InMemoryBackend>, key: &str, status: JobStatus, at: DateTime<Utc>) {
        let queued = s.add_job(job(key, 0, t0())).unwrap();
        s.update_job_status_at(&queued.job_id, JobStatus::Running, JobUpdate::default(), at)
            .unwrap();
        s.update_job_status_at(&queued.job_id, status, JobUpdate::error("boom"), at)
            .unwrap();
    }

    #[test]
    fn test_next_job_by_priority_then_schedule() {
        let s = scheduler();
        s.add_job(job("blog::low", 1, t0())).unwrap();
        let late = s.add_job(job("blog::late", 5, t0() + Duration::minutes(5))).unwrap();
        let early = s.add_job(job("blog::early", 5, t0())).unwrap();

        assert_eq!(s.get_next_job().unwrap().unwrap().job_id, early.job_id);
        s.update_job_status(&early.job_id, JobStatus::Running, JobUpdate::default())
            .unwrap();
        assert_eq!(s.get_next_job().unwrap().unwrap().job_id, late.job_id);
    }

    #[test]
    fn test_empty_queue() {
        let s = scheduler();
        assert!(s.jobs().unwrap().is_empty());
        assert!(s.get_next_job().unwrap().is_none());
        assert!(matches!(s.get_job("nope"), Err(PublishError::JobNotFound(_))));
    }

    #[test]
    fn test_running_stamps_attempt_and_time() {
        let s = scheduler();
        let queued = s.add_job(job("blog::a", 0, t0())).unwrap();
        let running = s
            .update_job_status_at(&queued.job_id, JobStatus::Running, JobUpdate::default(), t0())
            .unwrap();
        assert_eq!(running.attempts, 1);
        assert_eq!(running.run_at, Some(t0()));

        let done = s
            .update_job_status(
                &queued.job_id,
                JobStatus::Completed,
                JobUpdate::outputs(serde_json::json!({"slug": "a"})),
            )
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(s.get_job(&queued.job_id).unwrap().outputs, done.outputs);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let s = scheduler();
        let queued = s.add_job(job("blog::a", 0, t0())).unwrap();
        let err = s
            .update_job_status(&queued.job_id, JobStatus::Completed, JobUpdate::default())
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidJobTransition { .. }));

        s.update_job_status(&queued.job_id, JobStatus::Cancelled, JobUpdate::default())
            .unwrap();
        assert!(s
            .update_job_status(&queued.job_id, JobStatus::Running, JobUpdate::default())
            .is_err());
    }

    #[test]
    fn test_daily_cap_counts_completed_today_only() {
        let s = scheduler();
        let day = t0();
        finish(&s, "blog::a", JobStatus::Completed, day);
        finish(&s, "blog::b", JobStatus::Failed, day);
        assert!(s.can_publish_on(day).unwrap());

        finish(&s, "blog::c", JobStatus::Completed, day + Duration::hours(1));
        assert!(!s.can_publish_on(day).unwrap());
        assert!(s.can_publish_on(day + Duration::days(1)).unwrap());
    }

    #[test]
    fn test_consecutive_failures_stop_at_completion() {
        let s = scheduler();
        finish(&s, "blog::a", JobStatus::Failed, t0());
        finish(&s, "blog::b", JobStatus::Completed, t0() + Duration::minutes(1));
        finish(&s, "blog::c", JobStatus::Failed, t0() + Duration::minutes(2));
        assert_eq!(s.check_consecutive_failures().unwrap(), 1);
        assert!(!s.should_halt().unwrap());

        finish(&s, "blog::d", JobStatus::Failed, t0() + Duration::minutes(3));
        assert_eq!(s.check_consecutive_failures().unwrap(), 2);
        assert!(s.should_halt().unwrap());
    }

    #[test]
    fn test_requeue_respects_max_attempts() {
        let s = scheduler();
        let queued = s.add_job(job("blog::a", 0, t0()).with_max_attempts(2)).unwrap();
        for _ in 0..2 {
            s.update_job_status(&queued.job_id, JobStatus::Running, JobUpdate::default())
                .unwrap();
            s.update_job_status(&queued.job_id, JobStatus::Failed, JobUpdate::error("boom"))
                .unwrap();
            if s.get_job(&queued.job_id).unwrap().attempts < 2 {
                let requeued = s.requeue_failed(&queued.job_id).unwrap();
                assert_eq!(requeued.status, JobStatus::Pending);
            }
        }
        assert!(s.requeue_failed(&queued.job_id).is_err());
        assert_eq!(s.get_job(&queued.job_id).unwrap().last_error.as_deref(), Some("boom"));
    }
}
