//! Job queue types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::TopicKey;

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// First publication of a topic.
    #[default]
    Publish,
    /// Regenerate and republish an existing topic.
    Refresh,
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to run.
    Pending,
    /// Picked up by a runner.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl JobStatus {
    /// Whether the job has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A queued unit of publish work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique id.
    pub job_id: String,
    /// Job kind.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Topic the job publishes.
    pub topic_key: TopicKey,
    /// Status.
    pub status: JobStatus,
    /// Higher runs first.
    pub priority: i32,
    /// Times the job has been started.
    #[serde(default)]
    pub attempts: u32,
    /// Starts allowed before the job stays failed.
    pub max_attempts: u32,
    /// Enqueue time; tie-breaker within a priority.
    pub scheduled_at: DateTime<Utc>,
    /// Last start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error from the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Free-form results recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
}

/// Default `max_attempts` for new jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl Job {
    /// Create a pending job.
    pub fn new(job_type: JobType, topic_key: TopicKey, priority: i32) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_type,
            topic_key,
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: Utc::now(),
            run_at: None,
            completed_at: None,
            last_error: None,
            outputs: None,
        }
    }

    /// Override `max_attempts`.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override `scheduled_at`.
    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }
}

/// Extra data attached to a status update.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// Error message (failed jobs).
    pub error: Option<String>,
    /// Outputs (completed jobs).
    pub outputs: Option<serde_json::Value>,
}

impl JobUpdate {
    /// Update carrying an error.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            outputs: None,
        }
    }

    /// Update carrying outputs.
    pub fn outputs(outputs: serde_json::Value) -> Self {
        Self {
            error: None,
            outputs: Some(outputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_job_serializes_type_field() {
        let job = Job::new(JobType::Refresh, TopicKey::parse("blog::a").unwrap(), 5);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "refresh");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["maxAttempts"], DEFAULT_MAX_ATTEMPTS);
    }
}
