//! Error taxonomy for publication.
//!
//! Every fallible operation in the crate returns [`PublishError`]. The
//! [`PublishError::kind`] label is stable and doubles as the metrics
//! failure taxonomy.

use std::path::PathBuf;

use crate::quality::QualityViolation;

/// Errors raised by the publish kernel.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Missing or malformed required document fields.
    #[error("Validation error on `{field}`: {reason}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The quality gate rejected the document.
    #[error("Quality gate blocked publish: {}", join_violations(.violations))]
    QualityGateBlocked {
        /// Itemized rule violations.
        violations: Vec<QualityViolation>,
    },

    /// Readback after an atomic write did not match the bytes written.
    #[error("Write verification failed for {}", .path.display())]
    WriteVerificationFailed {
        /// Destination path that was never replaced.
        path: PathBuf,
    },

    /// The index lock could not be acquired before the timeout.
    #[error("Timed out after {waited_ms}ms waiting for lock {}", .path.display())]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// A lock release was attempted by a caller that does not own it.
    #[error("Lock ownership verification failed: expected {expected}, found {}", .found.as_deref().unwrap_or("<none>"))]
    OwnershipVerificationFailed {
        /// Lock id held by the caller.
        expected: String,
        /// Lock id currently on disk, if any.
        found: Option<String>,
    },

    /// Two distinct topics want the same slug.
    #[error("Slug `{slug}` is owned by topic `{existing_topic_key}`, refusing to publish `{topic_key}`")]
    SlugTopicKeyConflict {
        /// Contested slug.
        slug: String,
        /// Topic that attempted the publish.
        topic_key: String,
        /// Topic that already owns the slug.
        existing_topic_key: String,
    },

    /// The body is byte-for-byte (after normalization) identical to another topic's.
    #[error("Content of `{topic_key}` duplicates published topic `{existing_topic_key}`")]
    DuplicateContent {
        /// Topic that attempted the publish.
        topic_key: String,
        /// Topic already holding the content hash.
        existing_topic_key: String,
    },

    /// Primary, backup and rebuild-from-source all failed.
    #[error("Index recovery exhausted: {}", .attempts.join("; "))]
    IndexRecoveryExhausted {
        /// Failure description per strategy, in the order tried.
        attempts: Vec<String>,
    },

    /// A required file does not exist.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No job with the given id.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job status change not allowed by the job state machine.
    #[error("Invalid job transition for {job_id}: {from} -> {to}")]
    InvalidJobTransition {
        /// Job id.
        job_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Slug collision resolution ran out of suffixes.
    #[error("No free slug derived from `{0}`")]
    SlugExhausted(String),

    /// Underlying filesystem error.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// A persisted file could not be encoded or decoded.
    #[error("Serialization error on {}: {message}", .path.display())]
    Serialization {
        /// Path being encoded or decoded.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },
}

impl PublishError {
    /// Create a validation error.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a serde_json error with the path it happened on.
    pub fn serialization(path: impl Into<PathBuf>, err: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Stable snake_case label for metrics and ledger records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::QualityGateBlocked { .. } => "quality_gate_blocked",
            Self::WriteVerificationFailed { .. } => "write_verification_failed",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::OwnershipVerificationFailed { .. } => "ownership_verification_failed",
            Self::SlugTopicKeyConflict { .. } => "slug_topic_key_conflict",
            Self::DuplicateContent { .. } => "duplicate_content",
            Self::IndexRecoveryExhausted { .. } => "index_recovery_exhausted",
            Self::NotFound(_) => "not_found",
            Self::JobNotFound(_) => "job_not_found",
            Self::InvalidJobTransition { .. } => "invalid_job_transition",
            Self::SlugExhausted(_) => "slug_exhausted",
            Self::Io { .. } => "io_error",
            Self::Serialization { .. } => "serialization_error",
        }
    }

    /// Whether retrying the same attempt later can succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Io { .. })
    }
}

fn join_violations(violations: &[QualityViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PublishError>;
