//! Incidents and metrics for the publish path.
//!
//! ## Incident Types
//!
//! | Incident | Severity | Response |
//! |----------|----------|----------|
//! | StaleLockReclaimed | HIGH | Check for crashed publishers |
//! | LockOwnershipViolation | CRITICAL | Audit index for lost updates |
//! | IndexRestoredFromBackup | MEDIUM | Inspect corrupt primary |
//! | IndexRebuiltFromSource | HIGH | Run the drift auditor |
//! | IndexRecoveryExhausted | CRITICAL | Serving degraded, restore manually |
//! | DuplicateContentRejected | LOW | Review generator prompts |
//! | DriftDetected | MEDIUM | Reconcile index and files |
//!
//! ## Metrics Integration
//!
//! Incidents and publish attempts both flow into [`PublishMetrics`], a
//! counter/histogram interface that observability backends implement.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Investigate within a day.
    Low,
    /// Investigate within hours.
    Medium,
    /// Investigate within the hour.
    High,
    /// Immediate attention.
    Critical,
}

impl Severity {
    /// Lowercase label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Type of incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncidentType {
    /// A lock older than the stale threshold was force-removed.
    StaleLockReclaimed {
        /// Id of the reclaimed lock.
        lock_id: String,
        /// Process recorded in the lock.
        process_id: u32,
        /// Lock age when reclaimed.
        age_ms: u64,
    },
    /// A holder tried to release a lock it does not own.
    LockOwnershipViolation {
        /// Lock id the caller held.
        expected: String,
        /// Lock id found on disk.
        found: Option<String>,
    },
    /// Primary index was corrupt and the backup replaced it.
    IndexRestoredFromBackup {
        /// Why the primary was rejected.
        primary_error: String,
    },
    /// Primary and backup were unusable; the index was rebuilt from documents.
    IndexRebuiltFromSource {
        /// Entries in the rebuilt index.
        entries: usize,
        /// Documents skipped as schema-invalid.
        invalid_documents: usize,
    },
    /// Every recovery strategy failed; an empty index is being served.
    IndexRecoveryExhausted {
        /// Failure per strategy.
        attempts: Vec<String>,
    },
    /// A body identical to another topic's was refused.
    DuplicateContentRejected {
        /// Topic that attempted the publish.
        topic_key: String,
        /// Topic that already holds the content.
        existing_topic_key: String,
    },
    /// The auditor found divergence between index, files and ledger.
    DriftDetected {
        /// Number of findings.
        findings: usize,
    },
}

impl IncidentType {
    /// Severity of this incident type.
    pub fn severity(&self) -> Severity {
        match self {
            Self::StaleLockReclaimed { .. } => Severity::High,
            Self::LockOwnershipViolation { .. } => Severity::Critical,
            Self::IndexRestoredFromBackup { .. } => Severity::Medium,
            Self::IndexRebuiltFromSource { .. } => Severity::High,
            Self::IndexRecoveryExhausted { .. } => Severity::Critical,
            Self::DuplicateContentRejected { .. } => Severity::Low,
            Self::DriftDetected { .. } => Severity::Medium,
        }
    }

    /// Counter name for this incident type.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::StaleLockReclaimed { .. } => "publish_kernel_stale_locks_reclaimed_total",
            Self::LockOwnershipViolation { .. } => "publish_kernel_lock_ownership_violations_total",
            Self::IndexRestoredFromBackup { .. } => "publish_kernel_index_backup_restores_total",
            Self::IndexRebuiltFromSource { .. } => "publish_kernel_index_rebuilds_total",
            Self::IndexRecoveryExhausted { .. } => "publish_kernel_index_recovery_exhausted_total",
            Self::DuplicateContentRejected { .. } => "publish_kernel_duplicate_content_total",
            Self::DriftDetected { .. } => "publish_kernel_drift_detected_total",
        }
    }

    /// Short uppercase code used in log messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StaleLockReclaimed { .. } => "STALE_LOCK_RECLAIMED",
            Self::LockOwnershipViolation { .. } => "LOCK_OWNERSHIP_VIOLATION",
            Self::IndexRestoredFromBackup { .. } => "INDEX_RESTORED_FROM_BACKUP",
            Self::IndexRebuiltFromSource { .. } => "INDEX_REBUILT_FROM_SOURCE",
            Self::IndexRecoveryExhausted { .. } => "INDEX_RECOVERY_EXHAUSTED",
            Self::DuplicateContentRejected { .. } => "DUPLICATE_CONTENT_REJECTED",
            Self::DriftDetected { .. } => "DRIFT_DETECTED",
        }
    }
}

/// A recorded incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Unique incident ID.
    pub id: String,
    /// When the incident occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of incident.
    pub incident_type: IncidentType,
    /// Severity level.
    pub severity: Severity,
    /// Component that raised it.
    pub source: String,
    /// Additional context.
    pub context: HashMap<String, String>,
}

impl Incident {
    /// Create a new incident.
    pub fn new(incident_type: IncidentType, source: impl Into<String>) -> Self {
        let severity = incident_type.severity();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            incident_type,
            severity,
            source: source.into(),
            context: HashMap::new(),
        }
    }

    /// Add context to the incident.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Log this incident as a structured event.
    pub fn log(&self) {
        match self.severity {
            Severity::Low | Severity::Medium => tracing::warn!(
                incident_id = %self.id,
                incident_type = ?self.incident_type,
                severity = %self.severity,
                source = %self.source,
                context = ?self.context,
                "PUBLISH_INCIDENT: {}",
                self.incident_type.code()
            ),
            Severity::High | Severity::Critical => tracing::error!(
                incident_id = %self.id,
                incident_type = ?self.incident_type,
                severity = %self.severity,
                source = %self.source,
                context = ?self.context,
                "PUBLISH_INCIDENT: {}",
                self.incident_type.code()
            ),
        }
    }
}

/// One publish attempt, as reported to metrics.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    /// Page type label.
    pub page_type: &'static str,
    /// `published`, `completed`, `skipped` or `failed`.
    pub outcome: &'static str,
    /// Failure taxonomy label (failed attempts only).
    pub failure_kind: Option<&'static str>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// Counter name for publish attempts.
pub const PUBLISH_ATTEMPTS_METRIC: &str = "publish_kernel_publish_attempts_total";

/// Histogram name for publish durations.
pub const PUBLISH_DURATION_METRIC: &str = "publish_kernel_publish_duration_ms";

/// Metrics sink interface.
///
/// Implementations map these calls onto a concrete backend (Prometheus,
/// StatsD, logs).
pub trait PublishMetrics: Send + Sync {
    /// Increment a counter by 1.
    fn increment(&self, metric_name: &str, labels: &[(&str, &str)]);

    /// Record an observation in milliseconds.
    fn observe_ms(&self, metric_name: &str, value_ms: u64, labels: &[(&str, &str)]);

    /// Record a publish attempt.
    fn record_attempt(&self, attempt: &PublishAttempt) {
        let failure = attempt.failure_kind.unwrap_or("none");
        let labels = [
            ("page_type", attempt.page_type),
            ("outcome", attempt.outcome),
            ("failure_kind", failure),
        ];
        self.increment(PUBLISH_ATTEMPTS_METRIC, &labels);
        self.observe_ms(PUBLISH_DURATION_METRIC, attempt.duration_ms, &labels[..2]);
    }

    /// Record an incident.
    fn record_incident(&self, incident: &Incident) {
        self.increment(
            incident.incident_type.metric_name(),
            &[("severity", incident.severity.label())],
        );
    }
}

/// No-op metrics implementation.
#[derive(Debug, Default)]
pub struct NoOpMetrics;

impl PublishMetrics for NoOpMetrics {
    fn increment(&self, _metric_name: &str, _labels: &[(&str, &str)]) {}

    fn observe_ms(&self, _metric_name: &str, _value_ms: u64, _labels: &[(&str, &str)]) {}
}

/// In-memory metrics for testing.
#[derive(Debug, Default)]
pub struct TestMetrics {
    /// Counter values keyed by `name:labels`.
    pub counters: Mutex<HashMap<String, u64>>,
    /// Observations keyed by `name:labels`.
    pub observations: Mutex<HashMap<String, Vec<u64>>>,
}

impl PublishMetrics for TestMetrics {
    fn increment(&self, metric_name: &str, labels: &[(&str, &str)]) {
        let key = format!("{}:{:?}", metric_name, labels);
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(key).or_insert(0) += 1;
    }

    fn observe_ms(&self, metric_name: &str, value_ms: u64, labels: &[(&str, &str)]) {
        let key = format!("{}:{:?}", metric_name, labels);
        let mut observations = self.observations.lock().unwrap_or_else(|e| e.into_inner());
        observations.entry(key).or_default().push(value_ms);
    }
}

impl TestMetrics {
    /// Sum of all counters whose key starts with `metric_name`.
    pub fn get_count(&self, metric_name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|(k, _)| k.starts_with(metric_name))
            .map(|(_, v)| v)
            .sum()
    }

    /// Sum of counters for `metric_name` whose labels include `label`.
    pub fn get_count_with(&self, metric_name: &str, label: (&str, &str)) -> u64 {
        let needle = format!("{:?}", label);
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|(k, _)| k.starts_with(metric_name) && k.contains(&needle))
            .map(|(_, v)| v)
            .sum()
    }
}

/// Log an incident and count it.
pub fn raise(metrics: &dyn PublishMetrics, incident: Incident) -> Incident {
    incident.log();
    metrics.record_incident(&incident);
    incident
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_type_severity() {
        let stale = IncidentType::StaleLockReclaimed {
            lock_id: "l".to_string(),
            process_id: 1,
            age_ms: 600_000,
        };
        assert_eq!(stale.severity(), Severity::High);

        let exhausted = IncidentType::IndexRecoveryExhausted { attempts: vec![] };
        assert_eq!(exhausted.severity(), Severity::Critical);
    }

    #[test]
    fn test_incident_creation() {
        let incident = Incident::new(
            IncidentType::DriftDetected { findings: 3 },
            "audit",
        )
        .with_context("root", "/srv/store");

        assert!(!incident.id.is_empty());
        assert_eq!(incident.severity, Severity::Medium);
        assert_eq!(incident.context.get("root"), Some(&"/srv/store".to_string()));
    }

    #[test]
    fn test_raise_counts_incident() {
        let metrics = TestMetrics::default();
        raise(
            &metrics,
            Incident::new(IncidentType::IndexRestoredFromBackup { primary_error: "eof".into() }, "index"),
        );
        assert_eq!(metrics.get_count("publish_kernel_index_backup_restores_total"), 1);
    }

    #[test]
    fn test_record_attempt_labels() {
        let metrics = TestMetrics::default();
        metrics.record_attempt(&PublishAttempt {
            page_type: "blog",
            outcome: "failed",
            failure_kind: Some("lock_timeout"),
            duration_ms: 12,
        });
        assert_eq!(metrics.get_count(PUBLISH_ATTEMPTS_METRIC), 1);
        assert_eq!(
            metrics.get_count_with(PUBLISH_ATTEMPTS_METRIC, ("failure_kind", "lock_timeout")),
            1
        );
        let observations = metrics.observations.lock().unwrap();
        assert_eq!(observations.values().flatten().copied().collect::<Vec<_>>(), vec![12]);
    }
}
