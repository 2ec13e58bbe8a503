//! Store configuration and on-disk layout.
//!
//! All components take a [`StoreConfig`] at construction; nothing reads
//! paths or limits from module-level state.
//!
//! ## Layout
//!
//! ```text
//! <root>/documents/<type>/<slug>.json
//! <root>/system/contentIndex.json        (+ .backup)
//! <root>/system/topicLedger.json
//! <root>/system/jobQueue.json
//! <root>/system/.indexLock               (ephemeral)
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::PageType;

/// Configuration shared by every store component.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the document store.
    pub root_dir: PathBuf,
    /// Maximum time `acquire()` polls before raising `LockTimeout`.
    pub lock_timeout: Duration,
    /// Age after which a lock file is presumed abandoned.
    pub stale_threshold: Duration,
    /// Fixed polling interval while waiting on a held lock.
    pub lock_poll_interval: Duration,
    /// Completed jobs allowed per UTC day.
    pub daily_publish_limit: usize,
    /// Consecutive failures that open the circuit breaker.
    pub max_consecutive_failures: usize,
    /// Number of recent terminal jobs the circuit breaker inspects.
    pub failure_window: usize,
    /// Jaccard similarity at or above which content is a near-duplicate.
    pub near_duplicate_threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("content"),
            lock_timeout: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(5 * 60),
            lock_poll_interval: Duration::from_millis(100),
            daily_publish_limit: 25,
            max_consecutive_failures: 3,
            failure_window: 10,
            near_duplicate_threshold: 0.85,
        }
    }
}

impl StoreConfig {
    /// Create a configuration rooted at `root_dir` with default limits.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from `PUBLISH_*` environment variables.
    ///
    /// - `PUBLISH_ROOT_DIR`: store root (default: `content`)
    /// - `PUBLISH_LOCK_TIMEOUT_MS`: lock acquisition timeout
    /// - `PUBLISH_STALE_LOCK_MS`: stale lock threshold
    /// - `PUBLISH_LOCK_POLL_MS`: lock polling interval
    /// - `PUBLISH_DAILY_LIMIT`: completed jobs per UTC day
    /// - `PUBLISH_MAX_CONSECUTIVE_FAILURES`: circuit breaker threshold
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let root_dir = std::env::var("PUBLISH_ROOT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.root_dir);

        Self {
            root_dir,
            lock_timeout: env_millis("PUBLISH_LOCK_TIMEOUT_MS").unwrap_or(defaults.lock_timeout),
            stale_threshold: env_millis("PUBLISH_STALE_LOCK_MS").unwrap_or(defaults.stale_threshold),
            lock_poll_interval: env_millis("PUBLISH_LOCK_POLL_MS")
                .unwrap_or(defaults.lock_poll_interval),
            daily_publish_limit: env_parse("PUBLISH_DAILY_LIMIT")
                .unwrap_or(defaults.daily_publish_limit),
            max_consecutive_failures: env_parse("PUBLISH_MAX_CONSECUTIVE_FAILURES")
                .unwrap_or(defaults.max_consecutive_failures),
            failure_window: defaults.failure_window,
            near_duplicate_threshold: defaults.near_duplicate_threshold,
        }
    }

    /// Set the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the stale lock threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Set the lock polling interval.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Set the daily publish cap.
    pub fn with_daily_publish_limit(mut self, limit: usize) -> Self {
        self.daily_publish_limit = limit;
        self
    }

    /// Set the circuit breaker threshold.
    pub fn with_max_consecutive_failures(mut self, max: usize) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Directory holding documents of one page type.
    pub fn documents_dir(&self, page_type: PageType) -> PathBuf {
        self.root_dir.join("documents").join(page_type.dir_name())
    }

    /// Canonical file path for a document.
    pub fn document_path(&self, page_type: PageType, slug: &str) -> PathBuf {
        self.documents_dir(page_type).join(format!("{slug}.json"))
    }

    /// Directory for system files.
    pub fn system_dir(&self) -> PathBuf {
        self.root_dir.join("system")
    }

    /// Primary content index file.
    pub fn index_path(&self) -> PathBuf {
        self.system_dir().join("contentIndex.json")
    }

    /// Content index backup file.
    pub fn index_backup_path(&self) -> PathBuf {
        self.system_dir().join("contentIndex.json.backup")
    }

    /// Topic ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        self.system_dir().join("topicLedger.json")
    }

    /// Job queue file.
    pub fn job_queue_path(&self) -> PathBuf {
        self.system_dir().join("jobQueue.json")
    }

    /// Lock file guarding index and ledger mutation.
    pub fn lock_path(&self) -> PathBuf {
        self.system_dir().join(".indexLock")
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root_dir
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
