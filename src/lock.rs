//! Cross-process lock over `system/.indexLock`.
//!
//! ## Protocol
//!
//! ```text
//! acquire:  create_new(lock, record) ──ok──▶ held
//!                │ AlreadyExists
//!                ▼
//!           read existing ── age > stale ──▶ re-read, same lockId? remove, retry
//!                │ young
//!                ▼
//!           sleep(poll) until timeout ──▶ LockTimeout
//!
//! release:  read lock ── lockId == ours ──▶ remove
//!                └──── otherwise ─────────▶ OwnershipVerificationFailed
//! ```
//!
//! The lock is not reentrant. [`LockManager::with_lock`] is the supported
//! entry point; [`LockGuard`] releases on drop so panics inside the
//! critical section do not leak the lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::to_json_bytes;
use crate::config::StoreConfig;
use crate::error::{PublishError, Result};
use crate::incident::{raise, Incident, IncidentType, PublishMetrics};
use crate::store::StorageBackend;

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Timestamp plus random suffix; the ownership token.
    pub lock_id: String,
    /// Process that created the lock.
    pub process_id: u32,
    /// Creation time, used for staleness.
    pub created_at: DateTime<Utc>,
}

impl LockRecord {
    /// Fresh record for the current process.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            lock_id: format!("{}-{}", now.timestamp_millis(), uuid::Uuid::new_v4().simple()),
            process_id: std::process::id(),
            created_at: now,
        }
    }

    /// Age relative to `now`. Future timestamps count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

impl Default for LockRecord {
    fn default() -> Self {
        Self::new()
    }
}

enum Observed {
    Missing,
    Held(LockRecord),
    Unreadable(String),
}

/// Lock manager for one store.
pub struct LockManager<B: StorageBackend> {
    backend: Arc<B>,
    metrics: Arc<dyn PublishMetrics>,
    path: PathBuf,
    timeout: Duration,
    stale_threshold: Duration,
    poll_interval: Duration,
}

impl<B: StorageBackend> std::fmt::Debug for LockManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("stale_threshold", &self.stale_threshold)
            .finish()
    }
}

impl<B: StorageBackend> LockManager<B> {
    /// Create a lock manager for `config.lock_path()`.
    pub fn new(config: &StoreConfig, backend: Arc<B>, metrics: Arc<dyn PublishMetrics>) -> Self {
        Self {
            backend,
            metrics,
            path: config.lock_path(),
            timeout: config.lock_timeout,
            stale_threshold: config.stale_threshold,
            poll_interval: config.lock_poll_interval,
        }
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, polling until the configured timeout.
    pub fn acquire(&self) -> Result<LockGuard<'_, B>> {
        let started = Instant::now();
        let mut first_seen_unreadable: Option<Instant> = None;

        loop {
            let record = LockRecord::new();
            let bytes = to_json_bytes(&record).map_err(|e| PublishError::serialization(&self.path, e))?;
            match self.backend.create_new(&self.path, &bytes) {
                Ok(()) => {
                    tracing::debug!(
                        lock_id = %record.lock_id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock acquired"
                    );
                    return Ok(LockGuard {
                        manager: self,
                        record: Some(record),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(PublishError::io(&self.path, e)),
            }

            match self.observe() {
                Observed::Missing => continue,
                Observed::Held(existing) => {
                    first_seen_unreadable = None;
                    let age = existing.age_at(Utc::now());
                    if age > self.stale_threshold && self.reclaim_stale(&existing, age)? {
                        continue;
                    }
                }
                Observed::Unreadable(reason) => {
                    let seen = *first_seen_unreadable.get_or_insert_with(Instant::now);
                    if seen.elapsed() > self.stale_threshold {
                        self.reclaim_unreadable(&reason)?;
                        first_seen_unreadable = None;
                        continue;
                    }
                }
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                tracing::warn!(
                    path = %self.path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "lock acquisition timed out"
                );
                return Err(PublishError::LockTimeout {
                    path: self.path.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            std::thread::sleep(self.poll_interval.min(self.timeout - waited));
        }
    }

    /// Run `f` while holding the lock. The lock is released on every exit path.
    pub fn with_lock<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let guard = self.acquire()?;
        let result = f();
        let released = guard.release();
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                tracing::warn!(error = %release_err, "lock release failed after critical section error");
                Err(err)
            }
        }
    }

    /// Release `record` if it still owns the lock file.
    pub fn release_record(&self, record: &LockRecord) -> Result<()> {
        let found = match self.observe() {
            Observed::Held(found) if found.lock_id == record.lock_id => {
                self.backend
                    .remove(&self.path)
                    .map_err(|e| PublishError::io(&self.path, e))?;
                tracing::debug!(lock_id = %record.lock_id, "lock released");
                return Ok(());
            }
            Observed::Held(found) => Some(found.lock_id),
            Observed::Missing | Observed::Unreadable(_) => None,
        };

        raise(
            self.metrics.as_ref(),
            Incident::new(
                IncidentType::LockOwnershipViolation {
                    expected: record.lock_id.clone(),
                    found: found.clone(),
                },
                "lock",
            ),
        );
        Err(PublishError::OwnershipVerificationFailed {
            expected: record.lock_id.clone(),
            found,
        })
    }

    /// Current lock holder, if the lock file exists and parses.
    pub fn current_holder(&self) -> Option<LockRecord> {
        match self.observe() {
            Observed::Held(record) => Some(record),
            _ => None,
        }
    }

    fn observe(&self) -> Observed {
        match self.backend.read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<LockRecord>(&bytes) {
                Ok(record) => Observed::Held(record),
                Err(e) => Observed::Unreadable(e.to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Observed::Missing,
            Err(e) => Observed::Unreadable(e.to_string()),
        }
    }

    /// Remove a stale lock if it is still the one we judged stale.
    /// Returns `true` when acquisition should be retried immediately.
    fn reclaim_stale(&self, stale: &LockRecord, age: Duration) -> Result<bool> {
        match self.observe() {
            Observed::Held(current) if current.lock_id == stale.lock_id => {}
            Observed::Missing => return Ok(true),
            _ => return Ok(false),
        }

        match self.backend.remove(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(PublishError::io(&self.path, e)),
        }

        raise(
            self.metrics.as_ref(),
            Incident::new(
                IncidentType::StaleLockReclaimed {
                    lock_id: stale.lock_id.clone(),
                    process_id: stale.process_id,
                    age_ms: age.as_millis() as u64,
                },
                "lock",
            )
            .with_context("path", self.path.display().to_string()),
        );
        Ok(true)
    }

    fn reclaim_unreadable(&self, reason: &str) -> Result<()> {
        match self.backend.remove(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PublishError::io(&self.path, e)),
        }
        raise(
            self.metrics.as_ref(),
            Incident::new(
                IncidentType::StaleLockReclaimed {
                    lock_id: "<unreadable>".to_string(),
                    process_id: 0,
                    age_ms: self.stale_threshold.as_millis() as u64,
                },
                "lock",
            )
            .with_context("path", self.path.display().to_string())
            .with_context("reason", reason),
        );
        Ok(())
    }
}

/// Held lock. Released by [`LockGuard::release`] or on drop.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a, B: StorageBackend> {
    manager: &'a LockManager<B>,
    record: Option<LockRecord>,
}

impl<B: StorageBackend> std::fmt::Debug for LockGuard<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.manager.path)
            .field("lock_id", &self.lock_id())
            .finish()
    }
}

impl<B: StorageBackend> LockGuard<'_, B> {
    /// Ownership token of this guard.
    pub fn lock_id(&self) -> &str {
        self.record.as_ref().map(|r| r.lock_id.as_str()).unwrap_or("")
    }

    /// Release the lock, verifying ownership.
    pub fn release(mut self) -> Result<()> {
        match self.record.take() {
            Some(record) => self.manager.release_record(&record),
            None => Ok(()),
        }
    }
}

impl<B: StorageBackend> Drop for LockGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            if let Err(e) = self.manager.release_record(&record) {
                tracing::error!(lock_id = %record.lock_id, error = %e, "lock release on drop failed");
            }
        }
    }
}
