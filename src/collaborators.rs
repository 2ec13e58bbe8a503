//! Boundaries to systems outside the publish path.
//!
//! The coordinator calls [`CacheRevalidator`] and [`LinkSuggester`] after a
//! commit; their failures are logged and never fail a publish. The batch
//! runner asks a [`DocumentSource`] to turn a job into a document.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Document, Job, PageType, TopicKey};

/// Errors raised by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Cache revalidation failed.
    #[error("Revalidation failed: {0}")]
    Revalidation(String),

    /// Link suggestion failed.
    #[error("Link suggestion failed: {0}")]
    LinkSuggestion(String),

    /// No document could be produced for a job.
    #[error("Document generation failed for {topic_key}: {reason}")]
    Generation {
        /// Topic of the job.
        topic_key: String,
        /// Failure description.
        reason: String,
    },
}

/// Front-end cache revalidation.
pub trait CacheRevalidator: Send + Sync {
    /// Revalidate the given URL paths.
    fn revalidate(&self, paths: &[String]) -> Result<(), CollaboratorError>;
}

/// Suggested internal link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSuggestion {
    /// Target page type.
    pub page_type: PageType,
    /// Target slug.
    pub slug: String,
    /// Anchor text.
    pub anchor_text: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
}

/// Internal link suggestion generator.
pub trait LinkSuggester: Send + Sync {
    /// Suggest links for a freshly published document.
    fn suggest(&self, doc: &Document) -> Result<Vec<LinkSuggestion>, CollaboratorError>;
}

/// Produces the document a job should publish.
pub trait DocumentSource: Send + Sync {
    /// Build the document for `job`.
    fn build(&self, job: &Job) -> Result<Document, CollaboratorError>;
}

/// Revalidator that does nothing.
#[derive(Debug, Default)]
pub struct NoopRevalidator;

impl CacheRevalidator for NoopRevalidator {
    fn revalidate(&self, _paths: &[String]) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Link suggester that suggests nothing.
#[derive(Debug, Default)]
pub struct NoopLinkSuggester;

impl LinkSuggester for NoopLinkSuggester {
    fn suggest(&self, _doc: &Document) -> Result<Vec<LinkSuggestion>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Revalidator that records calls, optionally failing the first `n`.
#[derive(Debug, Default)]
pub struct RecordingRevalidator {
    calls: Mutex<Vec<Vec<String>>>,
    failures_remaining: Mutex<u32>,
}

impl RecordingRevalidator {
    /// Create a recorder that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder whose first `n` calls fail.
    pub fn failing(n: u32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(n),
        }
    }

    /// Paths passed to each call, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

impl CacheRevalidator for RecordingRevalidator {
    fn revalidate(&self, paths: &[String]) -> Result<(), CollaboratorError> {
        self.calls.lock().push(paths.to_vec());
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(CollaboratorError::Revalidation("injected failure".to_string()));
        }
        Ok(())
    }
}

impl<R: CacheRevalidator + ?Sized> CacheRevalidator for std::sync::Arc<R> {
    fn revalidate(&self, paths: &[String]) -> Result<(), CollaboratorError> {
        (**self).revalidate(paths)
    }
}

/// Link suggester that records slugs and returns fixed suggestions.
#[derive(Debug, Default)]
pub struct RecordingLinkSuggester {
    seen: Mutex<Vec<String>>,
    suggestions: Vec<LinkSuggestion>,
    fail: bool,
}

impl RecordingLinkSuggester {
    /// Suggest `suggestions` for every document.
    pub fn new(suggestions: Vec<LinkSuggestion>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            suggestions,
            fail: false,
        }
    }

    /// Fail every call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Slugs of documents seen, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl LinkSuggester for RecordingLinkSuggester {
    fn suggest(&self, doc: &Document) -> Result<Vec<LinkSuggestion>, CollaboratorError> {
        self.seen.lock().push(doc.slug.clone());
        if self.fail {
            return Err(CollaboratorError::LinkSuggestion("injected failure".to_string()));
        }
        Ok(self.suggestions.clone())
    }
}

impl<L: LinkSuggester + ?Sized> LinkSuggester for std::sync::Arc<L> {
    fn suggest(&self, doc: &Document) -> Result<Vec<LinkSuggestion>, CollaboratorError> {
        (**self).suggest(doc)
    }
}

/// Document source backed by a map of prepared documents.
#[derive(Debug, Default)]
pub struct StaticDocumentSource {
    documents: Mutex<HashMap<TopicKey, Document>>,
}

impl StaticDocumentSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the document for its topic key.
    pub fn insert(&self, doc: Document) {
        self.documents.lock().insert(doc.topic_key(), doc);
    }
}

impl DocumentSource for StaticDocumentSource {
    fn build(&self, job: &Job) -> Result<Document, CollaboratorError> {
        self.documents
            .lock()
            .get(&job.topic_key)
            .cloned()
            .ok_or_else(|| CollaboratorError::Generation {
                topic_key: job.topic_key.to_string(),
                reason: "no document registered".to_string(),
            })
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Wraps a revalidator with retries.
#[derive(Debug)]
pub struct RetryingRevalidator<R> {
    inner: R,
    policy: BackoffPolicy,
}

impl<R: CacheRevalidator> RetryingRevalidator<R> {
    /// Retry `inner` according to `policy`.
    pub fn new(inner: R, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<R: CacheRevalidator> CacheRevalidator for RetryingRevalidator<R> {
    fn revalidate(&self, paths: &[String]) -> Result<(), CollaboratorError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.revalidate(paths) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "revalidation failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
