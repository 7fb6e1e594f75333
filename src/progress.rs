//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator resolves each page.
//!
//! Pages complete concurrently, but callbacks do not have to be reentrant:
//! every event goes through a single [`ProgressDispatcher`] which delivers
//! them one at a time and keeps the resolved count monotonic. A callback
//! that panics is logged and otherwise ignored.
//!
//! # Example
//!
//! ```rust
//! use docai_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Counter {
//!     fn on_page_resolved(&self, index: usize, resolved: usize, total: usize) {
//!         self.0.store(resolved, Ordering::SeqCst);
//!         eprintln!("page {} done ({resolved}/{total})", index + 1);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Called by the orchestrator as pages resolve.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after splitting, before any page is dispatched.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a transient failure is about to be retried.
    ///
    /// # Arguments
    /// * `index`  : 0-based page index
    /// * `attempt`: the attempt that just failed (1-based)
    /// * `error`  : human-readable error description
    fn on_page_retry(&self, index: usize, attempt: u32, error: &str) {
        let _ = (index, attempt, error);
    }

    /// Called exactly once per page when it reaches a terminal outcome,
    /// success or failure.
    ///
    /// # Arguments
    /// * `index`   : 0-based page index
    /// * `resolved`: pages resolved so far, this one included; strictly
    ///   increasing across calls
    /// * `total`   : total pages in the job
    fn on_page_resolved(&self, index: usize, resolved: usize, total: usize) {
        let _ = (index, resolved, total);
    }

    /// Called once after every page has an outcome.
    fn on_job_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// Serialises callback delivery for one job.
pub(crate) struct ProgressDispatcher {
    callback: Option<ProgressCallback>,
    total: usize,
    resolved: Mutex<usize>,
}

impl ProgressDispatcher {
    pub(crate) fn new(callback: Option<ProgressCallback>, total: usize) -> Self {
        Self {
            callback,
            total,
            resolved: Mutex::new(0),
        }
    }

    pub(crate) fn job_start(&self) {
        let total = self.total;
        self.deliver("on_job_start", |cb| cb.on_job_start(total));
    }

    pub(crate) fn page_retry(&self, index: usize, attempt: u32, error: &str) {
        self.deliver("on_page_retry", |cb| cb.on_page_retry(index, attempt, error));
    }

    pub(crate) fn page_resolved(&self, index: usize) {
        let total = self.total;
        let mut resolved = match self.resolved.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *resolved += 1;
        let count = *resolved;
        // The lock stays held while the callback runs so deliveries are
        // one-at-a-time and counts arrive in order.
        if let Some(cb) = &self.callback {
            Self::guarded("on_page_resolved", || cb.on_page_resolved(index, count, total));
        }
    }

    pub(crate) fn job_complete(&self, succeeded: usize) {
        let total = self.total;
        self.deliver("on_job_complete", |cb| cb.on_job_complete(total, succeeded));
    }

    fn deliver(&self, event: &str, f: impl FnOnce(&dyn ExtractionProgressCallback)) {
        let Some(cb) = &self.callback else {
            return;
        };
        let _serial = match self.resolved.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::guarded(event, || f(cb.as_ref()));
    }

    fn guarded(event: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            warn!("Progress callback panicked in {event}; continuing");
        }
    }
}
