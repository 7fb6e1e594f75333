//! The extraction capability and the per-page retry driver around it.
//!
//! [`EntityExtractor`] is the single seam to the document-understanding
//! service: one method, one page in, a [`PageExtraction`] (entities and page
//! text) or a typed [`ServiceError`] out. Production code uses [`crate::pipeline::docai::DocumentAiClient`];
//! tests substitute a deterministic fake.
//!
//! ## Retry Strategy
//!
//! Only transient errors (timeouts, 429, 5xx, network) are retried, with
//! exponential backoff (`retry_backoff_ms * 2^(retry-1)`, capped at
//! `max_backoff_ms`). With a 500 ms base and 3 attempts the waits are
//! 500 ms → 1 s. Permanent errors end the page after the attempt that
//! produced them, and oversized pages are never sent at all.

use crate::config::ExtractionConfig;
use crate::document::PageUnit;
use crate::error::{PageError, ServiceError};
use crate::output::{PageExtraction, PageOutcome};
use crate::progress::ProgressDispatcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A black-box document-understanding capability for one page.
///
/// Implementations must not mutate the page and should return entities in
/// the order the service reported them.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// Extract entities and text from a single-page PDF.
    async fn extract(&self, page: &PageUnit) -> Result<PageExtraction, ServiceError>;
}

/// Drive one page to a terminal [`PageOutcome`].
///
/// Never returns an error: every failure mode, cancellation included, is
/// folded into the outcome so one bad page cannot abort the job.
#[instrument(level = "debug", skip_all, fields(page = page.index + 1))]
pub(crate) async fn process_page(
    extractor: Arc<dyn EntityExtractor>,
    page: PageUnit,
    config: &ExtractionConfig,
    progress: &ProgressDispatcher,
    cancel: &CancellationToken,
) -> PageOutcome {
    let start = Instant::now();
    let index = page.index;
    let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

    if page.bytes.len() > config.max_page_bytes {
        let err = ServiceError::PayloadTooLarge {
            size: page.bytes.len(),
            limit: config.max_page_bytes,
        };
        warn!("Page {}: {}", index + 1, err);
        return PageOutcome::failed(PageError::from_service(index, &err, 0), elapsed_ms(start));
    }

    let mut attempts = 0u32;
    let mut last_err: Option<ServiceError> = None;

    while attempts < config.max_attempts {
        if attempts > 0 {
            let backoff = config.backoff_for(attempts);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                index + 1,
                attempts,
                config.max_attempts - 1,
                backoff.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return PageOutcome::failed(PageError::cancelled(index, attempts), elapsed_ms(start));
                }
                _ = sleep(backoff) => {}
            }
        }

        let call = tokio::time::timeout(config.api_timeout(), extractor.extract(&page));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return PageOutcome::failed(PageError::cancelled(index, attempts), elapsed_ms(start));
            }
            r = call => r,
        };
        attempts += 1;

        let err = match result {
            Ok(Ok(extraction)) => {
                debug!(
                    "Page {}: {} entities, {} chars of text after {} attempt(s), {}ms",
                    index + 1,
                    extraction.entities.len(),
                    extraction.text.len(),
                    attempts,
                    elapsed_ms(start)
                );
                return PageOutcome::success(index, extraction.entities, attempts, elapsed_ms(start))
                    .with_text(extraction.text);
            }
            Ok(Err(e)) => e,
            Err(_elapsed) => ServiceError::Timeout {
                secs: config.api_timeout_secs,
            },
        };

        warn!("Page {}: attempt {} failed: {}", index + 1, attempts, err);
        if !err.is_transient() {
            return PageOutcome::failed(
                PageError::from_service(index, &err, attempts),
                elapsed_ms(start),
            );
        }
        if attempts < config.max_attempts {
            progress.page_retry(index, attempts, &err.to_string());
        }
        last_err = Some(err);
    }

    let err = last_err.unwrap_or(ServiceError::Network("no attempt was made".to_string()));
    PageOutcome::failed(PageError::from_service(index, &err, attempts), elapsed_ms(start))
}
