//! Job orchestration: split, extract every page concurrently, aggregate.
//!
//! ## Fan-out / fan-in
//!
//! Pages are dispatched through `buffer_unordered(concurrency)`; each page
//! runs on its own Tokio task so slow pages never hold back CPU work on
//! others. Outcomes arrive in completion order and are written into one
//! write-once slot per page index, then read back in page order. The
//! resulting report therefore always lists pages in document order no
//! matter how the service latencies interleave.
//!
//! ## Cancellation
//!
//! [`PageOrchestrator::cancellation_token`] hands out the job's
//! [`CancellationToken`]. Once cancelled, no further page is dispatched and
//! in-flight pages stop at their next suspension point. Every page that had
//! not succeeded by then is reported as `Cancelled`, and the job ends with
//! [`JobStatus::Cancelled`] instead of an error.

use crate::config::ExtractionConfig;
use crate::document::{Document, DocumentInfo, PageUnit};
use crate::error::{JobError, PageError, PageErrorKind};
use crate::output::{ExtractionReport, Job, JobStats, JobStatus, PageOutcome};
use crate::pipeline::docai::DocumentAiClient;
use crate::pipeline::extract::{process_page, EntityExtractor};
use crate::pipeline::{aggregate, export, input, split};
use crate::progress::ProgressDispatcher;
use crate::storage::{ArtifactKeys, ReportStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs extraction jobs with one configuration and one extractor.
pub struct PageOrchestrator {
    config: ExtractionConfig,
    extractor: Arc<dyn EntityExtractor>,
    cancel: CancellationToken,
}

/// A finished job together with where its artifacts were stored.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job: Job,
    pub input_location: String,
    pub workbook_location: String,
    pub json_location: String,
}

impl PageOrchestrator {
    /// Build an orchestrator for `config`.
    ///
    /// Uses `config.extractor` when set, otherwise a [`DocumentAiClient`]
    /// for `config.processor`; that fails with [`JobError::InvalidConfig`]
    /// when the processor is incomplete.
    pub fn new(config: ExtractionConfig) -> Result<Self, JobError> {
        let extractor: Arc<dyn EntityExtractor> = match &config.extractor {
            Some(extractor) => Arc::clone(extractor),
            None => Arc::new(DocumentAiClient::new(
                &config.processor,
                config.api_timeout_secs,
            )?),
        };
        Ok(Self {
            config,
            extractor,
            cancel: CancellationToken::new(),
        })
    }

    /// Share an externally owned cancellation token, e.g. one tied to Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels every job run by this orchestrator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run one document end to end.
    ///
    /// # Errors
    /// Only job-fatal conditions: the document cannot be split, or the
    /// per-page outcomes fail validation. Page failures are recorded in the
    /// report and reflected in [`Job::status`].
    pub async fn run(&self, document: &Document) -> Result<Job, JobError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let total_start = Instant::now();
        info!(
            "Starting job {} for '{}' ({} pages)",
            id,
            document.name(),
            document.page_count()
        );

        // ── Step 1: Split ────────────────────────────────────────────────────
        let split_start = Instant::now();
        let units = split::split_document(document).await.map_err(|e| {
            error!("Job {} failed before dispatch: {}", id, e);
            e
        })?;
        let split_duration_ms = split_start.elapsed().as_millis() as u64;

        // ── Step 2: Extract + aggregate ──────────────────────────────────────
        let extract_start = Instant::now();
        let report = self.run_units(document.name(), units).await?;
        let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        // ── Step 3: Stats ────────────────────────────────────────────────────
        let stats = JobStats {
            total_pages: report.page_count(),
            succeeded_pages: report.succeeded(),
            failed_pages: report.failed(),
            cancelled_pages: report.cancelled(),
            entity_count: report.entity_count(),
            total_attempts: report.outcomes.iter().map(|o| o.attempts as u64).sum(),
            split_duration_ms,
            extract_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        let status = if stats.cancelled_pages > 0 {
            JobStatus::Cancelled
        } else if stats.failed_pages > 0 {
            JobStatus::CompletedWithFailures
        } else {
            JobStatus::Completed
        };

        info!(
            "Job {} {:?}: {}/{} pages, {} entities, {}ms total",
            id,
            status,
            stats.succeeded_pages,
            stats.total_pages,
            stats.entity_count,
            stats.total_duration_ms
        );

        Ok(Job {
            id,
            document_name: document.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            stats,
            text: report.full_text(),
            report,
        })
    }

    /// Extract already-split units and assemble the report.
    ///
    /// `units` must carry the indices `0..n` exactly once each, in any order.
    pub async fn run_units(
        &self,
        document_name: &str,
        mut units: Vec<PageUnit>,
    ) -> Result<ExtractionReport, JobError> {
        units.sort_by_key(|u| u.index);
        if units.iter().enumerate().any(|(i, u)| u.index != i) {
            return Err(JobError::Aggregation {
                detail: "page units must be indexed 0..n without gaps".to_string(),
            });
        }

        let total = units.len();
        let progress = Arc::new(ProgressDispatcher::new(
            self.config.progress_callback.clone(),
            total,
        ));
        progress.job_start();

        let mut slots: Vec<Option<PageOutcome>> = (0..total).map(|_| None).collect();
        let mut outcomes = stream::iter(units.into_iter().map(|unit| {
            let extractor = Arc::clone(&self.extractor);
            let config = self.config.clone();
            let progress = Arc::clone(&progress);
            let cancel = self.cancel.clone();
            async move { dispatch(extractor, unit, config, progress, cancel).await }
        }))
        .buffer_unordered(self.config.concurrency);

        while let Some(outcome) = outcomes.next().await {
            let index = outcome.index;
            let slot = slots.get_mut(index).ok_or_else(|| JobError::Aggregation {
                detail: format!("outcome for unknown page {}", index + 1),
            })?;
            if slot.is_some() {
                return Err(JobError::Aggregation {
                    detail: format!("page {} resolved twice", index + 1),
                });
            }
            *slot = Some(outcome);
            progress.page_resolved(index);
        }

        let outcomes: Vec<PageOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| JobError::Aggregation {
                    detail: format!("page {} never resolved", i + 1),
                })
            })
            .collect::<Result<_, _>>()?;

        let report = aggregate::build_report(document_name, outcomes)?;
        progress.job_complete(report.succeeded());
        Ok(report)
    }

    /// Run a document and store its input, workbook and JSON in `store`.
    pub async fn run_and_store(
        &self,
        document: &Document,
        store: &dyn ReportStore,
    ) -> Result<StoredJob, JobError> {
        let job = self.run(document).await?;
        let keys = ArtifactKeys::new(document.name(), job.started_at);

        let workbook = export::export_workbook(&job.report)?;
        let json = export::export_json(&job)?;

        let input_location = store.put(&keys.input, document.bytes()).await?;
        let workbook_location = store.put(&keys.workbook, &workbook).await?;
        let json_location = store.put(&keys.json, &json).await?;
        info!("Stored report for '{}' at {}", document.name(), workbook_location);

        Ok(StoredJob {
            job,
            input_location,
            workbook_location,
            json_location,
        })
    }
}

/// Resolve one page on its own task.
async fn dispatch(
    extractor: Arc<dyn EntityExtractor>,
    unit: PageUnit,
    config: ExtractionConfig,
    progress: Arc<ProgressDispatcher>,
    cancel: CancellationToken,
) -> PageOutcome {
    let index = unit.index;
    if cancel.is_cancelled() {
        debug!("Page {}: not dispatched, job cancelled", index + 1);
        return PageOutcome::failed(PageError::cancelled(index, 0), 0);
    }

    let start = Instant::now();
    let task = tokio::spawn(async move {
        process_page(extractor, unit, &config, &progress, &cancel).await
    });
    match task.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            warn!("Page {}: extraction task failed: {}", index + 1, join_err);
            PageOutcome::failed(
                PageError {
                    index,
                    kind: PageErrorKind::PermanentServiceError,
                    message: "extraction task panicked".to_string(),
                    attempts: 0,
                },
                start.elapsed().as_millis() as u64,
            )
        }
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Load `input` (path or URL) and run it with a fresh orchestrator.
///
/// # Example
/// ```rust,no_run
/// use docai_extract::{extract_document, ExtractionConfig, ProcessorConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder()
///     .processor(ProcessorConfig::from_env())
///     .build()?;
/// let job = extract_document("claim.pdf", &config).await?;
/// println!("{} entities", job.stats.entity_count);
/// # Ok(())
/// # }
/// ```
pub async fn extract_document(input: &str, config: &ExtractionConfig) -> Result<Job, JobError> {
    let document = input::load_document(input, config.download_timeout_secs).await?;
    PageOrchestrator::new(config.clone())?.run(&document).await
}

/// Run PDF bytes already in memory.
pub async fn extract_from_bytes(
    name: &str,
    bytes: Vec<u8>,
    config: &ExtractionConfig,
) -> Result<Job, JobError> {
    let document = Document::from_bytes(name, bytes).map_err(|source| JobError::Split {
        name: name.to_string(),
        source,
    })?;
    PageOrchestrator::new(config.clone())?.run(&document).await
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_document_sync(input: &str, config: &ExtractionConfig) -> Result<Job, JobError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| JobError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_document(input, config))
}

/// Page count and PDF version without contacting the service.
pub async fn inspect(input: &str, download_timeout_secs: u64) -> Result<DocumentInfo, JobError> {
    let document = input::load_document(input, download_timeout_secs).await?;
    split::inspect(document.bytes()).map_err(|source| JobError::Split {
        name: document.name().to_string(),
        source,
    })
}
