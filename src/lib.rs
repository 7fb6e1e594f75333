//! # docai-extract
//!
//! Page-parallel entity extraction from PDF documents with Google Document AI.
//!
//! A document-understanding processor answers one request at a time and
//! accepts only small payloads, so large documents are split into
//! standalone single-page PDFs that are sent concurrently. The per-page
//! results are folded back into a single report that accounts for every
//! page, failed ones included, and exported as an xlsx workbook and JSON.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Split      one standalone PDF per page via lopdf (spawn_blocking)
//!  ├─ 3. Extract    concurrent Document AI calls, retry + backoff per page
//!  ├─ 4. Aggregate  page-ordered report + entities grouped by type
//!  └─ 5. Export     "Page Details" / "Consolidated" workbook, JSON job record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docai_extract::{extract_document, export_workbook, ExtractionConfig, ProcessorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // DOCAI_PROJECT_ID / DOCAI_LOCATION / DOCAI_PROCESSOR_ID / DOCAI_ACCESS_TOKEN
//!     let config = ExtractionConfig::builder()
//!         .processor(ProcessorConfig::from_env())
//!         .concurrency(8)
//!         .build()?;
//!     let job = extract_document("claim.pdf", &config).await?;
//!     std::fs::write("claim.xlsx", export_workbook(&job.report)?)?;
//!     eprintln!("{}/{} pages ok", job.stats.succeeded_pages, job.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docai-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docai-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ProcessorConfig};
pub use document::{Document, DocumentInfo, PageUnit};
pub use error::{
    ExportError, JobError, PageError, PageErrorKind, ServiceError, SplitError, StoreError,
};
pub use orchestrator::{
    extract_document, extract_document_sync, extract_from_bytes, inspect, PageOrchestrator,
    StoredJob,
};
pub use output::{
    ConsolidatedEntry, EntityResult, ExtractionReport, Job, JobStats, JobStatus, PageExtraction,
    PageOutcome, PageStatus,
};
pub use pipeline::aggregate::{aggregate, build_report, AggregatedReport, ReportRow};
pub use pipeline::docai::DocumentAiClient;
pub use pipeline::export::{export_json, export_workbook};
pub use pipeline::extract::EntityExtractor;
pub use pipeline::input::load_document;
pub use pipeline::split::split;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{ArtifactKeys, LocalDirStore, MemoryStore, ReportStore};
pub use tokio_util::sync::CancellationToken;
