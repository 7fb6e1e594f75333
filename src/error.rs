//! Error types for the docai-extract library.
//!
//! Two distinct families reflect two distinct failure modes:
//!
//! * [`JobError`] (**fatal**): the job cannot produce a report at all
//!   (unreadable document, zero pages, export failure, bad configuration).
//!   Returned as `Err(JobError)` from the orchestration entry points.
//!
//! * [`PageError`] (**non-fatal**): a single page failed (service rejected
//!   it, retries exhausted, job cancelled before it ran) while the other
//!   pages are fine. Stored inside [`crate::output::PageOutcome`] so the
//!   report stays total over every page index.
//!
//! [`ServiceError`] is what an [`crate::pipeline::extract::EntityExtractor`]
//! returns for one call; the orchestrator folds it into a [`PageError`] once
//! the retry policy has run its course.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docai-extract library.
///
/// Page-level failures use [`PageError`] and are recorded in the report
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The document could not be split into pages; no page was attempted.
    #[error("Cannot split '{name}' into pages: {source}")]
    Split {
        name: String,
        #[source]
        source: SplitError,
    },

    /// The per-page outcomes violate the report invariant.
    ///
    /// Never expected under correct orchestration; treat as a bug report.
    #[error("Internal aggregation fault: {detail}")]
    Aggregation { detail: String },

    /// The report could not be serialised.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// The storage collaborator rejected an artefact.
    #[error(transparent)]
    Storage(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a document could not be decomposed into single-page units.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SplitError {
    /// Bytes are not a decodable PDF.
    #[error("not a readable PDF document: {detail}")]
    Unreadable { detail: String },

    /// The PDF parsed but its page tree is empty.
    #[error("document has no pages")]
    NoPages,

    /// A single page could not be re-serialised as a standalone PDF.
    #[error("page {page} could not be written as a standalone PDF: {detail}")]
    PageWrite { page: usize, detail: String },
}

/// Serialisation failures in [`crate::pipeline::export`].
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Workbook export failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a [`crate::storage::ReportStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is empty or tries to escape the store root.
    #[error("Invalid storage key '{key}'")]
    InvalidKey { key: String },

    /// Writing the object failed.
    #[error("Failed to store '{key}' at '{location}': {source}")]
    Write {
        key: String,
        location: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one failed call to the understanding service.
///
/// The split between transient and permanent variants drives the retry
/// policy: see [`ServiceError::is_transient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    // ── Transient ─────────────────────────────────────────────────────────
    /// The call did not answer within the per-call timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429 from the service.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 5xx / 408 from the service.
    #[error("service unavailable (HTTP {status}): {detail}")]
    Unavailable { status: u16, detail: String },

    /// Connection reset, DNS failure, TLS handshake error, etc.
    #[error("network error: {0}")]
    Network(String),

    // ── Permanent ─────────────────────────────────────────────────────────
    /// The page bytes exceed the accepted payload size; never sent.
    #[error("page is {size} bytes, above the {limit}-byte payload limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The service could not decode the page.
    #[error("malformed page: {0}")]
    MalformedInput(String),

    /// The service decoded the page but cannot process its content.
    #[error("unsupported content: {0}")]
    Unsupported(String),

    /// Any other 4xx (bad credentials, unknown processor, ...).
    #[error("request rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The response body did not match the expected schema.
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Would resubmitting the same page plausibly succeed?
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout { .. }
                | ServiceError::RateLimited { .. }
                | ServiceError::Unavailable { .. }
                | ServiceError::Network(_)
        )
    }

    /// The page-level kind this error becomes once retries stop.
    pub fn kind(&self) -> PageErrorKind {
        match self {
            ServiceError::PayloadTooLarge { .. } => PageErrorKind::PayloadTooLarge,
            e if e.is_transient() => PageErrorKind::TransientServiceError,
            _ => PageErrorKind::PermanentServiceError,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            429 => ServiceError::RateLimited {
                retry_after_secs: None,
            },
            408 | 500..=599 => ServiceError::Unavailable { status, detail },
            _ => ServiceError::Rejected { status, detail },
        }
    }
}

/// Classification of a failed page, as written to the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageErrorKind {
    /// Page exceeded the payload limit and was never sent.
    PayloadTooLarge,
    /// Every attempt failed transiently.
    TransientServiceError,
    /// The service rejected the page; not retried.
    PermanentServiceError,
    /// The job was cancelled before the page resolved.
    Cancelled,
}

impl fmt::Display for PageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageErrorKind::PayloadTooLarge => "PayloadTooLarge",
            PageErrorKind::TransientServiceError => "TransientServiceError",
            PageErrorKind::PermanentServiceError => "PermanentServiceError",
            PageErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageOutcome`] when a page fails. The job
/// continues with the remaining pages.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Page {}: {kind} after {attempts} attempt(s): {message}", .index + 1)]
pub struct PageError {
    /// 0-based page index.
    pub index: usize,
    pub kind: PageErrorKind,
    pub message: String,
    /// Calls actually made to the service for this page.
    pub attempts: u32,
}

impl PageError {
    /// Fold the last service error of a page into a report entry.
    pub fn from_service(index: usize, error: &ServiceError, attempts: u32) -> Self {
        Self {
            index,
            kind: error.kind(),
            message: error.to_string(),
            attempts,
        }
    }

    /// Entry for a page that was cancelled.
    pub fn cancelled(index: usize, attempts: u32) -> Self {
        Self {
            index,
            kind: PageErrorKind::Cancelled,
            message: "job cancelled before the page resolved".to_string(),
            attempts,
        }
    }
}
