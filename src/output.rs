//! Output types: entities, per-page outcomes, the report and the job record.

use crate::error::{PageError, PageErrorKind};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One entity detected on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    /// Normalised entity type, e.g. `invoice_date` or `vehicle/make`.
    pub entity_type: String,
    /// Text of the mention as it appears on the page.
    pub mention_text: String,
    /// Canonical form reported by the service, when it has one.
    pub normalized_value: Option<String>,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

impl EntityResult {
    pub fn new(
        entity_type: impl Into<String>,
        mention_text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            entity_type: entity_type.into(),
            mention_text: mention_text.into(),
            normalized_value: None,
            confidence,
        }
    }

    pub fn with_normalized_value(mut self, value: impl Into<String>) -> Self {
        self.normalized_value = Some(value.into());
        self
    }
}

/// What the service returned for one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    /// Entities in service-reported order.
    pub entities: Vec<EntityResult>,
    /// Full OCR text of the page; empty when the service reported none.
    pub text: String,
}

impl PageExtraction {
    pub fn new(entities: Vec<EntityResult>, text: impl Into<String>) -> Self {
        Self {
            entities,
            text: text.into(),
        }
    }
}

impl From<Vec<EntityResult>> for PageExtraction {
    fn from(entities: Vec<EntityResult>) -> Self {
        Self {
            entities,
            text: String::new(),
        }
    }
}

/// Terminal state of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Success,
    Failed,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Success => f.write_str("Success"),
            PageStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// The terminal result for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 0-based page index.
    pub index: usize,
    pub status: PageStatus,
    /// Entities in service-reported order; empty on failure.
    pub entities: Vec<EntityResult>,
    /// OCR text of the page; empty on failure.
    #[serde(default)]
    pub text: String,
    /// Set iff `status == Failed`.
    pub error: Option<PageError>,
    /// Calls made to the service for this page.
    pub attempts: u32,
    /// Wall-clock time spent on this page, backoff included.
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn success(index: usize, entities: Vec<EntityResult>, attempts: u32, duration_ms: u64) -> Self {
        Self {
            index,
            status: PageStatus::Success,
            entities,
            text: String::new(),
            error: None,
            attempts,
            duration_ms,
        }
    }

    pub fn failed(error: PageError, duration_ms: u64) -> Self {
        Self {
            index: error.index,
            status: PageStatus::Failed,
            entities: Vec::new(),
            text: String::new(),
            attempts: error.attempts,
            error: Some(error),
            duration_ms,
        }
    }

    /// Attach the page's OCR text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PageStatus::Success
    }

    /// 1-based page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn error_kind(&self) -> Option<PageErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// One occurrence of an entity type in the consolidated view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedEntry {
    /// 0-based page index the mention came from.
    pub page_index: usize,
    pub mention_text: String,
    pub normalized_value: Option<String>,
    pub confidence: f32,
}

/// Outcomes for every page of a document plus the cross-page view.
///
/// Built by [`crate::pipeline::aggregate::build_report`], which enforces the
/// invariant that `outcomes[i].index == i` for every page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub document_name: String,
    /// One outcome per page, in page order.
    pub outcomes: Vec<PageOutcome>,
    /// Entity type → occurrences across successful pages, page-ordered.
    /// Types appear in order of first occurrence.
    pub consolidated: IndexMap<String, Vec<ConsolidatedEntry>>,
}

impl ExtractionReport {
    pub fn page_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.error_kind() == Some(PageErrorKind::Cancelled))
            .count()
    }

    pub fn entity_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.entities.len()).sum()
    }

    /// Text of the successful pages in page order, each followed by a newline.
    pub fn full_text(&self) -> String {
        let mut text = String::new();
        for outcome in self.outcomes.iter().filter(|o| o.is_success()) {
            text.push_str(&outcome.text);
            text.push('\n');
        }
        text
    }
}

/// How a job ended. Fatal failures never reach this type; they are
/// returned as [`crate::error::JobError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Every page succeeded.
    Completed,
    /// At least one page failed; the report still covers every page.
    CompletedWithFailures,
    /// Cancellation was requested before every page resolved.
    Cancelled,
}

/// Aggregate counters for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub cancelled_pages: usize,
    pub entity_count: usize,
    /// Service calls across all pages, retries included.
    pub total_attempts: u64,
    pub split_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// A single run over one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub stats: JobStats,
    pub report: ExtractionReport,
    /// [`ExtractionReport::full_text`] at the time the job finished.
    #[serde(default)]
    pub text: String,
}
