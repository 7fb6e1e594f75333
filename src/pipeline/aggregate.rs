//! Aggregation: fold per-page outcomes into a report and its tabular views.
//!
//! [`build_report`] is the only way an [`ExtractionReport`] is assembled by
//! the pipeline. It checks that the outcomes cover every page exactly once,
//! in order, and derives the consolidated entity-type view.
//!
//! [`aggregate`] flattens a report into the row sets the exporters write.
//! Every page contributes at least one row to the page-level view:
//!
//! | Page state             | Rows                                        |
//! |------------------------|---------------------------------------------|
//! | success, N > 0 entities | N entity rows, service order               |
//! | success, 0 entities    | one marker row ([`NO_ENTITIES_MARKER`])     |
//! | failed                 | one error row (kind, message)               |
//!
//! Both functions are pure; calling them twice on the same input yields
//! identical output.

use crate::error::JobError;
use crate::output::{ConsolidatedEntry, ExtractionReport, PageOutcome, PageStatus};
use indexmap::IndexMap;
use serde::Serialize;

/// Mention text of the row emitted for a successful page with no entities.
pub const NO_ENTITIES_MARKER: &str = "No entities found on this page";

/// Assemble the report for `document_name` from page outcomes.
///
/// `outcomes` may arrive in any order; they are sorted by index. The sorted
/// sequence must be exactly `0..n` with `n > 0`, otherwise
/// [`JobError::Aggregation`] is returned.
pub fn build_report(
    document_name: &str,
    mut outcomes: Vec<PageOutcome>,
) -> Result<ExtractionReport, JobError> {
    if outcomes.is_empty() {
        return Err(JobError::Aggregation {
            detail: "no page outcomes".to_string(),
        });
    }
    outcomes.sort_by_key(|o| o.index);
    for (expected, outcome) in outcomes.iter().enumerate() {
        if outcome.index != expected {
            return Err(JobError::Aggregation {
                detail: format!(
                    "expected outcome for page {}, found page {}",
                    expected + 1,
                    outcome.index + 1
                ),
            });
        }
        if outcome.is_success() == outcome.error.is_some() {
            return Err(JobError::Aggregation {
                detail: format!(
                    "page {} is {} but error is {}",
                    expected + 1,
                    outcome.status,
                    if outcome.error.is_some() { "set" } else { "missing" }
                ),
            });
        }
    }

    let consolidated = consolidate(&outcomes);
    Ok(ExtractionReport {
        document_name: document_name.to_string(),
        outcomes,
        consolidated,
    })
}

/// Group entities from successful pages by type.
///
/// Types keep the order in which they first appear scanning pages in
/// order; entries within a type are page-ordered, then service-ordered.
fn consolidate(outcomes: &[PageOutcome]) -> IndexMap<String, Vec<ConsolidatedEntry>> {
    let mut groups: IndexMap<String, Vec<ConsolidatedEntry>> = IndexMap::new();
    for outcome in outcomes.iter().filter(|o| o.is_success()) {
        for entity in &outcome.entities {
            groups
                .entry(entity.entity_type.clone())
                .or_default()
                .push(ConsolidatedEntry {
                    page_index: outcome.index,
                    mention_text: entity.mention_text.clone(),
                    normalized_value: entity.normalized_value.clone(),
                    confidence: entity.confidence,
                });
        }
    }
    groups
}

/// One row of an exported table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub entity_type: String,
    pub mention_text: String,
    /// Empty when the service reported none.
    pub normalized_value: String,
    /// Rounded to four decimals; `None` on marker and error rows.
    pub confidence: Option<f64>,
    /// 1-based page number.
    pub page: usize,
    pub status: PageStatus,
}

/// The two tables of an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedReport {
    /// Page-ordered; every page has at least one row.
    pub page_details: Vec<ReportRow>,
    /// Grouped by entity type in first-appearance order.
    pub consolidated: Vec<ReportRow>,
}

impl AggregatedReport {
    /// Pages that contributed a row, deduplicated, in order.
    pub fn pages_covered(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.page_details.iter().map(|r| r.page).collect();
        pages.dedup();
        pages
    }
}

/// Flatten `report` into exportable rows.
pub fn aggregate(report: &ExtractionReport) -> AggregatedReport {
    let mut page_details = Vec::new();
    for outcome in &report.outcomes {
        page_details.extend(page_rows(outcome));
    }

    let consolidated = report
        .consolidated
        .iter()
        .flat_map(|(entity_type, entries)| {
            entries.iter().map(move |e| ReportRow {
                entity_type: entity_type.clone(),
                mention_text: e.mention_text.clone(),
                normalized_value: e.normalized_value.clone().unwrap_or_default(),
                confidence: Some(round4(e.confidence)),
                page: e.page_index + 1,
                status: PageStatus::Success,
            })
        })
        .collect();

    AggregatedReport {
        page_details,
        consolidated,
    }
}

fn page_rows(outcome: &PageOutcome) -> Vec<ReportRow> {
    let page = outcome.page_num();
    if let Some(err) = &outcome.error {
        return vec![ReportRow {
            entity_type: err.kind.to_string(),
            mention_text: err.message.clone(),
            normalized_value: String::new(),
            confidence: None,
            page,
            status: PageStatus::Failed,
        }];
    }
    if outcome.entities.is_empty() {
        return vec![ReportRow {
            entity_type: String::new(),
            mention_text: NO_ENTITIES_MARKER.to_string(),
            normalized_value: String::new(),
            confidence: None,
            page,
            status: PageStatus::Success,
        }];
    }
    outcome
        .entities
        .iter()
        .map(|e| ReportRow {
            entity_type: e.entity_type.clone(),
            mention_text: e.mention_text.clone(),
            normalized_value: e.normalized_value.clone().unwrap_or_default(),
            confidence: Some(round4(e.confidence)),
            page,
            status: PageStatus::Success,
        })
        .collect()
}

/// Round to four decimals via the shortest decimal form of the `f32`, so
/// `0.9` stays `0.9` rather than `0.8999999761581421`.
fn round4(confidence: f32) -> f64 {
    let exact: f64 = confidence.to_string().parse().unwrap_or(0.0);
    (exact * 10_000.0).round() / 10_000.0
}
