//! Serialise a report: a two-sheet xlsx workbook and a JSON job record.
//!
//! The workbook layout is fixed:
//!
//! - sheet `"Page Details"`: [`crate::pipeline::aggregate::AggregatedReport::page_details`]
//! - sheet `"Consolidated"`: [`crate::pipeline::aggregate::AggregatedReport::consolidated`]
//!
//! Both sheets share [`COLUMNS`]. Confidence is written as a number with the
//! `0.0000` format so spreadsheet users can sort and filter on it; marker and
//! error rows leave that cell empty.
//!
//! Text cells longer than [`MAX_CELL_CHARS`] are cut and end in
//! [`TRUNCATION_MARKER`]. The JSON record keeps the full text.

use crate::error::ExportError;
use crate::output::{ExtractionReport, Job};
use crate::pipeline::aggregate::{aggregate, ReportRow};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::borrow::Cow;
use tracing::debug;

pub const PAGE_DETAILS_SHEET: &str = "Page Details";
pub const CONSOLIDATED_SHEET: &str = "Consolidated";

/// Header row, in column order.
pub const COLUMNS: [&str; 6] = [
    "Entity Type",
    "Mention Text",
    "Normalized Value",
    "Confidence",
    "Page",
    "Status",
];

const COLUMN_WIDTHS: [f64; 6] = [28.0, 48.0, 28.0, 12.0, 8.0, 10.0];

/// Excel's per-cell text limit, in UTF-16 code units.
pub const MAX_CELL_CHARS: usize = 32_767;

/// Last character of a cut cell.
pub const TRUNCATION_MARKER: char = '…';

/// Render `report` as an xlsx workbook.
pub fn export_workbook(report: &ExtractionReport) -> Result<Vec<u8>, ExportError> {
    let rows = aggregate(report);

    let header = Format::new().set_bold();
    let confidence = Format::new().set_num_format("0.0000");

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(PAGE_DETAILS_SHEET)?;
        write_sheet(sheet, &rows.page_details, &header, &confidence)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(CONSOLIDATED_SHEET)?;
        write_sheet(sheet, &rows.consolidated, &header, &confidence)?;
    }

    let buf = workbook.save_to_buffer()?;
    debug!(
        "Workbook for '{}': {} detail rows, {} consolidated rows, {} bytes",
        report.document_name,
        rows.page_details.len(),
        rows.consolidated.len(),
        buf.len()
    );
    Ok(buf)
}

fn write_sheet(
    sheet: &mut Worksheet,
    rows: &[ReportRow],
    header: &Format,
    confidence: &Format,
) -> Result<(), ExportError> {
    for (col, (title, width)) in COLUMNS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *title, header)?;
        sheet.set_column_width(col, width)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in [&row.entity_type, &row.mention_text, &row.normalized_value]
            .into_iter()
            .enumerate()
        {
            // Blank cells stay blank rather than holding an empty string.
            if !value.is_empty() {
                sheet.write_string(r, col as u16, cell_text(value).as_ref())?;
            }
        }
        if let Some(c) = row.confidence {
            sheet.write_number_with_format(r, 3, c, confidence)?;
        }
        sheet.write_number(r, 4, row.page as f64)?;
        sheet.write_string(r, 5, &row.status.to_string())?;
    }
    Ok(())
}

/// Fit `text` into one cell, cutting it to end in [`TRUNCATION_MARKER`].
fn cell_text(text: &str) -> Cow<'_, str> {
    if text.encode_utf16().count() <= MAX_CELL_CHARS {
        return Cow::Borrowed(text);
    }
    let budget = MAX_CELL_CHARS - TRUNCATION_MARKER.len_utf16();
    let mut used = 0;
    let mut cut = String::with_capacity(text.len().min(MAX_CELL_CHARS * 4));
    for c in text.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        cut.push(c);
    }
    cut.push(TRUNCATION_MARKER);
    Cow::Owned(cut)
}

/// Serialise the whole job, report included, as pretty-printed JSON.
pub fn export_json(job: &Job) -> Result<Vec<u8>, ExportError> {
    Ok(serde_json::to_vec_pretty(job)?)
}
