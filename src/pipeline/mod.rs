//! Pipeline stages for page-parallel entity extraction.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own; [`crate::orchestrator`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ extract ──▶ aggregate ──▶ export
//! (path/URL) (lopdf)  (docai, ×N)  (rows)       (xlsx, json)
//! ```
//!
//! 1. [`input`]: load a path or URL into a [`crate::Document`]
//! 2. [`split`]: one standalone single-page PDF per page; runs in
//!    `spawn_blocking` because parsing is CPU-bound
//! 3. [`extract`]: the [`extract::EntityExtractor`] seam plus the per-page
//!    retry driver; [`docai`] is the Document AI implementation and
//!    [`normalize`] cleans what it returns
//! 4. [`aggregate`]: page-ordered report, consolidated view, row tables
//! 5. [`export`]: workbook and JSON serialisation

pub mod aggregate;
pub mod docai;
pub mod export;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod split;
