//! Input document and the single-page units derived from it.

use crate::error::SplitError;
use crate::pipeline::split;
use serde::Serialize;
use std::fmt;

/// A loaded PDF document.
///
/// Immutable once constructed: the page count is read from the page tree at
/// load time so the orchestrator can check the report invariant against it.
#[derive(Clone)]
pub struct Document {
    name: String,
    bytes: Vec<u8>,
    page_count: usize,
}

impl Document {
    /// Parse `bytes` just far enough to count pages.
    ///
    /// Fails with [`SplitError`] when the bytes are not a readable PDF or
    /// have no pages; such a document could never be split.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SplitError> {
        let info = split::inspect(&bytes)?;
        Ok(Self {
            name: name.into(),
            bytes,
            page_count: info.page_count,
        })
    }

    /// Document identity, usually the original file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("page_count", &self.page_count)
            .finish()
    }
}

/// One page of a [`Document`], re-serialised as a standalone PDF.
#[derive(Clone, PartialEq, Eq)]
pub struct PageUnit {
    /// 0-based position in the source document.
    pub index: usize,
    /// A complete single-page PDF, decodable without the source.
    pub bytes: Vec<u8>,
}

impl PageUnit {
    /// 1-based page number, for logs and reports.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }
}

impl fmt::Debug for PageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageUnit")
            .field("index", &self.index)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Summary of a PDF without splitting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub pdf_version: String,
    pub byte_len: usize,
}
