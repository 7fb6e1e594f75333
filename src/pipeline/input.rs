//! Input resolution: load a user-supplied path or URL into a [`Document`].
//!
//! The whole file is read into memory. Splitting needs random access to the
//! cross-reference table anyway, and the original bytes are kept so they can
//! be archived next to the report.
//!
//! Validation happens here, before any page is dispatched: a missing file,
//! an unreadable download or bytes without the `%PDF` header all fail the
//! job up front.

use crate::document::Document;
use crate::error::JobError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a PDF from a local path or an HTTP(S) URL.
///
/// The document is named after the file (or the last URL path segment).
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Document, JobError> {
    let input = input.trim();
    if input.is_empty() || (input.contains("://") && !is_url(input)) {
        return Err(JobError::InvalidInput {
            input: input.to_string(),
        });
    }

    let (name, bytes) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(Path::new(input)).await?
    };

    let document = Document::from_bytes(name.clone(), bytes)
        .map_err(|source| JobError::Split { name, source })?;
    info!(
        "Loaded '{}': {} pages, {} bytes",
        document.name(),
        document.page_count(),
        document.bytes().len()
    );
    Ok(document)
}

/// Read a local file, mapping I/O failures to the matching [`JobError`].
async fn read_local(path: &Path) -> Result<(String, Vec<u8>), JobError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => JobError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => JobError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    debug!("Read local PDF: {}", path.display());
    Ok((name, bytes))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>), JobError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| JobError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            JobError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            JobError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(JobError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            JobError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            JobError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    debug!("Downloaded {} bytes", bytes.len());
    Ok((filename_from_url(url), bytes.to_vec()))
}

/// Last non-empty path segment of `url`, or `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

/// Stem of a document name, used when deriving artifact keys.
pub fn document_stem(name: &str) -> String {
    let stem = PathBuf::from(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem
    }
}
