//! Artifact storage: where the input document, workbook and JSON land.
//!
//! A [`ReportStore`] is a flat key → bytes namespace. Keys are relative,
//! `/`-separated paths such as `output/claims_20240131_120000.xlsx`; see
//! [`ArtifactKeys`] for how they are derived from a document name.
//!
//! [`LocalDirStore`] maps keys onto files below a root directory and writes
//! each one atomically (temp file + rename), so readers never observe a
//! half-written workbook. [`MemoryStore`] keeps everything in a map.

use crate::error::StoreError;
use crate::pipeline::input::document_stem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// A destination for job artifacts.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object, and return
    /// a human-readable location for it.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Keys for the three artifacts of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    pub input: String,
    pub workbook: String,
    pub json: String,
}

impl ArtifactKeys {
    /// Derive keys from the document name and the job start time:
    /// `input/{stem}_{YYYYmmdd_HHMMSS}.pdf`, `output/{stem}_{ts}.xlsx`,
    /// `output/{stem}_{ts}.json`.
    pub fn new(document_name: &str, started_at: DateTime<Utc>) -> Self {
        let stem = sanitize(&document_stem(document_name));
        let ts = started_at.format("%Y%m%d_%H%M%S");
        Self {
            input: format!("input/{stem}_{ts}.pdf"),
            workbook: format!("output/{stem}_{ts}.xlsx"),
            json: format!("output/{stem}_{ts}.json"),
        }
    }
}

/// Keep key segments portable: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reject empty, absolute and parent-escaping keys.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = || StoreError::InvalidKey {
        key: key.to_string(),
    };
    if key.is_empty() || key.ends_with('/') {
        return Err(invalid());
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// Stores artifacts as files below `root`.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ReportStore for LocalDirStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        validate_key(key)?;
        let path = self.root.join(key);
        let location = path.display().to_string();
        let write_err = |source: std::io::Error| StoreError::Write {
            key: key.to_string(),
            location: location.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        // Atomic write: write to temp, then rename
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }

        debug!("Stored {} bytes at {}", bytes.len(), location);
        Ok(location)
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        match self.objects.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        validate_key(key)?;
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{key}"))
    }
}
