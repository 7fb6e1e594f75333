//! Configuration types for page-parallel extraction.
//!
//! All job behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. The config is an immutable value handed
//! to the orchestrator at job start; nothing is read from globals once a
//! job is running.

use crate::error::JobError;
use crate::pipeline::extract::EntityExtractor;
use crate::progress::ProgressCallback;
use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default payload ceiling for a single page sent to the service (20 MiB).
pub const DEFAULT_MAX_PAGE_BYTES: usize = 20 * 1024 * 1024;

/// Configuration for an extraction job.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use docai_extract::{ExtractionConfig, ProcessorConfig};
///
/// let config = ExtractionConfig::builder()
///     .processor(ProcessorConfig::new("my-project", "us", "cfebb242cf45e427"))
///     .concurrency(2)
///     .max_attempts(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Which Document AI processor handles the pages.
    pub processor: ProcessorConfig,

    /// Pre-constructed extractor. Takes precedence over `processor`.
    pub extractor: Option<Arc<dyn EntityExtractor>>,

    /// Maximum number of simultaneous in-flight service calls. Default: 4.
    pub concurrency: usize,

    /// Total attempts per page, first call included. Default: 3.
    ///
    /// Only transient failures are retried; a permanent failure ends the
    /// page after the attempt that produced it.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds. Default: 500.
    ///
    /// Doubles for each subsequent retry: 500 ms → 1 s → 2 s …
    pub retry_backoff_ms: u64,

    /// Ceiling for the backoff delay in milliseconds. Default: 8000.
    pub max_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Pages larger than this are failed with `PayloadTooLarge` without
    /// being sent. Default: [`DEFAULT_MAX_PAGE_BYTES`].
    pub max_page_bytes: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            extractor: None,
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            api_timeout_secs: 60,
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("processor", &self.processor)
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn EntityExtractor>"))
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_page_bytes", &self.max_page_bytes)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn processor(mut self, processor: ProcessorConfig) -> Self {
        self.config.processor = processor;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_page_bytes(mut self, bytes: usize) -> Self {
        self.config.max_page_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, JobError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(JobError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(JobError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(JobError::InvalidConfig("api_timeout_secs must be ≥ 1".into()));
        }
        if c.max_backoff_ms < c.retry_backoff_ms {
            return Err(JobError::InvalidConfig(format!(
                "max_backoff_ms ({}) is below retry_backoff_ms ({})",
                c.max_backoff_ms, c.retry_backoff_ms
            )));
        }
        if c.max_page_bytes == 0 {
            return Err(JobError::InvalidConfig("max_page_bytes must be > 0".into()));
        }
        Ok(self.config)
    }
}

// ── Processor ────────────────────────────────────────────────────────────

/// Identity and location of a Document AI processor.
///
/// Opaque to the pipeline: only [`crate::pipeline::docai::DocumentAiClient`]
/// reads it.
#[derive(Clone, Default)]
pub struct ProcessorConfig {
    pub project_id: String,
    /// Processor region, e.g. `us` or `eu`.
    pub location: String,
    pub processor_id: String,
    /// Overrides `https://{location}-documentai.googleapis.com`.
    pub endpoint: Option<String>,
    /// OAuth2 bearer token for the call.
    pub access_token: Option<Arc<SecretString>>,
}

impl ProcessorConfig {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        processor_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            processor_id: processor_id.into(),
            endpoint: None,
            access_token: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(Arc::new(SecretString::from(token.into())));
        self
    }

    /// Read `DOCAI_PROJECT_ID`, `DOCAI_LOCATION` (default `us`),
    /// `DOCAI_PROCESSOR_ID`, `DOCAI_ENDPOINT` and `DOCAI_ACCESS_TOKEN`.
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        let mut cfg = Self::new(
            var("DOCAI_PROJECT_ID").unwrap_or_default(),
            var("DOCAI_LOCATION").unwrap_or_else(|| "us".to_string()),
            var("DOCAI_PROCESSOR_ID").unwrap_or_default(),
        );
        cfg.endpoint = var("DOCAI_ENDPOINT");
        if let Some(token) = var("DOCAI_ACCESS_TOKEN") {
            cfg = cfg.with_access_token(token);
        }
        cfg
    }

    /// Fully-qualified `:process` URL for this processor.
    pub fn process_url(&self) -> String {
        let base = match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://{}-documentai.googleapis.com", self.location),
        };
        format!(
            "{}/v1/projects/{}/locations/{}/processors/{}:process",
            base, self.project_id, self.location, self.processor_id
        )
    }

    /// Check that every field needed for a call is present.
    pub fn validate(&self) -> Result<(), JobError> {
        let missing: Vec<&str> = [
            ("project_id", self.project_id.is_empty()),
            ("location", self.location.is_empty()),
            ("processor_id", self.processor_id.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(JobError::InvalidConfig(format!(
                "Document AI processor is missing: {}\nSet DOCAI_PROJECT_ID, DOCAI_LOCATION and DOCAI_PROCESSOR_ID.",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("processor_id", &self.processor_id)
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
