//! Google Document AI implementation of [`EntityExtractor`].
//!
//! Each page is sent inline to the processor's synchronous `:process`
//! endpoint as a base64 `rawDocument`; no staging bucket is involved.
//!
//! HTTP status classification follows the retry policy in
//! [`crate::pipeline::extract`]: 408, 429 and 5xx are transient, other 4xx
//! are permanent, and a 400 naming an unsupported format is reported as
//! [`ServiceError::Unsupported`].

use crate::config::ProcessorConfig;
use crate::document::PageUnit;
use crate::error::{JobError, ServiceError};
use crate::output::{EntityResult, PageExtraction};
use crate::pipeline::extract::EntityExtractor;
use crate::pipeline::normalize::{
    clean_mention, clean_normalized_value, nested_entity_type, normalize_entity_type,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Calls one Document AI processor over REST.
pub struct DocumentAiClient {
    http: reqwest::Client,
    url: String,
    access_token: Option<Arc<SecretString>>,
    timeout_secs: u64,
}

impl DocumentAiClient {
    /// Build a client for `processor`, with `timeout_secs` applied to each
    /// HTTP request.
    pub fn new(processor: &ProcessorConfig, timeout_secs: u64) -> Result<Self, JobError> {
        processor.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| JobError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: processor.process_url(),
            access_token: processor.access_token.clone(),
            timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EntityExtractor for DocumentAiClient {
    async fn extract(&self, page: &PageUnit) -> Result<PageExtraction, ServiceError> {
        let body = ProcessRequest {
            raw_document: RawDocument {
                content: STANDARD.encode(&page.bytes),
                mime_type: "application/pdf",
            },
            skip_human_review: true,
        };
        debug!("Page {}: POST {} ({} bytes)", page.page_num(), self.url, page.bytes.len());

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text, retry_after_secs));
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        Ok(extraction_from_response(parsed))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    raw_document: RawDocument,
    skip_human_review: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    content: String,
    mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessResponse {
    #[serde(default)]
    document: Option<ApiDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<ApiEntity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEntity {
    #[serde(rename = "type", default)]
    entity_type: String,
    #[serde(default)]
    mention_text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    normalized_value: Option<ApiNormalizedValue>,
    #[serde(default)]
    properties: Vec<ApiEntity>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiNormalizedValue {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

// ── Mapping ──────────────────────────────────────────────────────────────

/// Flatten the response into entities, children directly after their
/// parent, in service order, and keep the page text as returned.
pub(crate) fn extraction_from_response(response: ProcessResponse) -> PageExtraction {
    let Some(doc) = response.document else {
        return PageExtraction::default();
    };
    let mut entities = Vec::new();
    for entity in &doc.entities {
        flatten(entity, None, &mut entities);
    }
    PageExtraction::new(entities, doc.text)
}

fn flatten(entity: &ApiEntity, parent: Option<&str>, out: &mut Vec<EntityResult>) {
    let entity_type = match parent {
        Some(p) => nested_entity_type(p, &entity.entity_type),
        None => normalize_entity_type(&entity.entity_type),
    };
    let mut result = EntityResult::new(
        entity_type.clone(),
        clean_mention(&entity.mention_text),
        entity.confidence,
    );
    if let Some(v) = entity
        .normalized_value
        .as_ref()
        .and_then(|nv| clean_normalized_value(&nv.text))
    {
        result = result.with_normalized_value(v);
    }

    // A parent with properties but no text of its own is only a container.
    if !(result.mention_text.is_empty() && !entity.properties.is_empty()) {
        out.push(result);
    }
    for child in &entity.properties {
        flatten(child, Some(&entity_type), out);
    }
}

fn classify_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> ServiceError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(300).collect());

    match status {
        429 => ServiceError::RateLimited { retry_after_secs },
        400 if detail.to_lowercase().contains("unsupported") => ServiceError::Unsupported(detail),
        400 => ServiceError::MalformedInput(detail),
        _ => ServiceError::from_status(status, detail),
    }
}

fn classify_transport(e: &reqwest::Error, timeout_secs: u64) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout { secs: timeout_secs }
    } else if e.is_decode() {
        ServiceError::InvalidResponse(e.to_string())
    } else {
        ServiceError::Network(e.to_string())
    }
}
