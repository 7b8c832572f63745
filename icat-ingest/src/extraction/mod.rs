//! Per-image extraction adapter
//!
//! The vision model call is an external collaborator. The orchestrator only
//! sees the [`ExtractionAdapter`] trait and its two-way error taxonomy:
//! transient failures are reattempted by a later run, permanent ones are
//! recorded and skipped.

mod http;

pub use http::HttpExtractionAdapter;

use crate::types::{ExtractedField, FieldSchema, ImageRef, QualitySignal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Extraction adapter errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// Network, rate limit or timeout; recoverable by a later run
    #[error("Transient extraction failure: {0}")]
    Transient(String),

    /// Malformed or unsupported input; not retried unless requested
    #[error("Permanent extraction failure: {0}")]
    Permanent(String),
}

impl ExtractionError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExtractionError::Permanent(_))
    }
}

/// Output of one adapter call for one image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub fields: BTreeMap<String, ExtractedField>,
    pub free_text: Option<String>,
    /// Billed cost of the call
    pub cost: f64,
    pub latency_ms: u64,
    pub quality: Option<QualitySignal>,
}

/// Analyze a single image of an item
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    /// Wait until the adapter's request quota admits one more call.
    ///
    /// Awaited before every `invoke`, outside of any call timeout.
    async fn ready(&self) {}

    async fn invoke(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        schema: &FieldSchema,
    ) -> Result<AdapterResponse, ExtractionError>;
}

/// Vision endpoint settings (`[extraction]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// JSON vision endpoint; `None` disables extraction
    pub endpoint: Option<String>,
    /// Bearer key (overridden by `ICAT_EXTRACTION_API_KEY`)
    pub api_key: Option<String>,
    /// Request quota shared by all in-flight calls
    pub requests_per_second: u32,
    /// HTTP client connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            requests_per_second: 5,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_second == 0 {
            return Err("extraction.requests_per_second must be >= 1".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(format!(
                    "extraction.endpoint must be an http(s) URL, got {}",
                    endpoint
                ));
            }
        }
        Ok(())
    }
}
