//! HTTP vision endpoint client
//!
//! Request: `POST {endpoint}` with `{item_id, image_ref, fields: [{name, type, unit}]}`
//! Response: `{fields: {name: {value, confidence, unit?}}, free_text?, cost?, quality?}`
//!
//! Status mapping:
//! - timeout, connect error, 429, 5xx → Transient
//! - other 4xx, undecodable body → Permanent
//!
//! The request quota is enforced in `ready`, so time spent waiting for a
//! permit is never charged to a caller's call timeout.

use super::{AdapterResponse, ExtractionAdapter, ExtractionConfig, ExtractionError};
use crate::types::{ExtractedField, FieldSchema, FieldValue, ImageRef, QualitySignal, ValueType};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use icat_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    item_id: &'a str,
    image_ref: &'a str,
    fields: Vec<WireFieldSpec<'a>>,
}

#[derive(Debug, Serialize)]
struct WireFieldSpec<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    fields: BTreeMap<String, WireField>,
    #[serde(default)]
    free_text: Option<String>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    quality: Option<QualitySignal>,
}

#[derive(Debug, Deserialize)]
struct WireField {
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    unit: Option<String>,
}

/// Rate-limited client for a JSON vision endpoint
pub struct HttpExtractionAdapter {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpExtractionAdapter {
    /// Build an adapter from the `[extraction]` section.
    ///
    /// Fails when no endpoint is configured or the quota is zero.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("extraction.endpoint is not configured".to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            Error::Config("extraction.requests_per_second must be >= 1".to_string())
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(concat!("icat-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExtractionAdapter for HttpExtractionAdapter {
    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    async fn invoke(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        schema: &FieldSchema,
    ) -> std::result::Result<AdapterResponse, ExtractionError> {
        let body = WireRequest {
            item_id,
            image_ref: image_ref.as_str(),
            fields: schema
                .fields
                .iter()
                .map(|f| WireFieldSpec {
                    name: &f.name,
                    value_type: f.value_type,
                    unit: f.unit.as_deref(),
                })
                .collect(),
        };

        tracing::debug!(item_id, image = %image_ref, endpoint = %self.endpoint, "Invoking vision endpoint");

        let started = Instant::now();
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let wire: WireResponse = response.json().await.map_err(|e| {
            ExtractionError::Permanent(format!("Undecodable vision response: {}", e))
        })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(into_adapter_response(wire, schema, latency_ms))
    }
}

fn classify_send_error(e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::Transient(format!("Vision request timed out: {}", e))
    } else if e.is_connect() {
        ExtractionError::Transient(format!("Vision endpoint unreachable: {}", e))
    } else if e.is_builder() {
        ExtractionError::Permanent(format!("Invalid vision request: {}", e))
    } else {
        ExtractionError::Transient(format!("Vision request failed: {}", e))
    }
}

fn classify_status(status: StatusCode, detail: &str) -> ExtractionError {
    let message = if detail.is_empty() {
        format!("Vision endpoint returned {}", status)
    } else {
        format!("Vision endpoint returned {}: {}", status, detail)
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ExtractionError::Transient(message)
    } else {
        ExtractionError::Permanent(message)
    }
}

fn into_adapter_response(wire: WireResponse, schema: &FieldSchema, latency_ms: u64) -> AdapterResponse {
    let fields = wire
        .fields
        .into_iter()
        .map(|(name, field)| {
            let value_type = schema.get(&name).map(|s| s.value_type);
            let value = json_to_field_value(field.value, value_type);
            let extracted = ExtractedField {
                value,
                confidence: field.confidence,
                unit: field.unit,
            };
            (name, extracted)
        })
        .collect();

    AdapterResponse {
        fields,
        free_text: wire.free_text,
        cost: wire.cost.unwrap_or(0.0),
        latency_ms,
        quality: wire.quality,
    }
}

/// JSON scalar → typed value. Strings for text fields become `Text`, every
/// other string is `Categorical` and coerced later by the fusion engine.
fn json_to_field_value(value: serde_json::Value, value_type: Option<ValueType>) -> Option<FieldValue> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Numeric),
        serde_json::Value::String(s) => Some(match value_type {
            Some(ValueType::Text) => FieldValue::Text(s),
            _ => FieldValue::Categorical(s),
        }),
        serde_json::Value::Bool(b) => Some(FieldValue::Categorical(b.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_permanent());
        assert!(!classify_status(StatusCode::BAD_GATEWAY, "").is_permanent());
        assert!(classify_status(StatusCode::BAD_REQUEST, "bad image").is_permanent());
        assert!(classify_status(StatusCode::UNSUPPORTED_MEDIA_TYPE, "").is_permanent());
    }

    #[test]
    fn test_wire_response_conversion() {
        let wire: WireResponse = serde_json::from_str(
            r#"{
                "fields": {
                    "weight": {"value": 2.5, "confidence": 0.9, "unit": "kg"},
                    "color": {"value": "green", "confidence": 0.8},
                    "label_text": {"value": "NET WT 2.5KG", "confidence": 0.6},
                    "cut": {"value": null, "confidence": 0.0}
                },
                "cost": 0.004,
                "quality": {"score": 0.7, "low_quality": false}
            }"#,
        )
        .unwrap();

        let response = into_adapter_response(wire, &FieldSchema::default(), 120);

        assert_eq!(response.fields["weight"].value, Some(FieldValue::Numeric(2.5)));
        assert_eq!(response.fields["weight"].unit.as_deref(), Some("kg"));
        assert_eq!(
            response.fields["color"].value,
            Some(FieldValue::Categorical("green".to_string()))
        );
        assert_eq!(
            response.fields["label_text"].value,
            Some(FieldValue::Text("NET WT 2.5KG".to_string()))
        );
        assert_eq!(response.fields["cut"].value, None);
        assert_eq!(response.cost, 0.004);
        assert_eq!(response.latency_ms, 120);
        assert_eq!(response.quality.unwrap().score, 0.7);
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let result = HttpExtractionAdapter::new(&ExtractionConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
