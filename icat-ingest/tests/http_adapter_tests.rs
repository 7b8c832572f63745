//! HTTP extraction adapter tests against a local stub vision endpoint

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use icat_ingest::extraction::{ExtractionAdapter, ExtractionConfig, ExtractionError, HttpExtractionAdapter};
use icat_ingest::fusion::FusionEngine;
use icat_ingest::orchestrator::{Orchestrator, OrchestratorConfig};
use icat_ingest::persistence::MemoryGateway;
use icat_ingest::types::{FieldSchema, FieldValue, ImageRef};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone, Default)]
struct StubState {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn extract(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push((auth, body.clone()));

    match body["image_ref"].as_str().unwrap_or_default() {
        "overloaded.jpg" => (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response(),
        "throttled.jpg" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        "corrupt.jpg" => (StatusCode::BAD_REQUEST, "cannot decode image").into_response(),
        "garbled.jpg" => (StatusCode::OK, "not json").into_response(),
        _ => Json(json!({
            "fields": {
                "weight": {"value": 1500, "confidence": 0.85, "unit": "g"},
                "color": {"value": "green", "confidence": 0.7},
                "label_text": {"value": "ACME", "confidence": 0.4}
            },
            "free_text": "green glass bottle",
            "cost": 0.003,
            "quality": {"score": 0.9, "low_quality": false}
        }))
        .into_response(),
    }
}

async fn start_stub() -> (String, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/extract", post(extract))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/extract", addr), state)
}

fn adapter(endpoint: &str, api_key: Option<&str>) -> HttpExtractionAdapter {
    adapter_with_rate(endpoint, api_key, 50)
}

fn adapter_with_rate(endpoint: &str, api_key: Option<&str>, requests_per_second: u32) -> HttpExtractionAdapter {
    HttpExtractionAdapter::new(&ExtractionConfig {
        endpoint: Some(endpoint.to_string()),
        api_key: api_key.map(str::to_string),
        requests_per_second,
        connect_timeout_ms: 1_000,
    })
    .unwrap()
}

#[tokio::test]
async fn test_successful_extraction() {
    let (endpoint, state) = start_stub().await;
    let adapter = adapter(&endpoint, Some("sk-test-key"));

    let response = adapter
        .invoke("sku-1", &ImageRef::from("front.jpg"), &FieldSchema::default())
        .await
        .unwrap();

    assert_eq!(response.fields["weight"].value, Some(FieldValue::Numeric(1500.0)));
    assert_eq!(response.fields["weight"].unit.as_deref(), Some("g"));
    assert_eq!(
        response.fields["label_text"].value,
        Some(FieldValue::Text("ACME".to_string()))
    );
    assert_eq!(response.free_text.as_deref(), Some("green glass bottle"));
    assert_eq!(response.cost, 0.003);
    assert_eq!(response.quality.unwrap().score, 0.9);

    let requests = state.requests.lock().unwrap();
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test-key"));
    assert_eq!(body["item_id"], "sku-1");
    assert_eq!(body["image_ref"], "front.jpg");
    assert_eq!(body["fields"][0], json!({"name": "weight", "type": "numeric", "unit": "kg"}));
    assert_eq!(
        body["fields"].as_array().unwrap().len(),
        FieldSchema::default().len()
    );
}

#[tokio::test]
async fn test_no_auth_header_without_key() {
    let (endpoint, state) = start_stub().await;

    adapter(&endpoint, None)
        .invoke("sku-1", &ImageRef::from("front.jpg"), &FieldSchema::default())
        .await
        .unwrap();

    assert!(state.requests.lock().unwrap()[0].0.is_none());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let (endpoint, _state) = start_stub().await;
    let adapter = adapter(&endpoint, None);
    let schema = FieldSchema::default();

    for image in ["overloaded.jpg", "throttled.jpg"] {
        let err = adapter
            .invoke("sku-1", &ImageRef::from(image), &schema)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Transient(_)), "{}: {:?}", image, err);
    }
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    let (endpoint, _state) = start_stub().await;
    let adapter = adapter(&endpoint, None);

    let err = adapter
        .invoke("sku-1", &ImageRef::from("corrupt.jpg"), &FieldSchema::default())
        .await
        .unwrap_err();
    match err {
        ExtractionError::Permanent(message) => assert!(message.contains("cannot decode image")),
        other => panic!("expected permanent error, got {:?}", other),
    }

    let err = adapter
        .invoke("sku-1", &ImageRef::from("garbled.jpg"), &FieldSchema::default())
        .await
        .unwrap_err();
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = adapter(&format!("http://{}/extract", addr), None)
        .invoke("sku-1", &ImageRef::from("front.jpg"), &FieldSchema::default())
        .await
        .unwrap_err();

    assert!(!err.is_permanent());
}

#[tokio::test]
async fn test_quota_wait_not_charged_to_call_timeout() {
    let (endpoint, state) = start_stub().await;
    let gateway = Arc::new(MemoryGateway::new());
    gateway
        .add_item(
            "sku-1",
            (0..3).map(|i| ImageRef::new(format!("sku-1/img-{}.jpg", i))).collect(),
        )
        .await;

    // One request per second: the third image waits ~2 s for its permit,
    // longer than the per-call timeout
    let config = OrchestratorConfig {
        inter_wave_delay_ms: 0,
        extraction_timeout_ms: 1_500,
        ..OrchestratorConfig::default()
    };
    let orch = Orchestrator::new(
        Arc::new(adapter_with_rate(&endpoint, None, 1)),
        gateway.clone(),
        gateway.clone(),
        FusionEngine::default(),
        config,
    );

    let started = Instant::now();
    let summary = orch.run(&["sku-1".to_string()], 1, true).await.unwrap();

    assert_eq!(summary.processed, 1, "failures: {:?}", summary.failures);
    assert_eq!(summary.failed, 0);
    assert_eq!(state.requests.lock().unwrap().len(), 3);
    assert!(started.elapsed().as_millis() >= 1_900);
}

#[test]
fn test_missing_endpoint_rejected() {
    let result = HttpExtractionAdapter::new(&ExtractionConfig::default());
    assert!(result.is_err());
}
