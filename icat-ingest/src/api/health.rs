//! Health check endpoint
//!
//! Reports whether a batch run is active and what the saved checkpoint still
//! owes. A checkpoint that cannot be read marks the service `degraded`.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the checkpoint store is unreadable
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub batch_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outstanding progress of an interrupted or partially failed batch
#[derive(Debug, Serialize)]
pub struct CheckpointHealth {
    pub wave_index: u64,
    pub completed: usize,
    pub failed: usize,
    pub total_cost: f64,
    pub updated_at: DateTime<Utc>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    let batch_active = state.batch.read().await.active.is_some();
    let mut last_error = state.last_error.read().await.clone();

    let (status, checkpoint) = match state.orchestrator.saved_checkpoint().await {
        Ok(checkpoint) => (
            "ok",
            checkpoint.map(|c| CheckpointHealth {
                wave_index: c.wave_index,
                completed: c.completed.len(),
                failed: c.failed.len(),
                total_cost: c.total_cost,
                updated_at: c.updated_at,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read checkpoint");
            last_error.get_or_insert_with(|| e.to_string());
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status,
        module: "icat-ingest",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        batch_active,
        checkpoint,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
