//! Batch run control
//!
//! POST /batch/start, GET /batch/status, POST /batch/cancel
//!
//! At most one run is active per process. The run executes in a background
//! task; its summary (or fatal error) is kept for the status endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::orchestrator::RunSummary;
use crate::AppState;

/// Run currently executing in the background
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    pub item_count: Option<usize>,
    pub concurrency_limit: usize,
}

/// Batch state shared by the handlers and the background run task
#[derive(Debug, Clone, Default)]
pub struct BatchStatus {
    pub active: Option<ActiveRun>,
    pub last_summary: Option<RunSummary>,
    pub last_error: Option<String>,
}

/// POST /batch/start request
#[derive(Debug, Default, Deserialize)]
pub struct StartBatchRequest {
    /// Items to process; all pending items when absent
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
    /// Wave size; `[orchestrator] concurrency_limit` when absent
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
}

/// POST /batch/start response
#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub status: String,
    /// `None` when processing all pending items
    pub item_count: Option<usize>,
    pub concurrency_limit: usize,
    pub started_at: DateTime<Utc>,
}

/// GET /batch/status response
#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// POST /batch/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub status: String,
    pub cancelled_at: DateTime<Utc>,
}

/// POST /batch/start
///
/// Spawns a run and returns 202 Accepted. 409 if a run is already active.
pub async fn start_batch(
    State(state): State<AppState>,
    request: Option<Json<StartBatchRequest>>,
) -> ApiResult<(StatusCode, Json<StartBatchResponse>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let concurrency_limit = request
        .concurrency_limit
        .unwrap_or(state.orchestrator.config().concurrency_limit);
    if concurrency_limit == 0 {
        return Err(ApiError::BadRequest(
            "concurrency_limit must be >= 1".to_string(),
        ));
    }

    let cancel = CancellationToken::new();
    let started_at = Utc::now();
    let item_count = request.item_ids.as_ref().map(Vec::len);

    {
        let mut batch = state.batch.write().await;
        if batch.active.is_some() {
            return Err(ApiError::Conflict("Batch run already active".to_string()));
        }
        batch.active = Some(ActiveRun {
            cancel: cancel.clone(),
            started_at,
            item_count,
            concurrency_limit,
        });
    }

    tracing::info!(?item_count, concurrency_limit, "Batch run requested");

    let task_state = state.clone();
    tokio::spawn(async move {
        let orchestrator = &task_state.orchestrator;
        let result = match request.item_ids {
            Some(item_ids) => {
                orchestrator
                    .run_with_cancellation(&item_ids, concurrency_limit, true, cancel)
                    .await
            }
            None => {
                orchestrator
                    .run_pending_with_cancellation(concurrency_limit, cancel)
                    .await
            }
        };

        let mut batch = task_state.batch.write().await;
        batch.active = None;
        match result {
            Ok(summary) => {
                batch.last_summary = Some(summary);
                batch.last_error = None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Batch run failed");
                let message = e.to_string();
                batch.last_error = Some(message.clone());
                *task_state.last_error.write().await = Some(message);
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartBatchResponse {
            status: "started".to_string(),
            item_count,
            concurrency_limit,
            started_at,
        }),
    ))
}

/// GET /batch/status
pub async fn get_batch_status(State(state): State<AppState>) -> Json<BatchStatusResponse> {
    let batch = state.batch.read().await;

    Json(BatchStatusResponse {
        active: batch.active.is_some(),
        started_at: batch.active.as_ref().map(|a| a.started_at),
        last_summary: batch.last_summary.clone(),
        last_error: batch.last_error.clone(),
    })
}

/// POST /batch/cancel
///
/// Cancellation takes effect at the next wave boundary. 404 if no run is active.
pub async fn cancel_batch(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CancelBatchResponse>)> {
    let batch = state.batch.read().await;
    let active = batch
        .active
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("No active batch run".to_string()))?;

    active.cancel.cancel();
    tracing::info!("Batch run cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelBatchResponse {
            status: "cancelling".to_string(),
            cancelled_at: Utc::now(),
        }),
    ))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batch/start", post(start_batch))
        .route("/batch/status", get(get_batch_status))
        .route("/batch/cancel", post(cancel_batch))
}
