//! Consolidated record lookup

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::ApiResult;
use crate::types::ConsolidatedRecord;
use crate::AppState;

/// GET /items/:item_id/record
pub async fn get_item_record(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<ConsolidatedRecord>> {
    let record = state.orchestrator.get_consolidated(&item_id).await?;
    Ok(Json(record))
}

pub fn item_routes() -> Router<AppState> {
    Router::new().route("/items/:item_id/record", get(get_item_record))
}
