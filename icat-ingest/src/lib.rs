//! icat-ingest library interface
//!
//! Multi-image attribute fusion plus the resumable batch orchestrator that
//! drives it over a catalog. Exposed as a library for integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod fusion;
pub mod orchestrator;
pub mod persistence;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use icat_common::events::EventBus;
use orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Event bus for SSE broadcasting (same bus the orchestrator emits on)
    pub event_bus: EventBus,
    /// Active run and last run outcome
    pub batch: Arc<RwLock<api::BatchStatus>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            event_bus: orchestrator.event_bus().clone(),
            orchestrator,
            batch: Arc::new(RwLock::new(api::BatchStatus::default())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::item_routes())
        .merge(api::health_routes())
        .route("/batch/events", get(api::batch_event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
