//! HTTP API handlers for icat-ingest

pub mod batch;
pub mod health;
pub mod items;
pub mod sse;

pub use batch::{batch_routes, BatchStatus};
pub use health::health_routes;
pub use items::item_routes;
pub use sse::batch_event_stream;
