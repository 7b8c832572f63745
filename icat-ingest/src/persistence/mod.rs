//! Persistence gateway and item source
//!
//! Every save is an idempotent upsert: raw extractions keyed by
//! (item_id, image_ref), consolidated records by item_id, and a single
//! batch checkpoint row.

mod memory;
mod retry;
mod sqlite;

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

use crate::types::{Checkpoint, ConsolidatedRecord, ImageRef, RawExtraction};
use async_trait::async_trait;
use thiserror::Error;

/// Persistence gateway errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Durable storage of extractions, records and batch progress
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Upsert the raw extraction of one (item, image) pair
    async fn save_raw(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        extraction: &RawExtraction,
    ) -> Result<(), PersistenceError>;

    /// All raw extractions saved for an item
    async fn load_raw(&self, item_id: &str) -> Result<Vec<RawExtraction>, PersistenceError>;

    /// Upsert the consolidated record of an item
    async fn save_consolidated(
        &self,
        item_id: &str,
        record: &ConsolidatedRecord,
    ) -> Result<(), PersistenceError>;

    async fn get_consolidated(
        &self,
        item_id: &str,
    ) -> Result<Option<ConsolidatedRecord>, PersistenceError>;

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError>;

    async fn clear_checkpoint(&self) -> Result<(), PersistenceError>;
}

/// Catalog of items and their photographs
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Ordered image references of an item
    async fn list_images(&self, item_id: &str) -> Result<Vec<ImageRef>, PersistenceError>;

    /// Items without a consolidated record, in registration order
    async fn pending_items(&self) -> Result<Vec<String>, PersistenceError>;
}
