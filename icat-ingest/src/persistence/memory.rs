//! In-process gateway and item source
//!
//! Backs tests and short-lived runs. State lives behind one `RwLock` per
//! table, cloned out on reads.

use super::{ItemSource, PersistenceError, PersistenceGateway};
use crate::types::{Checkpoint, ConsolidatedRecord, ImageRef, RawExtraction};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryGateway {
    /// Registered items in registration order
    items: RwLock<Vec<(String, Vec<ImageRef>)>>,
    /// item_id → extractions in first-save order
    raw: RwLock<HashMap<String, Vec<RawExtraction>>>,
    records: RwLock<HashMap<String, ConsolidatedRecord>>,
    checkpoint: RwLock<Option<Checkpoint>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an item and its ordered images
    pub async fn add_item(&self, item_id: &str, images: Vec<ImageRef>) {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|(id, _)| id == item_id) {
            Some(entry) => entry.1 = images,
            None => items.push((item_id.to_string(), images)),
        }
    }

    pub async fn raw_count(&self) -> usize {
        self.raw.read().await.values().map(Vec::len).sum()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn save_raw(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        extraction: &RawExtraction,
    ) -> Result<(), PersistenceError> {
        let mut raw = self.raw.write().await;
        let saved = raw.entry(item_id.to_string()).or_default();
        match saved.iter_mut().find(|r| &r.image_ref == image_ref) {
            Some(existing) => *existing = extraction.clone(),
            None => saved.push(extraction.clone()),
        }
        Ok(())
    }

    async fn load_raw(&self, item_id: &str) -> Result<Vec<RawExtraction>, PersistenceError> {
        Ok(self.raw.read().await.get(item_id).cloned().unwrap_or_default())
    }

    async fn save_consolidated(
        &self,
        item_id: &str,
        record: &ConsolidatedRecord,
    ) -> Result<(), PersistenceError> {
        self.records
            .write()
            .await
            .insert(item_id.to_string(), record.clone());
        Ok(())
    }

    async fn get_consolidated(
        &self,
        item_id: &str,
    ) -> Result<Option<ConsolidatedRecord>, PersistenceError> {
        Ok(self.records.read().await.get(item_id).cloned())
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError> {
        Ok(self.checkpoint.read().await.clone())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        *self.checkpoint.write().await = Some(checkpoint.clone());
        Ok(())
    }

    async fn clear_checkpoint(&self) -> Result<(), PersistenceError> {
        *self.checkpoint.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl ItemSource for MemoryGateway {
    async fn list_images(&self, item_id: &str) -> Result<Vec<ImageRef>, PersistenceError> {
        self.items
            .read()
            .await
            .iter()
            .find(|(id, _)| id == item_id)
            .map(|(_, images)| images.clone())
            .ok_or_else(|| PersistenceError::NotFound(format!("item {}", item_id)))
    }

    async fn pending_items(&self) -> Result<Vec<String>, PersistenceError> {
        let records = self.records.read().await;
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter(|(id, _)| !records.contains_key(id))
            .map(|(id, _)| id.clone())
            .collect())
    }
}
