//! Test helper utilities
//!
//! Shared mocks for icat-ingest integration tests:
//! - `ScriptedAdapter`: per-(item, image) scripted extraction results with a call log
//! - `CountingGateway`: `MemoryGateway` wrapper counting saves, optionally failing checkpoints

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use icat_ingest::extraction::{AdapterResponse, ExtractionAdapter, ExtractionError};
use icat_ingest::persistence::{ItemSource, MemoryGateway, PersistenceError, PersistenceGateway};
use icat_ingest::types::{
    Checkpoint, ConsolidatedRecord, ExtractedField, FieldSchema, FieldValue, ImageRef,
    QualitySignal, RawExtraction,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ============================================================================
// Builders
// ============================================================================

pub fn num(value: f64, confidence: f64) -> ExtractedField {
    ExtractedField::new(FieldValue::Numeric(value), confidence)
}

pub fn cat(value: &str, confidence: f64) -> ExtractedField {
    ExtractedField::new(FieldValue::Categorical(value.to_string()), confidence)
}

pub fn text(value: &str, confidence: f64) -> ExtractedField {
    ExtractedField::new(FieldValue::Text(value.to_string()), confidence)
}

/// Raw extraction for image `index` of `item_id` with a fixed timestamp
pub fn raw(item_id: &str, index: usize, fields: Vec<(&str, ExtractedField)>) -> RawExtraction {
    RawExtraction {
        item_id: item_id.to_string(),
        image_ref: image(item_id, index),
        fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        free_text: None,
        quality: None,
        cost: 0.01,
        latency_ms: 100,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, index as u32).unwrap(),
    }
}

pub fn image(item_id: &str, index: usize) -> ImageRef {
    ImageRef::new(format!("{}/img-{}.jpg", item_id, index))
}

pub fn images(item_id: &str, count: usize) -> Vec<ImageRef> {
    (0..count).map(|i| image(item_id, i)).collect()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub fn response(fields: Vec<(&str, ExtractedField)>, cost: f64) -> AdapterResponse {
    AdapterResponse {
        fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        free_text: None,
        cost,
        latency_ms: 20,
        quality: Some(QualitySignal {
            score: 0.8,
            low_quality: false,
        }),
    }
}

pub fn default_response() -> AdapterResponse {
    response(
        vec![("weight", num(2.0, 0.9)), ("color", cat("green", 0.8))],
        0.01,
    )
}

/// Gateway with `count` images registered for each item
pub async fn seeded_gateway(items: &[&str], count: usize) -> CountingGateway {
    let gateway = CountingGateway::new();
    for item in items {
        gateway.inner.add_item(item, images(item, count)).await;
    }
    gateway
}

// ============================================================================
// ScriptedAdapter
// ============================================================================

/// Scripted result of one adapter call
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond(AdapterResponse),
    Transient(String),
    Permanent(String),
    /// Respond after a delay
    Slow(Duration, AdapterResponse),
    Panic,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub item_id: String,
    pub image_ref: ImageRef,
    pub started: Instant,
    pub finished: Instant,
}

/// Extraction adapter whose results are scripted per (item_id, image_ref)
pub struct ScriptedAdapter {
    behaviors: Mutex<HashMap<(String, ImageRef), Behavior>>,
    default: Behavior,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::with_default(Behavior::Respond(default_response()))
    }

    pub fn with_default(default: Behavior) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script every image of `item_id` up to `count`
    pub fn script_item(&self, item_id: &str, count: usize, behavior: Behavior) {
        for i in 0..count {
            self.script(item_id, &image(item_id, i), behavior.clone());
        }
    }

    pub fn script(&self, item_id: &str, image_ref: &ImageRef, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert((item_id.to_string(), image_ref.clone()), behavior);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, item_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.item_id == item_id)
            .count()
    }

    pub fn image_call_count(&self, item_id: &str, image_ref: &ImageRef) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.item_id == item_id && &c.image_ref == image_ref)
            .count()
    }

    fn record(&self, item_id: &str, image_ref: &ImageRef, started: Instant) {
        self.calls.lock().unwrap().push(CallRecord {
            item_id: item_id.to_string(),
            image_ref: image_ref.clone(),
            started,
            finished: Instant::now(),
        });
    }
}

#[async_trait]
impl ExtractionAdapter for ScriptedAdapter {
    async fn invoke(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        _schema: &FieldSchema,
    ) -> Result<AdapterResponse, ExtractionError> {
        let started = Instant::now();
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&(item_id.to_string(), image_ref.clone()))
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        let result = match behavior {
            Behavior::Respond(response) => Ok(response),
            Behavior::Transient(reason) => Err(ExtractionError::Transient(reason)),
            Behavior::Permanent(reason) => Err(ExtractionError::Permanent(reason)),
            Behavior::Slow(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Behavior::Panic => {
                self.record(item_id, image_ref, started);
                panic!("scripted adapter panic for {}", item_id);
            }
        };

        self.record(item_id, image_ref, started);
        result
    }
}

// ============================================================================
// CountingGateway
// ============================================================================

/// `MemoryGateway` wrapper that counts saves per item and can fail checkpoints
pub struct CountingGateway {
    pub inner: MemoryGateway,
    raw_saves: Mutex<HashMap<String, usize>>,
    record_saves: Mutex<HashMap<String, usize>>,
    checkpoint_saves: AtomicUsize,
    /// Fail every checkpoint save once this many have succeeded
    fail_checkpoint_after: Mutex<Option<usize>>,
}

impl CountingGateway {
    pub fn new() -> Self {
        Self {
            inner: MemoryGateway::new(),
            raw_saves: Mutex::new(HashMap::new()),
            record_saves: Mutex::new(HashMap::new()),
            checkpoint_saves: AtomicUsize::new(0),
            fail_checkpoint_after: Mutex::new(None),
        }
    }

    pub fn fail_checkpoint_after(&self, successful_saves: usize) {
        *self.fail_checkpoint_after.lock().unwrap() = Some(successful_saves);
    }

    pub fn raw_saves(&self, item_id: &str) -> usize {
        self.raw_saves.lock().unwrap().get(item_id).copied().unwrap_or(0)
    }

    pub fn record_saves(&self, item_id: &str) -> usize {
        self.record_saves.lock().unwrap().get(item_id).copied().unwrap_or(0)
    }

    pub fn checkpoint_saves(&self) -> usize {
        self.checkpoint_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for CountingGateway {
    async fn save_raw(
        &self,
        item_id: &str,
        image_ref: &ImageRef,
        extraction: &RawExtraction,
    ) -> Result<(), PersistenceError> {
        *self
            .raw_saves
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default() += 1;
        self.inner.save_raw(item_id, image_ref, extraction).await
    }

    async fn load_raw(&self, item_id: &str) -> Result<Vec<RawExtraction>, PersistenceError> {
        self.inner.load_raw(item_id).await
    }

    async fn save_consolidated(
        &self,
        item_id: &str,
        record: &ConsolidatedRecord,
    ) -> Result<(), PersistenceError> {
        *self
            .record_saves
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default() += 1;
        self.inner.save_consolidated(item_id, record).await
    }

    async fn get_consolidated(
        &self,
        item_id: &str,
    ) -> Result<Option<ConsolidatedRecord>, PersistenceError> {
        self.inner.get_consolidated(item_id).await
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError> {
        self.inner.load_checkpoint().await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let limit = *self.fail_checkpoint_after.lock().unwrap();
        if let Some(limit) = limit {
            if self.checkpoint_saves.load(Ordering::SeqCst) >= limit {
                return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
            }
        }
        self.checkpoint_saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn clear_checkpoint(&self) -> Result<(), PersistenceError> {
        self.inner.clear_checkpoint().await
    }
}

#[async_trait]
impl ItemSource for CountingGateway {
    async fn list_images(&self, item_id: &str) -> Result<Vec<ImageRef>, PersistenceError> {
        self.inner.list_images(item_id).await
    }

    async fn pending_items(&self) -> Result<Vec<String>, PersistenceError> {
        self.inner.pending_items().await
    }
}
