//! Per-item processing
//!
//! 1. Ordered image list from the item source
//! 2. Saved raw extractions reused (no second billed call per image)
//! 3. Remaining images extracted concurrently, each under a timeout that
//!    starts once the adapter admits the call, each success saved immediately
//! 4. Any failed image fails the item; otherwise fuse and save the record
//!
//! Nothing here touches batch state. The result is handed back to the driver
//! loop as an [`ItemOutcome`].

use crate::extraction::{ExtractionAdapter, ExtractionError};
use crate::fusion::FusionEngine;
use crate::persistence::{ItemSource, PersistenceError, PersistenceGateway};
use crate::types::{ConsolidatedRecord, FailureKind, ImageRef, RawExtraction};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Shared, immutable collaborators of item tasks
#[derive(Clone)]
pub(crate) struct ItemContext {
    pub adapter: Arc<dyn ExtractionAdapter>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub source: Arc<dyn ItemSource>,
    pub engine: Arc<FusionEngine>,
    pub extraction_timeout: Duration,
    pub reuse_saved_extractions: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ItemFailure {
    pub reason: String,
    pub kind: FailureKind,
}

impl ItemFailure {
    fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: FailureKind::Transient,
        }
    }

    fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: FailureKind::Permanent,
        }
    }
}

/// Settled item: spend of new adapter calls plus the fused record or failure
#[derive(Debug)]
pub(crate) struct ItemOutcome {
    pub cost: f64,
    pub latency_ms: u64,
    pub result: Result<ConsolidatedRecord, ItemFailure>,
}

impl ItemOutcome {
    fn failed(failure: ItemFailure) -> Self {
        Self {
            cost: 0.0,
            latency_ms: 0,
            result: Err(failure),
        }
    }

    /// Outcome of an item task that panicked or was aborted
    pub fn crashed(reason: String) -> Self {
        Self::failed(ItemFailure::transient(reason))
    }
}

pub(crate) async fn process_item(ctx: ItemContext, item_id: String) -> ItemOutcome {
    let images = match ctx.source.list_images(&item_id).await {
        Ok(images) if images.is_empty() => {
            return ItemOutcome::failed(ItemFailure::permanent("Item has no images"));
        }
        Ok(images) => dedup_images(&item_id, images),
        Err(PersistenceError::NotFound(what)) => {
            return ItemOutcome::failed(ItemFailure::permanent(format!("Unknown item: {}", what)));
        }
        Err(e) => {
            return ItemOutcome::failed(ItemFailure::transient(format!("Image listing failed: {}", e)));
        }
    };

    let mut saved: HashMap<ImageRef, RawExtraction> = HashMap::new();
    if ctx.reuse_saved_extractions {
        match ctx.gateway.load_raw(&item_id).await {
            Ok(raw) => {
                saved = raw.into_iter().map(|r| (r.image_ref.clone(), r)).collect();
            }
            Err(e) => {
                return ItemOutcome::failed(ItemFailure::transient(format!(
                    "Loading saved extractions failed: {}",
                    e
                )));
            }
        }
    }

    let missing: Vec<&ImageRef> = images.iter().filter(|i| !saved.contains_key(*i)).collect();
    if missing.len() < images.len() {
        tracing::debug!(
            item_id = %item_id,
            reused = images.len() - missing.len(),
            to_extract = missing.len(),
            "Reusing saved extractions"
        );
    }

    let results = join_all(missing.iter().map(|image| extract_and_save(&ctx, &item_id, image))).await;

    let mut cost = 0.0;
    let mut latency_ms = 0;
    let mut failures = Vec::new();
    let mut any_permanent = false;

    for (image, result) in missing.iter().zip(results) {
        match result {
            Ok(raw) => {
                cost += raw.cost;
                latency_ms += raw.latency_ms;
                saved.insert((*image).clone(), raw);
            }
            Err((spent, failure)) => {
                cost += spent.0;
                latency_ms += spent.1;
                any_permanent |= failure.kind == FailureKind::Permanent;
                failures.push(format!("{}: {}", image, failure.reason));
            }
        }
    }

    if !failures.is_empty() {
        let failure = ItemFailure {
            reason: failures.join("; "),
            kind: if any_permanent {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            },
        };
        return ItemOutcome {
            cost,
            latency_ms,
            result: Err(failure),
        };
    }

    let ordered: Vec<RawExtraction> = images.iter().filter_map(|i| saved.remove(i)).collect();

    let result = match ctx.engine.fuse(&ordered) {
        Ok(record) => match ctx.gateway.save_consolidated(&item_id, &record).await {
            Ok(()) => Ok(record),
            Err(e) => Err(ItemFailure::transient(format!("Saving consolidated record failed: {}", e))),
        },
        Err(e) => Err(ItemFailure::permanent(e.to_string())),
    };

    ItemOutcome {
        cost,
        latency_ms,
        result,
    }
}

/// Drop repeated image refs, keeping the first position of each
fn dedup_images(item_id: &str, images: Vec<ImageRef>) -> Vec<ImageRef> {
    let listed = images.len();
    let mut seen = HashSet::new();
    let images: Vec<ImageRef> = images.into_iter().filter(|i| seen.insert(i.clone())).collect();
    if images.len() < listed {
        tracing::warn!(item_id, listed, distinct = images.len(), "Item lists the same image more than once");
    }
    images
}

/// Spend (cost, latency) of a call whose result could not be used
type Spent = (f64, u64);

async fn extract_and_save(
    ctx: &ItemContext,
    item_id: &str,
    image: &ImageRef,
) -> Result<RawExtraction, (Spent, ItemFailure)> {
    ctx.adapter.ready().await;
    let call = ctx.adapter.invoke(item_id, image, ctx.engine.schema());

    let response = match tokio::time::timeout(ctx.extraction_timeout, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(ExtractionError::Transient(reason))) => {
            tracing::warn!(item_id, image = %image, reason = %reason, "Transient extraction failure");
            return Err(((0.0, 0), ItemFailure::transient(reason)));
        }
        Ok(Err(ExtractionError::Permanent(reason))) => {
            tracing::warn!(item_id, image = %image, reason = %reason, "Permanent extraction failure");
            return Err(((0.0, 0), ItemFailure::permanent(reason)));
        }
        Err(_) => {
            let timeout_ms = ctx.extraction_timeout.as_millis() as u64;
            tracing::warn!(item_id, image = %image, timeout_ms, "Extraction timed out");
            return Err((
                (0.0, timeout_ms),
                ItemFailure::transient(format!("Extraction timed out after {} ms", timeout_ms)),
            ));
        }
    };

    let raw = RawExtraction {
        item_id: item_id.to_string(),
        image_ref: image.clone(),
        fields: response.fields,
        free_text: response.free_text,
        quality: response.quality,
        cost: response.cost,
        latency_ms: response.latency_ms,
        created_at: Utc::now(),
    };

    if let Err(e) = ctx.gateway.save_raw(item_id, image, &raw).await {
        return Err((
            (raw.cost, raw.latency_ms),
            ItemFailure::transient(format!("Saving raw extraction failed: {}", e)),
        ));
    }

    tracing::debug!(
        item_id,
        image = %image,
        fields = raw.non_null_field_count(),
        cost = raw.cost,
        latency_ms = raw.latency_ms,
        "Image extracted"
    );
    Ok(raw)
}
