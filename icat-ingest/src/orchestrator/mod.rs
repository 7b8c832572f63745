//! Resilient batch orchestrator
//!
//! Drives extraction and fusion over a catalog in waves:
//!
//! ```text
//! load checkpoint → select items → [wave: spawn ≤ N item tasks → settle all] → delay → ...
//!                                          │
//!                                          └─ per settled item: update job, save checkpoint
//! ```
//!
//! - Item failures are recorded and never abort the run
//! - Checkpoint load/save failures abort the run
//! - Cancellation is observed only at wave boundaries
//! - The checkpoint is shared by all runs; entries of items outside a run are
//!   kept, and it is cleared once no item has an outstanding failure

mod item;
mod job;

pub use job::{BatchJob, ItemState};

use crate::extraction::ExtractionAdapter;
use crate::fusion::FusionEngine;
use crate::persistence::{ItemSource, PersistenceError, PersistenceGateway};
use crate::types::{Checkpoint, ConsolidatedRecord, FailureKind, FailureRecord};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use icat_common::events::{BatchEvent, EventBus};
use item::{process_item, ItemContext, ItemOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected before any work was done
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Checkpoint could not be persisted; run aborted
    #[error("Checkpoint write failed: {0}")]
    CheckpointWriteFailed(PersistenceError),

    /// Checkpoint could not be loaded; run aborted before any work
    #[error("Checkpoint load failed: {0}")]
    CheckpointLoadFailed(PersistenceError),

    /// Pending items could not be enumerated
    #[error("Item source unavailable: {0}")]
    ItemSourceUnavailable(PersistenceError),

    /// Single item failure (recorded in the checkpoint, not fatal to a run)
    #[error("Item {item_id} failed ({kind:?}): {reason}")]
    ItemFailed {
        item_id: String,
        reason: String,
        kind: FailureKind,
    },

    #[error("No consolidated record for item {0}")]
    NotFound(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Tunable parameters of the orchestrator (`[orchestrator]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default wave size when a run does not specify one
    pub concurrency_limit: usize,
    /// Pause between waves (external rate limits)
    pub inter_wave_delay_ms: u64,
    /// Upper bound for a single adapter call
    pub extraction_timeout_ms: u64,
    /// Skip adapter calls for images whose extraction is already saved
    pub reuse_saved_extractions: bool,
    /// Reattempt items that failed permanently in an earlier run
    pub retry_permanent_failures: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            inter_wave_delay_ms: 1000,
            extraction_timeout_ms: 60_000,
            reuse_saved_extractions: true,
            retry_permanent_failures: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("orchestrator.concurrency_limit must be >= 1".to_string());
        }
        if self.extraction_timeout_ms == 0 {
            return Err("orchestrator.extraction_timeout_ms must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Result of one `run()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Items that succeeded in this run
    pub processed: usize,
    /// Items that failed in this run
    pub failed: usize,
    /// Items not attempted: already completed, or permanently failed
    pub skipped: usize,
    /// Outstanding failures of the requested items after this run
    pub failures: BTreeMap<String, FailureRecord>,
    /// Running totals, including earlier resumed runs
    pub total_cost: f64,
    pub total_latency_ms: u64,
    pub total_elapsed_ms: u64,
    /// Waves executed in this run
    pub waves: u64,
    pub cancelled: bool,
}

/// Batch orchestrator
pub struct Orchestrator {
    adapter: Arc<dyn ExtractionAdapter>,
    gateway: Arc<dyn PersistenceGateway>,
    source: Arc<dyn ItemSource>,
    engine: Arc<FusionEngine>,
    config: OrchestratorConfig,
    event_bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn ExtractionAdapter>,
        gateway: Arc<dyn PersistenceGateway>,
        source: Arc<dyn ItemSource>,
        engine: FusionEngine,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            adapter,
            gateway,
            source,
            engine: Arc::new(engine),
            config,
            event_bus: EventBus::new(100),
        }
    }

    /// Publish run progress on an existing bus instead of a private one
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Process `item_ids` in waves of at most `concurrency_limit` items.
    ///
    /// With `resume`, progress is restored from the saved checkpoint:
    /// completed items and permanent failures are skipped.
    pub async fn run(
        &self,
        item_ids: &[String],
        concurrency_limit: usize,
        resume: bool,
    ) -> Result<RunSummary, OrchestratorError> {
        self.run_with_cancellation(item_ids, concurrency_limit, resume, CancellationToken::new())
            .await
    }

    /// Process every item the item source reports as pending
    pub async fn run_pending(&self, concurrency_limit: usize) -> Result<RunSummary, OrchestratorError> {
        self.run_pending_with_cancellation(concurrency_limit, CancellationToken::new())
            .await
    }

    pub async fn run_pending_with_cancellation(
        &self,
        concurrency_limit: usize,
        cancel: CancellationToken,
    ) -> Result<RunSummary, OrchestratorError> {
        let item_ids = self
            .source
            .pending_items()
            .await
            .map_err(OrchestratorError::ItemSourceUnavailable)?;

        tracing::info!(pending = item_ids.len(), "Enumerated pending items");
        self.run_with_cancellation(&item_ids, concurrency_limit, true, cancel)
            .await
    }

    /// Fused record of an item
    pub async fn get_consolidated(&self, item_id: &str) -> Result<ConsolidatedRecord, OrchestratorError> {
        self.gateway
            .get_consolidated(item_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(item_id.to_string()))
    }

    /// Batch progress as last persisted, if a checkpoint exists
    pub async fn saved_checkpoint(&self) -> Result<Option<Checkpoint>, OrchestratorError> {
        self.gateway
            .load_checkpoint()
            .await
            .map_err(OrchestratorError::CheckpointLoadFailed)
    }

    pub async fn run_with_cancellation(
        &self,
        item_ids: &[String],
        concurrency_limit: usize,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<RunSummary, OrchestratorError> {
        if concurrency_limit == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "concurrency_limit must be >= 1".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let run_started = Instant::now();

        let checkpoint = if resume {
            match self.gateway.load_checkpoint().await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Checkpoint load failed, aborting run");
                    self.emit_aborted(run_id, &e.to_string());
                    return Err(OrchestratorError::CheckpointLoadFailed(e));
                }
            }
        } else {
            None
        };
        let resumed = checkpoint.is_some();

        let mut job = BatchJob::new(run_id, item_ids, concurrency_limit, checkpoint);
        let base_elapsed_ms = job.total_elapsed_ms;
        let to_attempt = job.items_to_attempt(self.config.retry_permanent_failures);
        let skipped = job.item_ids.len() - to_attempt.len();

        tracing::info!(
            run_id = %run_id,
            total_items = job.item_ids.len(),
            pending_items = to_attempt.len(),
            skipped,
            resumed,
            concurrency_limit,
            "Starting batch run"
        );
        self.event_bus.emit_lossy(BatchEvent::RunStarted {
            run_id,
            total_items: job.item_ids.len(),
            pending_items: to_attempt.len(),
            resumed,
            timestamp: Utc::now(),
        });

        let ctx = ItemContext {
            adapter: Arc::clone(&self.adapter),
            gateway: Arc::clone(&self.gateway),
            source: Arc::clone(&self.source),
            engine: Arc::clone(&self.engine),
            extraction_timeout: Duration::from_millis(self.config.extraction_timeout_ms),
            reuse_saved_extractions: self.config.reuse_saved_extractions,
        };
        let inter_wave_delay = Duration::from_millis(self.config.inter_wave_delay_ms);

        let mut processed = 0;
        let mut failed = 0;
        let mut waves = 0u64;
        let mut cancelled = false;

        if !to_attempt.is_empty() {
            self.persist(&mut job, base_elapsed_ms, run_started).await?;
        }

        for (wave_number, wave) in to_attempt.chunks(concurrency_limit).enumerate() {
            if wave_number > 0 && !inter_wave_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(inter_wave_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            job.wave_index += 1;
            waves += 1;
            let wave_index = job.wave_index;

            tracing::info!(run_id = %run_id, wave_index, items = wave.len(), "Starting wave");
            self.event_bus.emit_lossy(BatchEvent::WaveStarted {
                run_id,
                wave_index,
                item_ids: wave.to_vec(),
                timestamp: Utc::now(),
            });

            let mut tasks = FuturesUnordered::new();
            let mut abort_handles = Vec::with_capacity(wave.len());
            for item_id in wave {
                job.mark_in_flight(item_id);
                let handle = tokio::spawn(process_item(ctx.clone(), item_id.clone()));
                abort_handles.push(handle.abort_handle());
                let item_id = item_id.clone();
                tasks.push(async move { (item_id, handle.await) });
            }

            let mut wave_succeeded = 0;
            let mut wave_failed = 0;

            while let Some((item_id, joined)) = tasks.next().await {
                let outcome = joined.unwrap_or_else(|e| {
                    tracing::error!(run_id = %run_id, item_id = %item_id, error = %e, "Item task crashed");
                    ItemOutcome::crashed(format!("Item task crashed: {}", e))
                });

                if self.settle_item(&mut job, &item_id, outcome) {
                    wave_succeeded += 1;
                } else {
                    wave_failed += 1;
                }

                if let Err(e) = self.persist(&mut job, base_elapsed_ms, run_started).await {
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    return Err(e);
                }
            }

            processed += wave_succeeded;
            failed += wave_failed;

            tracing::info!(
                run_id = %run_id,
                wave_index,
                succeeded = wave_succeeded,
                failed = wave_failed,
                "Wave completed"
            );
            self.event_bus.emit_lossy(BatchEvent::WaveCompleted {
                run_id,
                wave_index,
                succeeded: wave_succeeded,
                failed: wave_failed,
                timestamp: Utc::now(),
            });
        }

        job.total_elapsed_ms = base_elapsed_ms + run_started.elapsed().as_millis() as u64;

        if cancelled {
            tracing::info!(run_id = %run_id, wave_index = job.wave_index, "Batch run cancelled at wave boundary");
            self.event_bus.emit_lossy(BatchEvent::RunCancelled {
                run_id,
                wave_index: job.wave_index,
                timestamp: Utc::now(),
            });
        } else if job.is_fully_complete() && job.carried_failures() > 0 {
            self.persist(&mut job, base_elapsed_ms, run_started).await?;
            tracing::debug!(
                run_id = %run_id,
                outstanding = job.carried_failures(),
                "Requested items complete, checkpoint kept for failures outside this run"
            );
        } else if job.is_fully_complete() {
            if let Err(e) = self.gateway.clear_checkpoint().await {
                tracing::error!(run_id = %run_id, error = %e, "Checkpoint clear failed, aborting run");
                self.emit_aborted(run_id, &e.to_string());
                return Err(OrchestratorError::CheckpointWriteFailed(e));
            }
            tracing::debug!(run_id = %run_id, "No outstanding failures, checkpoint cleared");
        }

        let summary = RunSummary {
            run_id,
            processed,
            failed,
            skipped,
            failures: job.failed.clone(),
            total_cost: job.total_cost,
            total_latency_ms: job.total_latency_ms,
            total_elapsed_ms: job.total_elapsed_ms,
            waves,
            cancelled,
        };

        if !cancelled {
            tracing::info!(
                run_id = %run_id,
                processed,
                failed,
                skipped,
                total_cost = summary.total_cost,
                total_elapsed_ms = summary.total_elapsed_ms,
                "Batch run completed"
            );
            self.event_bus.emit_lossy(BatchEvent::RunCompleted {
                run_id,
                processed,
                failed,
                total_cost: summary.total_cost,
                timestamp: Utc::now(),
            });
        }

        Ok(summary)
    }

    /// Apply one settled item to the job. Returns whether it succeeded.
    fn settle_item(&self, job: &mut BatchJob, item_id: &str, outcome: ItemOutcome) -> bool {
        job.add_usage(outcome.cost, outcome.latency_ms);
        let run_id = job.run_id;

        match outcome.result {
            Ok(record) => {
                job.record_success(item_id);
                tracing::info!(
                    run_id = %run_id,
                    item_id,
                    overall_confidence = record.overall_confidence,
                    conflicts = record.conflicts.len(),
                    cost = outcome.cost,
                    "Item succeeded"
                );
                self.event_bus.emit_lossy(BatchEvent::ItemSucceeded {
                    run_id,
                    item_id: item_id.to_string(),
                    overall_confidence: record.overall_confidence,
                    conflicts: record.conflicts.len(),
                    cost: outcome.cost,
                    timestamp: Utc::now(),
                });
                true
            }
            Err(failure) => {
                let error = OrchestratorError::ItemFailed {
                    item_id: item_id.to_string(),
                    reason: failure.reason.clone(),
                    kind: failure.kind,
                };
                let attempts = job
                    .record_failure(item_id, failure.reason.clone(), failure.kind)
                    .attempts;
                tracing::warn!(run_id = %run_id, attempts, error = %error, "Item failed");
                self.event_bus.emit_lossy(BatchEvent::ItemFailed {
                    run_id,
                    item_id: item_id.to_string(),
                    reason: failure.reason,
                    permanent: failure.kind == FailureKind::Permanent,
                    timestamp: Utc::now(),
                });
                false
            }
        }
    }

    async fn persist(
        &self,
        job: &mut BatchJob,
        base_elapsed_ms: u64,
        run_started: Instant,
    ) -> Result<(), OrchestratorError> {
        job.total_elapsed_ms = base_elapsed_ms + run_started.elapsed().as_millis() as u64;

        if let Err(e) = self.gateway.save_checkpoint(&job.to_checkpoint()).await {
            tracing::error!(run_id = %job.run_id, error = %e, "Checkpoint write failed, aborting run");
            self.emit_aborted(job.run_id, &e.to_string());
            return Err(OrchestratorError::CheckpointWriteFailed(e));
        }
        Ok(())
    }

    fn emit_aborted(&self, run_id: Uuid, error: &str) {
        self.event_bus.emit_lossy(BatchEvent::RunAborted {
            run_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
