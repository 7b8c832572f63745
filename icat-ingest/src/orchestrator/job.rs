//! Batch job state
//!
//! The job is owned by the orchestrator's driver loop and mutated only there,
//! once per settled item, right before the checkpoint write.

use crate::types::{Checkpoint, FailureKind, FailureRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

/// Lifecycle of one item within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub run_id: Uuid,
    /// Requested items, deduplicated, in request order
    pub item_ids: Vec<String>,
    pub concurrency_limit: usize,
    pub wave_index: u64,
    pub completed: BTreeSet<String>,
    pub failed: BTreeMap<String, FailureRecord>,
    pub total_cost: f64,
    pub total_latency_ms: u64,
    pub total_elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    states: BTreeMap<String, ItemState>,
    /// Checkpoint entries of items outside this run, written back unchanged
    carried_completed: BTreeSet<String>,
    carried_failed: BTreeMap<String, FailureRecord>,
}

impl BatchJob {
    /// Create a job, restoring progress from `checkpoint` when given.
    ///
    /// Only entries for `item_ids` enter `completed` and `failed`, so that
    /// `completed ∪ failed ⊆ item_ids` holds. Entries for other items are
    /// carried over into every checkpoint this job writes.
    pub fn new(
        run_id: Uuid,
        item_ids: &[String],
        concurrency_limit: usize,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        let mut seen = HashSet::new();
        let item_ids: Vec<String> = item_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut job = Self {
            run_id,
            states: item_ids
                .iter()
                .map(|id| (id.clone(), ItemState::Pending))
                .collect(),
            item_ids,
            concurrency_limit,
            wave_index: 0,
            completed: BTreeSet::new(),
            failed: BTreeMap::new(),
            total_cost: 0.0,
            total_latency_ms: 0,
            total_elapsed_ms: 0,
            started_at: Utc::now(),
            carried_completed: BTreeSet::new(),
            carried_failed: BTreeMap::new(),
        };

        if let Some(checkpoint) = checkpoint {
            job.restore(checkpoint);
        }
        job
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.wave_index = checkpoint.wave_index;
        self.total_cost = checkpoint.total_cost;
        self.total_latency_ms = checkpoint.total_latency_ms;
        self.total_elapsed_ms = checkpoint.total_elapsed_ms;
        self.started_at = checkpoint.started_at;

        for id in checkpoint.completed {
            match self.states.get_mut(&id) {
                Some(state) => {
                    *state = ItemState::Succeeded;
                    self.completed.insert(id);
                }
                None => {
                    self.carried_completed.insert(id);
                }
            }
        }
        for (id, failure) in checkpoint.failed {
            if self.completed.contains(&id) || self.carried_completed.contains(&id) {
                continue;
            }
            match self.states.get_mut(&id) {
                Some(state) => {
                    *state = ItemState::Failed;
                    self.failed.insert(id, failure);
                }
                None => {
                    self.carried_failed.insert(id, failure);
                }
            }
        }
    }

    /// Items to attempt in this run, in request order
    pub fn items_to_attempt(&self, retry_permanent_failures: bool) -> Vec<String> {
        self.item_ids
            .iter()
            .filter(|id| !self.completed.contains(*id))
            .filter(|id| match self.failed.get(*id) {
                Some(failure) => {
                    failure.kind == FailureKind::Transient || retry_permanent_failures
                }
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn state(&self, item_id: &str) -> Option<ItemState> {
        self.states.get(item_id).copied()
    }

    pub fn mark_in_flight(&mut self, item_id: &str) {
        if let Some(state) = self.states.get_mut(item_id) {
            *state = ItemState::InFlight;
        }
    }

    /// Add the adapter spend of a settled item to the running totals
    pub fn add_usage(&mut self, cost: f64, latency_ms: u64) {
        self.total_cost += cost;
        self.total_latency_ms += latency_ms;
    }

    pub fn record_success(&mut self, item_id: &str) {
        if let Some(state) = self.states.get_mut(item_id) {
            *state = ItemState::Succeeded;
            self.failed.remove(item_id);
            self.completed.insert(item_id.to_string());
        }
    }

    /// Record a failure, counting it on top of earlier attempts
    pub fn record_failure(&mut self, item_id: &str, reason: String, kind: FailureKind) -> &FailureRecord {
        let attempts = self.failed.get(item_id).map_or(0, |f| f.attempts) + 1;
        if let Some(state) = self.states.get_mut(item_id) {
            *state = ItemState::Failed;
        }
        self.completed.remove(item_id);
        self.failed
            .entry(item_id.to_string())
            .and_modify(|f| {
                f.reason = reason.clone();
                f.kind = kind;
                f.attempts = attempts;
            })
            .or_insert(FailureRecord {
                reason,
                kind,
                attempts,
            })
    }

    /// Every requested item has a consolidated record
    pub fn is_fully_complete(&self) -> bool {
        self.completed.len() == self.item_ids.len()
    }

    /// Items outside this run still recorded as failed in the checkpoint
    pub fn carried_failures(&self) -> usize {
        self.carried_failed.len()
    }

    /// Progress of this run merged with the carried entries of other items
    pub fn to_checkpoint(&self) -> Checkpoint {
        let mut completed = self.carried_completed.clone();
        completed.extend(self.completed.iter().cloned());
        let mut failed = self.carried_failed.clone();
        failed.extend(self.failed.iter().map(|(id, f)| (id.clone(), f.clone())));

        Checkpoint {
            completed,
            failed,
            wave_index: self.wave_index,
            total_cost: self.total_cost,
            total_latency_ms: self.total_latency_ms,
            total_elapsed_ms: self.total_elapsed_ms,
            started_at: self.started_at,
            updated_at: Utc::now(),
        }
    }
}
