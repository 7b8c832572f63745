//! Batch event types and the broadcast EventBus
//!
//! Events are emitted by the batch orchestrator and forwarded to SSE clients.
//! Emission is fire-and-forget: a run never blocks or fails because nobody is
//! listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events describing the progress of a batch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Run started after loading the checkpoint
    RunStarted {
        run_id: Uuid,
        total_items: usize,
        pending_items: usize,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A wave of items was dispatched
    WaveStarted {
        run_id: Uuid,
        wave_index: u64,
        item_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An item was fused and persisted
    ItemSucceeded {
        run_id: Uuid,
        item_id: String,
        overall_confidence: f64,
        conflicts: usize,
        cost: f64,
        timestamp: DateTime<Utc>,
    },

    /// An item failed (recorded in the checkpoint, run continues)
    ItemFailed {
        run_id: Uuid,
        item_id: String,
        reason: String,
        permanent: bool,
        timestamp: DateTime<Utc>,
    },

    /// Every item of a wave settled
    WaveCompleted {
        run_id: Uuid,
        wave_index: u64,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Run finished (all pending items attempted)
    RunCompleted {
        run_id: Uuid,
        processed: usize,
        failed: usize,
        total_cost: f64,
        timestamp: DateTime<Utc>,
    },

    /// Run stopped at a wave boundary on request
    RunCancelled {
        run_id: Uuid,
        wave_index: u64,
        timestamp: DateTime<Utc>,
    },

    /// Run aborted by a fatal error
    RunAborted {
        run_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::RunStarted { .. } => "RunStarted",
            BatchEvent::WaveStarted { .. } => "WaveStarted",
            BatchEvent::ItemSucceeded { .. } => "ItemSucceeded",
            BatchEvent::ItemFailed { .. } => "ItemFailed",
            BatchEvent::WaveCompleted { .. } => "WaveCompleted",
            BatchEvent::RunCompleted { .. } => "RunCompleted",
            BatchEvent::RunCancelled { .. } => "RunCancelled",
            BatchEvent::RunAborted { .. } => "RunAborted",
        }
    }

    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            BatchEvent::RunStarted { run_id, .. }
            | BatchEvent::WaveStarted { run_id, .. }
            | BatchEvent::ItemSucceeded { run_id, .. }
            | BatchEvent::ItemFailed { run_id, .. }
            | BatchEvent::WaveCompleted { run_id, .. }
            | BatchEvent::RunCompleted { run_id, .. }
            | BatchEvent::RunCancelled { run_id, .. }
            | BatchEvent::RunAborted { run_id, .. } => *run_id,
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow subscribers
/// observe `Lagged` instead of slowing producers down.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BatchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
