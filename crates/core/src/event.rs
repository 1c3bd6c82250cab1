//! Domain event system - decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::message::UserId;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user message entered the orchestrator
    MessageReceived {
        user_id: UserId,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a final answer for a user
    ResponseGenerated {
        user_id: UserId,
        model: String,
        rounds: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        user_id: UserId,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A history prefix was collapsed into a summary turn
    HistoryCompacted {
        user_id: UserId,
        turns_removed: usize,
        used_placeholder: bool,
        timestamp: DateTime<Utc>,
    },

    /// A scheduled batch run finished
    BatchCompleted {
        run_id: Uuid,
        users: usize,
        failures: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Stable snake_case name, used as the SSE event type.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::MessageReceived { .. } => "message_received",
            DomainEvent::ResponseGenerated { .. } => "response_generated",
            DomainEvent::ToolExecuted { .. } => "tool_executed",
            DomainEvent::HistoryCompacted { .. } => "history_compacted",
            DomainEvent::BatchCompleted { .. } => "batch_completed",
            DomainEvent::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
