//! External sink and dead-letter boundary.
//!
//! Persistence and queueing live outside the core; this module only defines
//! the handoff types and a memory-backed sink used in tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{EventId, PLDEvent};

/// Structured record describing why an event was refused, consumed by an
/// external dead-letter mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub event_id: Option<EventId>,
    pub raw: serde_json::Value,
    pub error_code: String,
    pub message: String,
    pub rejected_at: DateTime<Utc>,
}

impl RejectionRecord {
    /// Build a rejection from a raw payload that failed structural parsing.
    /// The event id is salvaged when the payload is at least valid JSON.
    pub fn from_raw(raw: &str, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        let value: serde_json::Value =
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        let event_id = value
            .get("event_id")
            .and_then(|v| v.as_str())
            .map(EventId::from);

        Self {
            event_id,
            raw: value,
            error_code: error_code.into(),
            message: message.into(),
            rejected_at: Utc::now(),
        }
    }

    /// Build a rejection from an event that parsed but failed validation.
    pub fn from_event(
        event: &PLDEvent,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Some(event.event_id.clone()),
            raw: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            error_code: error_code.into(),
            message: message.into(),
            rejected_at: Utc::now(),
        }
    }
}

/// Handoff boundary to the durable log and dead-letter queue.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn accept(&self, event: &PLDEvent) -> Result<()>;
    async fn reject(&self, rejection: RejectionRecord) -> Result<()>;
}

/// In-memory sink. Used by tests and as a default collaborator when no
/// external sink is wired in.
#[derive(Debug, Default)]
pub struct MemorySink {
    accepted: Mutex<Vec<PLDEvent>>,
    rejected: Mutex<Vec<RejectionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) -> Vec<PLDEvent> {
        self.accepted.lock().clone()
    }

    pub fn rejected(&self) -> Vec<RejectionRecord> {
        self.rejected.lock().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.lock().len()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn accept(&self, event: &PLDEvent) -> Result<()> {
        self.accepted.lock().push(event.clone());
        Ok(())
    }

    async fn reject(&self, rejection: RejectionRecord) -> Result<()> {
        self.rejected.lock().push(rejection);
        Ok(())
    }
}
