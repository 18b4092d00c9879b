use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::taxonomy::Phase;

/// Schema version stamped on every emitted event. Only the major component
/// participates in compatibility checks.
pub const PLD_SCHEMA_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EventId(pub(crate) String);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub(crate) String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Logical origin of an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    User,
    Assistant,
    Runtime,
    Controller,
    Detector,
    System,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Runtime => "runtime",
            Self::Controller => "controller",
            Self::Detector => "detector",
            Self::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// Closed enumeration of known event types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DriftDetected,
    DriftEscalated,
    RepairTriggered,
    RepairEscalated,
    ReentryObserved,
    ContinueAllowed,
    ContinueBlocked,
    FailoverTriggered,
    LatencySpike,
    PauseDetected,
    FallbackExecuted,
    Handoff,
    EvaluationPass,
    EvaluationFail,
    SessionClosed,
    Info,
}

/// Enforcement tier binding an event type to a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRequirement {
    /// Phase mismatch is a hard violation.
    Must(Phase),
    /// Phase mismatch is a warning; the default phase is recommended.
    Should(Phase),
    /// Any phase is permitted.
    May,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriftDetected => "drift_detected",
            Self::DriftEscalated => "drift_escalated",
            Self::RepairTriggered => "repair_triggered",
            Self::RepairEscalated => "repair_escalated",
            Self::ReentryObserved => "reentry_observed",
            Self::ContinueAllowed => "continue_allowed",
            Self::ContinueBlocked => "continue_blocked",
            Self::FailoverTriggered => "failover_triggered",
            Self::LatencySpike => "latency_spike",
            Self::PauseDetected => "pause_detected",
            Self::FallbackExecuted => "fallback_executed",
            Self::Handoff => "handoff",
            Self::EvaluationPass => "evaluation_pass",
            Self::EvaluationFail => "evaluation_fail",
            Self::SessionClosed => "session_closed",
            Self::Info => "info",
        }
    }

    /// The phase enforcement tier for this event type.
    pub fn phase_requirement(&self) -> PhaseRequirement {
        use PhaseRequirement::{May, Must, Should};
        match self {
            Self::DriftDetected | Self::DriftEscalated => Must(Phase::Drift),
            Self::RepairTriggered | Self::RepairEscalated => Must(Phase::Repair),
            Self::ReentryObserved => Must(Phase::Reentry),
            Self::ContinueAllowed | Self::ContinueBlocked => Must(Phase::Continue),
            Self::FailoverTriggered => Must(Phase::Failover),
            Self::EvaluationPass | Self::EvaluationFail | Self::SessionClosed => {
                Should(Phase::Outcome)
            }
            Self::Info => Should(Phase::None),
            Self::LatencySpike | Self::PauseDetected | Self::FallbackExecuted | Self::Handoff => {
                May
            }
        }
    }

    pub fn is_drift(&self) -> bool {
        matches!(self, Self::DriftDetected | Self::DriftEscalated)
    }

    pub fn is_repair(&self) -> bool {
        matches!(self, Self::RepairTriggered | Self::RepairEscalated)
    }

    /// Observability events never drive lifecycle transitions.
    pub fn is_observability(&self) -> bool {
        matches!(
            self,
            Self::LatencySpike | Self::PauseDetected | Self::Handoff | Self::Info
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle classification block of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PldBlock {
    pub phase: Phase,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl PldBlock {
    pub fn new(phase: Phase, code: impl Into<String>) -> Self {
        Self {
            phase,
            code: code.into(),
            confidence: None,
            metadata: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Observability block populated by the emitting runtime. Open to extra
/// fields (latency_ms and friends) by design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_sequence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UxBlock {
    pub user_visible_state_change: bool,
}

/// A lifecycle event. Treated as immutable once constructed: the bridge and
/// the wire parser are the only producers, and nothing in the runtime
/// mutates an event after acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PLDEvent {
    pub schema_version: String,
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub turn_sequence: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub source: EventSource,
    pub event_type: EventType,
    pub pld: PldBlock,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeBlock>,
    pub ux: UxBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl PLDEvent {
    /// Major component of the event's schema_version ("2.1" → "2").
    pub fn schema_major(&self) -> &str {
        self.schema_version.split('.').next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_requirements() {
        assert_eq!(
            EventType::DriftDetected.phase_requirement(),
            PhaseRequirement::Must(Phase::Drift)
        );
        assert_eq!(
            EventType::SessionClosed.phase_requirement(),
            PhaseRequirement::Should(Phase::Outcome)
        );
        assert_eq!(EventType::LatencySpike.phase_requirement(), PhaseRequirement::May);
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::DriftDetected).unwrap();
        assert_eq!(json, "\"drift_detected\"");
        let back: EventType = serde_json::from_str("\"failover_triggered\"").unwrap();
        assert_eq!(back, EventType::FailoverTriggered);
    }

    #[test]
    fn test_schema_major() {
        let mut event = crate::event::wire::tests::sample_event();
        event.schema_version = "2.3".into();
        assert_eq!(event.schema_major(), "2");
    }
}
