//! Bridges internal runtime signals into schema-valid lifecycle events.
//!
//! The bridge is the only producer of new events inside the runtime: it
//! resolves the canonical code and phase for a signal, populates the
//! envelope from the caller's context, and self-checks the result through
//! the validator before handing it out. Once returned, an event is never
//! mutated.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PldError, Result};
use crate::event::{
    EventId, EventSource, EventType, PLD_SCHEMA_VERSION, PLDEvent, PhaseRequirement, PldBlock,
    RuntimeBlock, SessionId, UxBlock,
};
use crate::taxonomy::{Phase, TaxonomyRegistry};
use crate::validator::{ValidationMode, Validator, Violation};

/// Internal signal identifiers. Runtime-local; the mapping into lifecycle
/// semantics lives in [`signal_mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    // Drift detection
    InstructionDrift,
    ContextDrift,
    RepeatedPlan,
    ToolError,
    // Repair / mitigation
    Clarification,
    SoftRepair,
    Rewrite,
    RequestUserClarification,
    HardReset,
    // Reentry checkpoint
    Reentry,
    // Nominal flow
    ContinueNormal,
    ContinueUserTurn,
    ContinueSystemTurn,
    // Lifecycle closure
    SessionClosed,
    // Escalation control
    Failover,
    // Observability
    LatencySpike,
    PauseDetected,
    // Derived metrics
    MetricPrdr,
    MetricVrl,
    MetricFr,
    // Generic diagnostics
    Info,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstructionDrift => "instruction_drift",
            Self::ContextDrift => "context_drift",
            Self::RepeatedPlan => "repeated_plan",
            Self::ToolError => "tool_error",
            Self::Clarification => "clarification",
            Self::SoftRepair => "soft_repair",
            Self::Rewrite => "rewrite",
            Self::RequestUserClarification => "request_user_clarification",
            Self::HardReset => "hard_reset",
            Self::Reentry => "reentry",
            Self::ContinueNormal => "continue_normal",
            Self::ContinueUserTurn => "continue_user_turn",
            Self::ContinueSystemTurn => "continue_system_turn",
            Self::SessionClosed => "session_closed",
            Self::Failover => "failover",
            Self::LatencySpike => "latency_spike",
            Self::PauseDetected => "pause_detected",
            Self::MetricPrdr => "metric_prdr",
            Self::MetricVrl => "metric_vrl",
            Self::MetricFr => "metric_fr",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request to emit an event. Ephemeral: consumed by the bridge, never
/// persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSignal {
    pub kind: SignalKind,
    pub payload: serde_json::Value,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub user_visible: bool,
}

impl RuntimeSignal {
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Object(serde_json::Map::new()),
            confidence: None,
            metadata: None,
            user_visible: false,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn visible(mut self) -> Self {
        self.user_visible = true;
        self
    }
}

/// Per-turn emission context supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub session_id: SessionId,
    pub turn_sequence: u32,
    pub source: EventSource,
    pub model: Option<String>,
    pub tool: Option<String>,
    pub agent_state: Option<String>,
    pub current_phase: Option<Phase>,
}

impl EventContext {
    pub fn new(session_id: impl Into<SessionId>, turn_sequence: u32, source: EventSource) -> Self {
        Self {
            session_id: session_id.into(),
            turn_sequence,
            source,
            model: None,
            tool: None,
            agent_state: None,
            current_phase: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_current_phase(mut self, phase: Phase) -> Self {
        self.current_phase = Some(phase);
        self
    }
}

/// Resolved lifecycle semantics for a signal kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalMapping {
    pub event_type: EventType,
    pub code: &'static str,
    pub default_confidence: Option<f64>,
}

/// Static signal → semantics table. Codes carry the taxonomy prefix the
/// registry resolves the phase from.
pub fn signal_mapping(kind: SignalKind) -> Option<SignalMapping> {
    use EventType::*;
    use SignalKind as K;

    let mapping = match kind {
        K::InstructionDrift => SignalMapping {
            event_type: DriftDetected,
            code: "D1_instruction",
            default_confidence: Some(0.9),
        },
        K::ContextDrift => SignalMapping {
            event_type: DriftDetected,
            code: "D2_context",
            default_confidence: Some(0.9),
        },
        K::RepeatedPlan => SignalMapping {
            event_type: DriftDetected,
            code: "D3_repeated_plan",
            default_confidence: Some(0.9),
        },
        K::ToolError => SignalMapping {
            event_type: DriftDetected,
            code: "D4_tool_error",
            default_confidence: Some(0.9),
        },
        K::Clarification => SignalMapping {
            event_type: RepairTriggered,
            code: "R1_clarify",
            default_confidence: Some(0.9),
        },
        K::SoftRepair => SignalMapping {
            event_type: RepairTriggered,
            code: "R2_soft_repair",
            default_confidence: Some(0.9),
        },
        K::Rewrite => SignalMapping {
            event_type: RepairTriggered,
            code: "R3_rewrite",
            default_confidence: Some(0.9),
        },
        K::RequestUserClarification => SignalMapping {
            event_type: RepairTriggered,
            code: "R4_request_clarification",
            default_confidence: Some(0.9),
        },
        K::HardReset => SignalMapping {
            event_type: RepairTriggered,
            code: "R5_hard_reset",
            default_confidence: Some(0.9),
        },
        K::Reentry => SignalMapping {
            event_type: ReentryObserved,
            code: "RE1_checkpoint",
            default_confidence: Some(0.8),
        },
        K::ContinueNormal => SignalMapping {
            event_type: ContinueAllowed,
            code: "C0_normal",
            default_confidence: None,
        },
        K::ContinueUserTurn => SignalMapping {
            event_type: ContinueAllowed,
            code: "C0_user_turn",
            default_confidence: None,
        },
        K::ContinueSystemTurn => SignalMapping {
            event_type: ContinueAllowed,
            code: "C0_system_turn",
            default_confidence: None,
        },
        K::SessionClosed => SignalMapping {
            event_type: SessionClosed,
            code: "O0_session_closed",
            default_confidence: None,
        },
        K::Failover => SignalMapping {
            event_type: FailoverTriggered,
            code: "F1_escalation",
            default_confidence: None,
        },
        K::LatencySpike => SignalMapping {
            event_type: LatencySpike,
            code: "INFO_latency_spike",
            default_confidence: None,
        },
        K::PauseDetected => SignalMapping {
            event_type: PauseDetected,
            code: "INFO_pause_detected",
            default_confidence: None,
        },
        K::MetricPrdr => SignalMapping {
            event_type: Info,
            code: "M1_PRDR",
            default_confidence: None,
        },
        K::MetricVrl => SignalMapping {
            event_type: Info,
            code: "M2_VRL",
            default_confidence: None,
        },
        K::MetricFr => SignalMapping {
            event_type: Info,
            code: "M3_FR",
            default_confidence: None,
        },
        K::Info => SignalMapping {
            event_type: Info,
            code: "INFO_generic",
            default_confidence: None,
        },
    };
    Some(mapping)
}

/// A built event together with any non-fatal warnings surfaced on the way.
#[derive(Debug, Clone)]
pub struct BuiltEvent {
    pub event: PLDEvent,
    pub warnings: Vec<Violation>,
}

impl BuiltEvent {
    pub fn into_event(self) -> PLDEvent {
        self.event
    }
}

pub struct SignalBridge {
    registry: Arc<TaxonomyRegistry>,
    validator: Validator,
    mode: ValidationMode,
    last_turns: DashMap<SessionId, u32>,
}

impl SignalBridge {
    pub fn new(registry: Arc<TaxonomyRegistry>, mode: ValidationMode) -> Self {
        let validator = Validator::new(Arc::clone(&registry));
        Self {
            registry,
            validator,
            mode,
            last_turns: DashMap::new(),
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Build a schema-valid event from a signal and its context.
    ///
    /// Fails with `UnmappableSignal` for a kind without a table entry, with
    /// `TurnRegression` when the context's turn_sequence does not advance
    /// past the session's last observed value (warn mode downgrades the
    /// regression to a warning), and with `EventRejected` when the candidate
    /// does not survive validation.
    pub fn build_event(&self, signal: &RuntimeSignal, context: &EventContext) -> Result<BuiltEvent> {
        self.build_event_at(signal, context, Utc::now())
    }

    /// Variant with an explicit occurrence timestamp (replay paths).
    pub fn build_event_at(
        &self,
        signal: &RuntimeSignal,
        context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Result<BuiltEvent> {
        let mapping = signal_mapping(signal.kind)
            .ok_or_else(|| PldError::UnmappableSignal(signal.kind.to_string()))?;

        let mut warnings = Vec::new();
        if let Some(last) = self.last_turns.get(&context.session_id).map(|e| *e.value())
            && context.turn_sequence <= last
        {
            if self.mode == ValidationMode::Warn {
                warn!(
                    session_id = %context.session_id,
                    turn_sequence = context.turn_sequence,
                    last,
                    "turn_sequence did not advance"
                );
                warnings.push(Violation::should(
                    "turn_sequence_regression",
                    "turn_sequence",
                    format!(
                        "turn_sequence {} <= last observed {}",
                        context.turn_sequence, last
                    ),
                ));
            } else {
                return Err(PldError::TurnRegression {
                    session_id: context.session_id.to_string(),
                    turn_sequence: context.turn_sequence,
                    last,
                });
            }
        }

        let phase = self.resolve_phase(&mapping, context)?;
        let event = PLDEvent {
            schema_version: PLD_SCHEMA_VERSION.to_string(),
            event_id: EventId::new(),
            timestamp,
            session_id: context.session_id.clone(),
            turn_sequence: context.turn_sequence,
            turn_id: None,
            source: context.source,
            event_type: mapping.event_type,
            pld: PldBlock {
                phase,
                code: mapping.code.to_string(),
                confidence: signal.confidence.or(mapping.default_confidence),
                metadata: signal.metadata.clone(),
            },
            payload: signal.payload.clone(),
            runtime: Some(RuntimeBlock {
                turn_sequence: Some(context.turn_sequence),
                model: context.model.clone(),
                tool: context.tool.clone(),
                agent_state: context.agent_state.clone(),
                extra: serde_json::Map::new(),
            }),
            ux: UxBlock {
                user_visible_state_change: signal.user_visible,
            },
            metrics: None,
            extensions: None,
        };

        let result = self.validator.validate(&event, self.mode);
        if !result.is_valid {
            return Err(PldError::EventRejected {
                violations: result.violations,
            });
        }
        warnings.extend(result.warnings);
        let event = result.normalized.unwrap_or(event);

        self.last_turns
            .entry(context.session_id.clone())
            .and_modify(|last| *last = (*last).max(context.turn_sequence))
            .or_insert(context.turn_sequence);

        debug!(
            session_id = %event.session_id,
            event_type = %event.event_type,
            code = %event.pld.code,
            turn_sequence = event.turn_sequence,
            "event built"
        );

        Ok(BuiltEvent { event, warnings })
    }

    /// Drop monotonicity tracking for a closed session.
    pub fn forget_session(&self, session_id: &SessionId) {
        self.last_turns.remove(session_id);
    }

    fn resolve_phase(&self, mapping: &SignalMapping, context: &EventContext) -> Result<Phase> {
        let from_code = self.registry.resolve_phase(mapping.code)?;

        // MAY-level event types can inherit the caller's current phase, but
        // the prefix rule still binds: a hint that contradicts the code's
        // taxonomy family would make the event invalid, so it is dropped.
        if mapping.event_type.phase_requirement() == PhaseRequirement::May
            && let Some(hint) = context.current_phase
        {
            if hint == from_code {
                return Ok(hint);
            }
            debug!(
                code = mapping.code,
                hint = %hint,
                "phase hint inconsistent with code prefix, ignored"
            );
        }

        Ok(from_code)
    }
}
