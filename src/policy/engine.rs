//! Per-session lifecycle policy: drift triggers repair, repair escalates
//! through tiers, exhaustion fails over. The engine consumes validated
//! events in turn order and never corrupts session state on a bad input —
//! anomalies are surfaced as violations on the decision instead.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::machine::{LifecycleState, RepairTier};
use crate::bridge::{RuntimeSignal, SignalKind};
use crate::config::PolicyConfig;
use crate::event::{EventType, PLDEvent, SessionId};

/// Mutable per-session record. Created on the first event for a session id
/// and discarded on closure or cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub state: LifecycleState,
    pub soft_attempts: u32,
    pub directed_attempts: u32,
    pub hard_attempts: u32,
    pub total_attempts: u32,
    /// Lowest tier the next repair may enter; recurrences raise it so an
    /// already-exhausted tier is not repeated.
    pub tier_floor: RepairTier,
    pub last_drift_turn: Option<u32>,
    pub reentry_turn: Option<u32>,
    pub reentry_confidence: f64,
    pub consecutive_reentry_failures: u32,
    pub last_turn_sequence: Option<u32>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            state: LifecycleState::Stable,
            soft_attempts: 0,
            directed_attempts: 0,
            hard_attempts: 0,
            total_attempts: 0,
            tier_floor: RepairTier::Soft,
            last_drift_turn: None,
            reentry_turn: None,
            reentry_confidence: 0.0,
            consecutive_reentry_failures: 0,
            last_turn_sequence: None,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn attempts(&self, tier: RepairTier) -> u32 {
        match tier {
            RepairTier::Soft => self.soft_attempts,
            RepairTier::Directed => self.directed_attempts,
            RepairTier::Hard => self.hard_attempts,
        }
    }

    fn record_attempt(&mut self, tier: RepairTier) {
        match tier {
            RepairTier::Soft => self.soft_attempts += 1,
            RepairTier::Directed => self.directed_attempts += 1,
            RepairTier::Hard => self.hard_attempts += 1,
        }
        self.total_attempts += 1;
    }

    fn highest_used_tier(&self) -> Option<RepairTier> {
        if self.hard_attempts > 0 {
            Some(RepairTier::Hard)
        } else if self.directed_attempts > 0 {
            Some(RepairTier::Directed)
        } else if self.soft_attempts > 0 {
            Some(RepairTier::Soft)
        } else {
            None
        }
    }

    /// Full reset after a confirmed recovery to stable.
    fn reset_ladder(&mut self) {
        self.soft_attempts = 0;
        self.directed_attempts = 0;
        self.hard_attempts = 0;
        self.total_attempts = 0;
        self.tier_floor = RepairTier::Soft;
        self.reentry_confidence = 0.0;
        self.reentry_turn = None;
        self.consecutive_reentry_failures = 0;
    }

    fn accumulate_reentry(&mut self, event: &PLDEvent) {
        let confidence = event.pld.confidence.unwrap_or(0.5);
        self.reentry_confidence = (self.reentry_confidence + confidence).min(1.0);
        self.reentry_turn = Some(event.turn_sequence);
    }
}

/// A state-machine anomaly: the event was valid in isolation but
/// inconsistent with the session's current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule: String,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Outcome of applying one event to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub session_id: SessionId,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub reason: String,
    /// Whether the event advanced session state. Violating events leave the
    /// session in its last known-good state.
    pub applied: bool,
    pub violations: Vec<PolicyViolation>,
    /// Control signal the engine wants emitted on its behalf (through the
    /// bridge), e.g. a failover when the repair budget runs out.
    pub emit: Option<RuntimeSignal>,
    /// Set on accepted-but-unusual paths an operator should audit, such as
    /// reentry observed without a preceding repair.
    pub flagged_for_review: bool,
}

/// Lifecycle policy engine. Sessions are independent; each is driven
/// strictly in turn_sequence order.
pub struct PolicyEngine {
    config: PolicyConfig,
    sessions: HashMap<SessionId, SessionState>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Discard a session's state without flushing, e.g. on cancellation.
    pub fn remove_session(&mut self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.remove(session_id)
    }

    /// Apply one validated event. Never panics and never corrupts state:
    /// inconsistent events come back with `applied = false` and violations.
    pub fn apply(&mut self, event: &PLDEvent) -> PolicyDecision {
        let session = self
            .sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| SessionState::new(event.session_id.clone()));
        let decision = apply_to_session(&self.config, session, event);

        for violation in &decision.violations {
            warn!(
                session_id = %decision.session_id,
                rule = %violation.rule,
                state = %decision.from,
                event_type = %event.event_type,
                "state machine violation"
            );
        }
        if decision.from != decision.to {
            debug!(
                session_id = %decision.session_id,
                from = %decision.from,
                to = %decision.to,
                reason = %decision.reason,
                "lifecycle transition"
            );
        }
        decision
    }
}

fn apply_to_session(
    config: &PolicyConfig,
    session: &mut SessionState,
    event: &PLDEvent,
) -> PolicyDecision {
    let from = session.state;
    let mut violations = Vec::new();
    let mut emit = None;
    let mut flagged = false;
    let mut applied = true;

    // Ordering gate: stale turns are refused, never applied.
    if let Some(last) = session.last_turn_sequence
        && event.turn_sequence <= last
    {
        violations.push(PolicyViolation::new(
            "out_of_order",
            format!(
                "turn_sequence {} <= last accepted {}",
                event.turn_sequence, last
            ),
        ));
        return PolicyDecision {
            session_id: session.session_id.clone(),
            from,
            to: from,
            reason: "out_of_order".into(),
            applied: false,
            violations,
            emit: None,
            flagged_for_review: false,
        };
    }

    // A reentry window that elapsed without recurrence settles to stable
    // before the new event is considered.
    if session.state == LifecycleState::ReentryPending
        && let Some(reentry_turn) = session.reentry_turn
        && event.turn_sequence > reentry_turn + config.prdr_window_turns
        && session.reentry_confidence >= config.min_reentry_confidence
    {
        session.state = LifecycleState::Stable;
        session.reset_ladder();
        debug!(session_id = %session.session_id, "reentry window elapsed, session stable");
    }

    let reason: String = if event.event_type == EventType::SessionClosed {
        session.state = LifecycleState::Closed;
        "session_terminated".into()
    } else if session.state == LifecycleState::Closed {
        if event.event_type.is_observability() {
            "observability_after_closure".into()
        } else {
            violations.push(PolicyViolation::new(
                "lifecycle_after_closure",
                "lifecycle event after terminal session_closed",
            ));
            applied = false;
            "lifecycle_after_closure".into()
        }
    } else if event.event_type.is_drift() {
        on_drift(session, event, &mut violations, &mut emit, &mut applied).into()
    } else if event.event_type.is_repair() {
        on_repair(config, session, &mut violations, &mut emit, &mut applied).into()
    } else {
        match event.event_type {
            EventType::ReentryObserved => {
                on_reentry(session, event, &mut violations, &mut flagged, &mut applied).into()
            }
            EventType::ContinueAllowed => on_continue(config, session).into(),
            EventType::ContinueBlocked => "continue_blocked".into(),
            EventType::FailoverTriggered => {
                if session.state == LifecycleState::Failover {
                    "failover_already_active".into()
                } else {
                    session.state = LifecycleState::Failover;
                    info!(session_id = %session.session_id, "failover active");
                    "failover_active".into()
                }
            }
            _ => "observed".into(),
        }
    };

    if applied {
        session.last_turn_sequence = Some(event.turn_sequence);
        session.updated_at = Utc::now();
    }

    PolicyDecision {
        session_id: session.session_id.clone(),
        from,
        to: session.state,
        reason,
        applied,
        violations,
        emit,
        flagged_for_review: flagged,
    }
}

fn on_drift(
    session: &mut SessionState,
    event: &PLDEvent,
    violations: &mut Vec<PolicyViolation>,
    emit: &mut Option<RuntimeSignal>,
    applied: &mut bool,
) -> &'static str {
    match session.state {
        LifecycleState::Failover => {
            violations.push(PolicyViolation::new(
                "drift_after_failover",
                "drift may not follow failover without a recovery path",
            ));
            *applied = false;
            "failover_violation"
        }
        LifecycleState::ReentryPending => {
            // Recurrence: the repair did not hold. The next repair enters
            // the tier after the highest one already spent.
            session.consecutive_reentry_failures += 1;
            session.reentry_confidence = 0.0;
            session.reentry_turn = None;
            session.last_drift_turn = Some(event.turn_sequence);
            if let Some(used) = session.highest_used_tier() {
                session.tier_floor = used.next().unwrap_or(RepairTier::Hard);
            }
            if session.consecutive_reentry_failures >= 2 {
                enter_failover(session, emit, "reentry_exhausted");
                "reentry_exhausted"
            } else {
                session.state = LifecycleState::DriftDetected;
                "drift_recurrence"
            }
        }
        _ => {
            session.state = LifecycleState::DriftDetected;
            session.last_drift_turn = Some(event.turn_sequence);
            "drift_detected"
        }
    }
}

fn on_repair(
    config: &PolicyConfig,
    session: &mut SessionState,
    violations: &mut Vec<PolicyViolation>,
    emit: &mut Option<RuntimeSignal>,
    applied: &mut bool,
) -> &'static str {
    match session.state {
        LifecycleState::Failover => {
            violations.push(PolicyViolation::new(
                "repair_after_failover",
                "repair may not follow failover without a recovery path",
            ));
            *applied = false;
            "failover_violation"
        }
        LifecycleState::Stable => {
            violations.push(PolicyViolation::new(
                "repair_without_drift",
                "repair_triggered with no preceding drift",
            ));
            *applied = false;
            "unexpected_repair"
        }
        LifecycleState::ReentryPending => {
            violations.push(PolicyViolation::new(
                "repair_during_reentry",
                "repair_triggered while a reentry checkpoint is pending",
            ));
            *applied = false;
            "unexpected_repair"
        }
        _ => match select_tier(config, session) {
            Some(tier) => {
                session.record_attempt(tier);
                session.state = tier.state();
                if session.total_attempts >= config.failover_mrbf_ceiling {
                    enter_failover(session, emit, "repair_budget_exhausted");
                    "repair_budget_exhausted"
                } else {
                    match tier {
                        RepairTier::Soft => "repair_soft",
                        RepairTier::Directed => "repair_directed",
                        RepairTier::Hard => "repair_hard",
                    }
                }
            }
            None => {
                enter_failover(session, emit, "repair_budget_exhausted");
                "repair_budget_exhausted"
            }
        },
    }
}

fn on_reentry(
    session: &mut SessionState,
    event: &PLDEvent,
    violations: &mut Vec<PolicyViolation>,
    flagged: &mut bool,
    applied: &mut bool,
) -> &'static str {
    match session.state {
        LifecycleState::Stable => {
            violations.push(PolicyViolation::new(
                "unexpected_reentry",
                "reentry_observed with no prior drift or repair",
            ));
            *applied = false;
            "unexpected_reentry"
        }
        LifecycleState::Failover => {
            session.accumulate_reentry(event);
            session.state = LifecycleState::ReentryPending;
            "failover_recovered_via_reentry"
        }
        LifecycleState::DriftDetected => {
            // Documented-but-ambiguous pattern: reentry straight from
            // drift. Accepted, surfaced for operator review.
            session.accumulate_reentry(event);
            session.state = LifecycleState::ReentryPending;
            *flagged = true;
            "reentry_without_repair"
        }
        LifecycleState::ReentryPending => {
            session.accumulate_reentry(event);
            "reentry_reinforced"
        }
        _ => {
            session.accumulate_reentry(event);
            session.state = LifecycleState::ReentryPending;
            "reentry_observed"
        }
    }
}

fn on_continue(config: &PolicyConfig, session: &mut SessionState) -> &'static str {
    match session.state {
        LifecycleState::ReentryPending => {
            if session.reentry_confidence >= config.min_reentry_confidence {
                session.state = LifecycleState::Stable;
                session.reset_ladder();
                "reentry_confirmed"
            } else {
                "reentry_confidence_below_threshold"
            }
        }
        LifecycleState::Failover => {
            session.state = LifecycleState::Stable;
            session.reset_ladder();
            "failover_recovered_via_continue"
        }
        LifecycleState::DriftDetected => {
            session.state = LifecycleState::Stable;
            session.reset_ladder();
            "drift_resolved_without_repair"
        }
        state if state.is_repair() => {
            session.state = LifecycleState::Stable;
            session.reset_ladder();
            "repair_resolved_via_continue"
        }
        _ => "continue",
    }
}

/// Pick the tier for the next repair attempt: the lowest tier at or above
/// the floor with budget remaining.
fn select_tier(config: &PolicyConfig, session: &SessionState) -> Option<RepairTier> {
    [RepairTier::Soft, RepairTier::Directed, RepairTier::Hard]
        .into_iter()
        .filter(|tier| *tier >= session.tier_floor)
        .find(|tier| session.attempts(*tier) < config.tier_budget(*tier))
}

fn enter_failover(session: &mut SessionState, emit: &mut Option<RuntimeSignal>, cause: &str) {
    session.state = LifecycleState::Failover;
    *emit = Some(
        RuntimeSignal::new(SignalKind::Failover).with_payload(serde_json::json!({
            "cause": cause,
            "total_attempts": session.total_attempts,
        })),
    );
    info!(
        session_id = %session.session_id,
        cause,
        total_attempts = session.total_attempts,
        "entering failover"
    );
}
