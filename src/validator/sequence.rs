//! Stream-level ordering rules, evaluated per session over an already
//! structurally valid event list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{EventType, PLDEvent, SessionId};
use crate::taxonomy::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceViolation {
    pub rule: String,
    pub severity: SequenceSeverity,
    pub message: String,
    pub turn_sequence: Option<u32>,
    pub event_type: Option<EventType>,
}

impl SequenceViolation {
    fn error(rule: &str, message: impl Into<String>, event: Option<&PLDEvent>) -> Self {
        Self {
            rule: rule.into(),
            severity: SequenceSeverity::Error,
            message: message.into(),
            turn_sequence: event.map(|e| e.turn_sequence),
            event_type: event.map(|e| e.event_type),
        }
    }

    fn warning(rule: &str, message: impl Into<String>, event: Option<&PLDEvent>) -> Self {
        Self {
            rule: rule.into(),
            severity: SequenceSeverity::Warning,
            message: message.into(),
            turn_sequence: event.map(|e| e.turn_sequence),
            event_type: event.map(|e| e.event_type),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub session_id: SessionId,
    pub is_valid: bool,
    pub violations: Vec<SequenceViolation>,
}

/// Events after a failover that may legitimately resolve it.
const RECOVERY_EVENT_TYPES: [EventType; 3] = [
    EventType::ReentryObserved,
    EventType::ContinueAllowed,
    EventType::SessionClosed,
];

/// Evaluate ordering rules for a mixed-session event list. Events are
/// grouped by session in arrival order; a report is produced per session.
pub fn validate_sequence(events: &[PLDEvent]) -> Vec<SequenceReport> {
    let mut by_session: HashMap<SessionId, Vec<&PLDEvent>> = HashMap::new();
    let mut order: Vec<SessionId> = Vec::new();

    for event in events {
        let entry = by_session.entry(event.session_id.clone()).or_default();
        if entry.is_empty() {
            order.push(event.session_id.clone());
        }
        entry.push(event);
    }

    order
        .into_iter()
        .map(|session_id| {
            let session_events = &by_session[&session_id];
            let mut violations = Vec::new();
            check_monotonicity(session_events, &mut violations);
            check_closure_terminal(session_events, &mut violations);
            check_failover_recovery(session_events, &mut violations);

            let is_valid = !violations
                .iter()
                .any(|v| v.severity == SequenceSeverity::Error);
            SequenceReport {
                session_id,
                is_valid,
                violations,
            }
        })
        .collect()
}

fn check_monotonicity(events: &[&PLDEvent], violations: &mut Vec<SequenceViolation>) {
    let mut last: Option<u32> = None;
    for &event in events {
        if let Some(prev) = last
            && event.turn_sequence <= prev
        {
            violations.push(SequenceViolation::error(
                "turn_sequence_not_increasing",
                format!(
                    "turn_sequence {} follows {} within the session",
                    event.turn_sequence, prev
                ),
                Some(event),
            ));
        }
        last = Some(event.turn_sequence);
    }
}

fn check_closure_terminal(events: &[&PLDEvent], violations: &mut Vec<SequenceViolation>) {
    let closures: Vec<&PLDEvent> = events
        .iter()
        .copied()
        .filter(|e| e.event_type == EventType::SessionClosed)
        .collect();

    if closures.len() > 1 {
        violations.push(SequenceViolation::error(
            "duplicate_session_closed",
            format!("{} session_closed events; closure must be unique", closures.len()),
            None,
        ));
    }

    let Some(closure_turn) = closures.first().map(|e| e.turn_sequence) else {
        return;
    };

    for &event in events {
        if event.turn_sequence <= closure_turn {
            continue;
        }
        if is_observability(event) {
            violations.push(SequenceViolation::warning(
                "observability_after_closure",
                "observability event after session_closed",
                Some(event),
            ));
        } else {
            violations.push(SequenceViolation::error(
                "lifecycle_after_closure",
                "lifecycle event after terminal session_closed",
                Some(event),
            ));
        }
    }
}

fn check_failover_recovery(events: &[&PLDEvent], violations: &mut Vec<SequenceViolation>) {
    let mut sorted: Vec<&PLDEvent> = events.to_vec();
    sorted.sort_by_key(|e| e.turn_sequence);

    for (pos, &event) in sorted.iter().enumerate() {
        if event.event_type != EventType::FailoverTriggered {
            continue;
        }

        let next = sorted[pos + 1..]
            .iter()
            .copied()
            .find(|candidate| !is_observability(candidate));

        match next {
            None => violations.push(SequenceViolation::warning(
                "failover_without_recovery",
                "no lifecycle recovery event after failover_triggered",
                Some(event),
            )),
            Some(recovery) if !RECOVERY_EVENT_TYPES.contains(&recovery.event_type) => {
                violations.push(SequenceViolation::error(
                    "invalid_failover_recovery",
                    format!(
                        "{} follows failover_triggered; expected a recovery-path event",
                        recovery.event_type
                    ),
                    Some(recovery),
                ));
            }
            Some(_) => {}
        }
    }
}

fn is_observability(event: &PLDEvent) -> bool {
    if event.event_type.is_observability() {
        return true;
    }
    // fallback_executed counts as observability only outside failover context.
    event.event_type == EventType::FallbackExecuted
        && matches!(
            event.pld.phase,
            Phase::None | Phase::Continue | Phase::Reentry | Phase::Outcome
        )
}
