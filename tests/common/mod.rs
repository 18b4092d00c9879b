#![allow(dead_code)]

use chrono::Utc;
use pld_runtime::{
    EventId, EventSource, EventType, PLD_SCHEMA_VERSION, PLDEvent, Phase, PldBlock, UxBlock,
};

pub fn lifecycle_event(
    session: &str,
    turn: u32,
    event_type: EventType,
    phase: Phase,
    code: &str,
) -> PLDEvent {
    PLDEvent {
        schema_version: PLD_SCHEMA_VERSION.to_string(),
        event_id: EventId::new(),
        timestamp: Utc::now(),
        session_id: session.into(),
        turn_sequence: turn,
        turn_id: None,
        source: EventSource::Detector,
        event_type,
        pld: PldBlock::new(phase, code),
        payload: serde_json::json!({}),
        runtime: None,
        ux: UxBlock::default(),
        metrics: None,
        extensions: None,
    }
}

pub fn drift(session: &str, turn: u32) -> PLDEvent {
    lifecycle_event(session, turn, EventType::DriftDetected, Phase::Drift, "D1_instruction")
}

pub fn repair(session: &str, turn: u32) -> PLDEvent {
    lifecycle_event(session, turn, EventType::RepairTriggered, Phase::Repair, "R2_soft_repair")
}

pub fn reentry(session: &str, turn: u32, confidence: f64) -> PLDEvent {
    let mut event = lifecycle_event(
        session,
        turn,
        EventType::ReentryObserved,
        Phase::Reentry,
        "RE1_checkpoint",
    );
    event.pld.confidence = Some(confidence);
    event
}

pub fn continue_allowed(session: &str, turn: u32) -> PLDEvent {
    lifecycle_event(session, turn, EventType::ContinueAllowed, Phase::Continue, "C0_normal")
}

pub fn failover(session: &str, turn: u32) -> PLDEvent {
    lifecycle_event(
        session,
        turn,
        EventType::FailoverTriggered,
        Phase::Failover,
        "F1_escalation",
    )
}

pub fn session_closed(session: &str, turn: u32) -> PLDEvent {
    lifecycle_event(
        session,
        turn,
        EventType::SessionClosed,
        Phase::Outcome,
        "O0_session_closed",
    )
}

pub fn metric_info(session: &str, turn: u32, code: &str) -> PLDEvent {
    lifecycle_event(session, turn, EventType::Info, Phase::None, code)
}
