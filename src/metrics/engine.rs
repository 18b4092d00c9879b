//! Derived-metric computation over validated, ordered event sequences.
//!
//! Metric outputs are re-emitted as `info`/`none` events with `M`-prefixed
//! codes; those codes are statically excluded from every source query here,
//! so a derived metric can never feed another metric computation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::{RuntimeSignal, SignalKind};
use crate::config::MetricsConfig;
use crate::event::{EventType, PLDEvent, SessionId};
use crate::taxonomy::{RegistryStatus, TaxonomyRegistry};

const METRIC_CODE_PREFIX: &str = "M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricName {
    Prdr,
    Vrl,
    Fr,
}

impl MetricName {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Prdr => "M1_PRDR",
            Self::Vrl => "M2_VRL",
            Self::Fr => "M3_FR",
        }
    }

    pub fn signal_kind(&self) -> SignalKind {
        match self {
            Self::Prdr => SignalKind::MetricPrdr,
            Self::Vrl => SignalKind::MetricVrl,
            Self::Fr => SignalKind::MetricFr,
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prdr => "PRDR",
            Self::Vrl => "VRL",
            Self::Fr => "FR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricScope {
    Session { session_id: SessionId },
    Cohort { sessions: usize },
}

/// The ordered span of source events a metric was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub first_turn: u32,
    pub last_turn: u32,
    pub event_count: usize,
}

/// A computed metric value. Never eligible as input to another metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricRecord {
    pub metric: MetricName,
    pub scope: MetricScope,
    pub value: f64,
    pub span: SourceSpan,
    /// Share of source events carrying a provisional taxonomy code.
    /// Reporting confidence only; never affects the value.
    pub provisional_share: f64,
    pub computed_at: DateTime<Utc>,
}

impl DerivedMetricRecord {
    /// Route this record back through the bridge as an `info`/`none` event.
    pub fn to_signal(&self) -> RuntimeSignal {
        RuntimeSignal::new(self.metric.signal_kind())
            .with_payload(serde_json::to_value(self).unwrap_or_default())
    }
}

/// One drift → (0+ repairs) → recovery span within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrlCycle {
    pub drift_turn: u32,
    pub recovery_turn: Option<u32>,
    /// Inclusive turn span from drift to recovery; `None` when unrecovered
    /// or past the configured cutoff.
    pub turns: Option<u32>,
    pub elapsed_ms: Option<i64>,
    pub repairs: u32,
}

impl VrlCycle {
    pub fn recovered(&self) -> bool {
        self.turns.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrlReport {
    pub session_id: SessionId,
    pub cycles: Vec<VrlCycle>,
    pub mean_turns: Option<f64>,
    pub unrecovered: usize,
}

pub struct MetricsEngine {
    registry: Arc<TaxonomyRegistry>,
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(registry: Arc<TaxonomyRegistry>, config: MetricsConfig) -> Self {
        Self { registry, config }
    }

    /// Source filter applied to every metric query: order by turn and drop
    /// `M`-prefixed (derived) events.
    fn eligible<'a>(&self, events: &'a [PLDEvent]) -> Vec<&'a PLDEvent> {
        let mut eligible: Vec<&PLDEvent> = events
            .iter()
            .filter(|e| {
                TaxonomyRegistry::extract_prefix(&e.pld.code) != Some(METRIC_CODE_PREFIX)
            })
            .collect();
        eligible.sort_by_key(|e| e.turn_sequence);
        eligible
    }

    /// Post-Repair Drift Recurrence across a cohort of sessions, as a
    /// percentage. `None` when no session contains a repair (vacuous).
    pub fn prdr(&self, sessions: &[Vec<PLDEvent>]) -> Option<DerivedMetricRecord> {
        let mut with_repair = 0usize;
        let mut with_recurrence = 0usize;
        let mut sources: Vec<&PLDEvent> = Vec::new();

        for session in sessions {
            let events = self.eligible(session);
            let first_repair = events
                .iter()
                .find(|e| e.event_type == EventType::RepairTriggered)
                .map(|e| e.turn_sequence);

            if let Some(repair_turn) = first_repair {
                with_repair += 1;
                if events
                    .iter()
                    .any(|e| e.event_type.is_drift() && e.turn_sequence > repair_turn)
                {
                    with_recurrence += 1;
                }
            }
            sources.extend(events);
        }

        if with_repair == 0 {
            debug!("no sessions with repair; PRDR undefined");
            return None;
        }

        let value = with_recurrence as f64 / with_repair as f64 * 100.0;
        Some(self.record(
            MetricName::Prdr,
            MetricScope::Cohort {
                sessions: sessions.len(),
            },
            value,
            &sources,
        ))
    }

    /// Recovery-latency cycles for one session. Recovery is the first
    /// reentry or continue event after a drift; the span is counted
    /// inclusively in turns.
    pub fn vrl(&self, session_id: &SessionId, events: &[PLDEvent]) -> VrlReport {
        let eligible = self.eligible(events);
        let mut cycles = Vec::new();
        let mut open: Option<(u32, DateTime<Utc>, u32)> = None;

        for event in &eligible {
            if event.event_type.is_drift() {
                if open.is_none() {
                    open = Some((event.turn_sequence, event.timestamp, 0));
                }
            } else if event.event_type.is_repair() {
                if let Some((_, _, repairs)) = open.as_mut() {
                    *repairs += 1;
                }
            } else if matches!(
                event.event_type,
                EventType::ReentryObserved | EventType::ContinueAllowed
            ) && let Some((drift_turn, drift_at, repairs)) = open.take()
            {
                let span = event.turn_sequence - drift_turn + 1;
                let within_cutoff =
                    self.config.vrl_cutoff_turns == 0 || span <= self.config.vrl_cutoff_turns;
                if within_cutoff {
                    cycles.push(VrlCycle {
                        drift_turn,
                        recovery_turn: Some(event.turn_sequence),
                        turns: Some(span),
                        elapsed_ms: Some((event.timestamp - drift_at).num_milliseconds()),
                        repairs,
                    });
                } else {
                    cycles.push(VrlCycle {
                        drift_turn,
                        recovery_turn: None,
                        turns: None,
                        elapsed_ms: None,
                        repairs,
                    });
                }
            }
        }

        if let Some((drift_turn, _, repairs)) = open {
            cycles.push(VrlCycle {
                drift_turn,
                recovery_turn: None,
                turns: None,
                elapsed_ms: None,
                repairs,
            });
        }

        let recovered: Vec<u32> = cycles.iter().filter_map(|c| c.turns).collect();
        let mean_turns = if recovered.is_empty() {
            None
        } else {
            Some(recovered.iter().sum::<u32>() as f64 / recovered.len() as f64)
        };
        let unrecovered = cycles.iter().filter(|c| !c.recovered()).count();

        VrlReport {
            session_id: session_id.clone(),
            cycles,
            mean_turns,
            unrecovered,
        }
    }

    /// Mean recovery latency for a session as a metric record. `None` when
    /// no cycle recovered (vacuous).
    pub fn vrl_record(
        &self,
        session_id: &SessionId,
        events: &[PLDEvent],
    ) -> Option<DerivedMetricRecord> {
        let report = self.vrl(session_id, events);
        let value = report.mean_turns?;
        let sources = self.eligible(events);
        Some(self.record(
            MetricName::Vrl,
            MetricScope::Session {
                session_id: session_id.clone(),
            },
            value,
            &sources,
        ))
    }

    /// Failover recurrence: failovers per lifecycle event in the scope.
    /// `None` when the scope contains no lifecycle events (vacuous).
    pub fn fr(&self, scope: MetricScope, events: &[PLDEvent]) -> Option<DerivedMetricRecord> {
        let eligible = self.eligible(events);
        let lifecycle_count = eligible
            .iter()
            .filter(|e| e.pld.phase.is_lifecycle())
            .count();
        if lifecycle_count == 0 {
            debug!("no lifecycle events in scope; FR undefined");
            return None;
        }
        let failovers = eligible
            .iter()
            .filter(|e| e.event_type == EventType::FailoverTriggered)
            .count();

        let value = failovers as f64 / lifecycle_count as f64;
        Some(self.record(MetricName::Fr, scope, value, &eligible))
    }

    fn record(
        &self,
        metric: MetricName,
        scope: MetricScope,
        value: f64,
        sources: &[&PLDEvent],
    ) -> DerivedMetricRecord {
        let provisional = sources
            .iter()
            .filter(|e| self.registry.status(&e.pld.code) == Some(RegistryStatus::Provisional))
            .count();
        let provisional_share = if sources.is_empty() {
            0.0
        } else {
            provisional as f64 / sources.len() as f64
        };

        DerivedMetricRecord {
            metric,
            scope,
            value,
            span: SourceSpan {
                first_turn: sources.iter().map(|e| e.turn_sequence).min().unwrap_or(0),
                last_turn: sources.iter().map(|e| e.turn_sequence).max().unwrap_or(0),
                event_count: sources.len(),
            },
            provisional_share,
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::wire::tests::sample_event;
    use crate::event::PldBlock;
    use crate::taxonomy::Phase;

    fn event(turn: u32, event_type: EventType, phase: Phase, code: &str) -> PLDEvent {
        let mut e = sample_event();
        e.session_id = "s-metrics".into();
        e.turn_sequence = turn;
        e.event_type = event_type;
        e.pld = PldBlock::new(phase, code);
        e
    }

    fn engine() -> MetricsEngine {
        MetricsEngine::new(
            Arc::new(TaxonomyRegistry::standard()),
            MetricsConfig::default(),
        )
    }

    #[test]
    fn test_metric_events_excluded_from_sources() {
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::Info, Phase::None, "M1_PRDR"),
            event(3, EventType::Info, Phase::None, "M2_VRL"),
        ];
        let eligible = engine().eligible(&events);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].pld.code, "D1_instruction");
    }

    #[test]
    fn test_prdr_vacuous_without_repairs() {
        let sessions = vec![vec![event(
            1,
            EventType::DriftDetected,
            Phase::Drift,
            "D1_instruction",
        )]];
        assert!(engine().prdr(&sessions).is_none());
    }

    #[test]
    fn test_prdr_counts_post_repair_drift() {
        let recurred = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
            event(3, EventType::DriftDetected, Phase::Drift, "D2_context"),
        ];
        let clean = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
            event(3, EventType::ReentryObserved, Phase::Reentry, "RE1_checkpoint"),
        ];
        let record = engine().prdr(&[recurred, clean]).unwrap();
        assert!((record.value - 50.0).abs() < f64::EPSILON);
        assert_eq!(record.metric, MetricName::Prdr);
    }

    #[test]
    fn test_vrl_inclusive_turn_span() {
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
            event(3, EventType::ReentryObserved, Phase::Reentry, "RE1_checkpoint"),
            event(4, EventType::ContinueAllowed, Phase::Continue, "C0_normal"),
        ];
        let report = engine().vrl(&"s-metrics".into(), &events);
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].turns, Some(3));
        assert_eq!(report.cycles[0].repairs, 1);
        assert_eq!(report.mean_turns, Some(3.0));
    }

    #[test]
    fn test_vrl_unrecovered_cycle_reported() {
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
        ];
        let report = engine().vrl(&"s-metrics".into(), &events);
        assert_eq!(report.unrecovered, 1);
        assert!(report.mean_turns.is_none());
        assert!(engine().vrl_record(&"s-metrics".into(), &events).is_none());
    }

    #[test]
    fn test_vrl_cutoff() {
        let engine = MetricsEngine::new(
            Arc::new(TaxonomyRegistry::standard()),
            MetricsConfig { vrl_cutoff_turns: 3 },
        );
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(9, EventType::ContinueAllowed, Phase::Continue, "C0_normal"),
        ];
        let report = engine.vrl(&"s-metrics".into(), &events);
        assert_eq!(report.cycles.len(), 1);
        assert!(!report.cycles[0].recovered());
    }

    #[test]
    fn test_fr_ratio_and_vacuous_guard() {
        let scope = MetricScope::Session {
            session_id: "s-metrics".into(),
        };

        let none = engine().fr(
            scope.clone(),
            &[event(1, EventType::Info, Phase::None, "INFO_generic")],
        );
        assert!(none.is_none());

        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
            event(3, EventType::FailoverTriggered, Phase::Failover, "F1_escalation"),
            event(4, EventType::ContinueAllowed, Phase::Continue, "C0_normal"),
        ];
        let record = engine().fr(scope, &events).unwrap();
        assert!((record.value - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_round_trips_as_signal() {
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::RepairTriggered, Phase::Repair, "R1_clarify"),
            event(3, EventType::ReentryObserved, Phase::Reentry, "RE1_checkpoint"),
        ];
        let record = engine()
            .vrl_record(&"s-metrics".into(), &events)
            .unwrap();
        let signal = record.to_signal();
        assert_eq!(signal.kind, SignalKind::MetricVrl);
        assert_eq!(signal.payload["metric"], "VRL");
    }

    #[test]
    fn test_provisional_share() {
        let events = vec![
            event(1, EventType::DriftDetected, Phase::Drift, "D1_instruction"),
            event(2, EventType::Info, Phase::None, "SYS_heartbeat"),
        ];
        let record = engine()
            .fr(
                MetricScope::Session {
                    session_id: "s-metrics".into(),
                },
                &events,
            )
            .unwrap();
        assert!((record.provisional_share - 0.5).abs() < f64::EPSILON);
    }
}
