mod common;

use std::sync::Arc;

use common::*;
use pld_runtime::metrics::MetricScope;
use pld_runtime::{
    MetricName, MetricsConfig, MetricsEngine, SignalKind, TaxonomyRegistry, ThresholdSet,
};
use pld_runtime::metrics::MetricSeverity;

fn engine() -> MetricsEngine {
    MetricsEngine::new(
        Arc::new(TaxonomyRegistry::standard()),
        MetricsConfig::default(),
    )
}

#[test]
fn test_recovery_latency_three_turns() {
    // drift@1 → repair@2 → reentry@3 → continue@4: one recovered cycle
    // spanning three turns.
    let events = vec![
        drift("s1", 1),
        repair("s1", 2),
        reentry("s1", 3, 0.8),
        continue_allowed("s1", 4),
    ];
    let report = engine().vrl(&"s1".into(), &events);
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].turns, Some(3));
    assert_eq!(report.mean_turns, Some(3.0));
    assert_eq!(report.unrecovered, 0);
}

#[test]
fn test_metric_events_never_feed_metrics() {
    // A stream salted with derived-metric events must produce the same
    // values as the clean stream.
    let clean = vec![
        drift("s1", 1),
        repair("s1", 2),
        drift("s1", 3),
        reentry("s1", 4, 0.8),
    ];
    let mut salted = clean.clone();
    salted.push(metric_info("s1", 5, "M1_PRDR"));
    salted.push(metric_info("s1", 6, "M2_VRL"));
    salted.push(metric_info("s1", 7, "M3_FR"));

    let engine = engine();
    let scope = MetricScope::Session {
        session_id: "s1".into(),
    };

    let clean_prdr = engine.prdr(&[clean.clone()]).unwrap();
    let salted_prdr = engine.prdr(&[salted.clone()]).unwrap();
    assert_eq!(clean_prdr.value, salted_prdr.value);
    assert_eq!(clean_prdr.span.event_count, salted_prdr.span.event_count);

    let clean_fr = engine.fr(scope.clone(), &clean).unwrap();
    let salted_fr = engine.fr(scope, &salted).unwrap();
    assert_eq!(clean_fr.value, salted_fr.value);

    let clean_vrl = engine.vrl(&"s1".into(), &clean);
    let salted_vrl = engine.vrl(&"s1".into(), &salted);
    assert_eq!(clean_vrl.mean_turns, salted_vrl.mean_turns);
}

#[test]
fn test_vacuous_scopes_are_guarded() {
    let engine = engine();

    // No repairs anywhere: PRDR undefined, not a division failure.
    assert!(engine.prdr(&[vec![drift("s1", 1)]]).is_none());
    assert!(engine.prdr(&[]).is_none());

    // No lifecycle events: FR undefined.
    let scope = MetricScope::Session {
        session_id: "s1".into(),
    };
    assert!(engine.fr(scope, &[metric_info("s1", 1, "INFO_generic")]).is_none());

    // No recovery: VRL reported as unrecovered, record withheld.
    let events = vec![drift("s1", 1), repair("s1", 2)];
    let report = engine.vrl(&"s1".into(), &events);
    assert_eq!(report.unrecovered, 1);
    assert!(engine.vrl_record(&"s1".into(), &events).is_none());
}

#[test]
fn test_prdr_cohort_fraction() {
    // Three sessions with repair, one of which sees post-repair drift; one
    // session with no repair at all is excluded from the denominator.
    let recurred = vec![drift("a", 1), repair("a", 2), drift("a", 3)];
    let recovered = vec![drift("b", 1), repair("b", 2), reentry("b", 3, 0.8)];
    let quiet = vec![drift("c", 1), repair("c", 2)];
    let no_repair = vec![drift("d", 1), continue_allowed("d", 2)];

    let record = engine()
        .prdr(&[recurred, recovered, quiet, no_repair])
        .unwrap();
    assert!((record.value - 100.0 / 3.0).abs() < 1e-9);
    match record.scope {
        MetricScope::Cohort { sessions } => assert_eq!(sessions, 4),
        _ => panic!("cohort scope expected"),
    }
}

#[test]
fn test_failover_recurrence_per_lifecycle_events() {
    let events = vec![
        drift("s1", 1),
        repair("s1", 2),
        failover("s1", 3),
        reentry("s1", 4, 0.8),
        metric_info("s1", 5, "INFO_generic"),
    ];
    let record = engine()
        .fr(
            MetricScope::Session {
                session_id: "s1".into(),
            },
            &events,
        )
        .unwrap();
    // Four lifecycle events, one failover. The info event has phase none
    // and stays out of the denominator.
    assert!((record.value - 0.25).abs() < f64::EPSILON);
}

#[test]
fn test_derived_record_emits_as_non_lifecycle_signal() {
    let events = vec![
        drift("s1", 1),
        repair("s1", 2),
        reentry("s1", 3, 0.8),
    ];
    let record = engine().vrl_record(&"s1".into(), &events).unwrap();
    assert_eq!(record.metric, MetricName::Vrl);

    let signal = record.to_signal();
    assert_eq!(signal.kind, SignalKind::MetricVrl);
    assert_eq!(signal.payload["metric"], "VRL");
}

#[test]
fn test_threshold_evaluation_of_derived_values() {
    let thresholds = ThresholdSet::standard();
    let recurred = vec![drift("a", 1), repair("a", 2), drift("a", 3)];
    let record = engine().prdr(&[recurred]).unwrap();
    assert!((record.value - 100.0).abs() < f64::EPSILON);
    assert_eq!(
        thresholds.evaluate(record.metric, record.value),
        MetricSeverity::Critical
    );
}
