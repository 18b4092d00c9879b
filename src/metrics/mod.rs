//! Derived metrics (PRDR, VRL, FR) and their alerting thresholds.

mod engine;
mod thresholds;

pub use engine::{
    DerivedMetricRecord, MetricName, MetricScope, MetricsEngine, SourceSpan, VrlCycle, VrlReport,
};
pub use thresholds::{MetricSeverity, MetricThreshold, ThresholdSet};
