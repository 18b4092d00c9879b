//! Threshold evaluation for derived metrics.
//!
//! Hard bounds are sanity constraints, not policy: out-of-range values are
//! clamped to the nearest bound and then evaluated against warn/critical.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::engine::MetricName;
use crate::error::{PldError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSeverity {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub warn: Option<f64>,
    pub critical: Option<f64>,
    pub higher_is_worse: bool,
    pub hard_min: Option<f64>,
    pub hard_max: Option<f64>,
}

impl MetricThreshold {
    /// Construct a threshold, enforcing warn/critical ordering consistency
    /// with the direction: misordered values understate severity.
    pub fn new(
        warn: Option<f64>,
        critical: Option<f64>,
        higher_is_worse: bool,
        hard_min: Option<f64>,
        hard_max: Option<f64>,
    ) -> Result<Self> {
        if let (Some(w), Some(c)) = (warn, critical) {
            if higher_is_worse && c < w {
                return Err(PldError::Config(format!(
                    "inconsistent threshold: critical ({c}) < warn ({w}) with higher_is_worse"
                )));
            }
            if !higher_is_worse && c > w {
                return Err(PldError::Config(format!(
                    "inconsistent threshold: critical ({c}) > warn ({w}) with lower_is_worse"
                )));
            }
        }
        Ok(Self {
            warn,
            critical,
            higher_is_worse,
            hard_min,
            hard_max,
        })
    }

    fn clamp(&self, value: f64) -> f64 {
        if let Some(min) = self.hard_min
            && value < min
        {
            return min;
        }
        if let Some(max) = self.hard_max
            && value > max
        {
            return max;
        }
        value
    }

    pub fn evaluate(&self, value: f64) -> MetricSeverity {
        let value = self.clamp(value);

        if self.warn.is_none() && self.critical.is_none() {
            return MetricSeverity::Ok;
        }

        if self.higher_is_worse {
            if self.critical.is_some_and(|c| value >= c) {
                return MetricSeverity::Critical;
            }
            if self.warn.is_some_and(|w| value >= w) {
                return MetricSeverity::Warn;
            }
        } else {
            if self.critical.is_some_and(|c| value <= c) {
                return MetricSeverity::Critical;
            }
            if self.warn.is_some_and(|w| value <= w) {
                return MetricSeverity::Warn;
            }
        }

        MetricSeverity::Ok
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdSet {
    thresholds: HashMap<MetricName, MetricThreshold>,
}

impl ThresholdSet {
    /// Default thresholds: PRDR is a 0–100 percentage, FR a 0–1 ratio, VRL
    /// an unbounded turn count.
    pub fn standard() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(
            MetricName::Prdr,
            MetricThreshold {
                warn: Some(30.0),
                critical: Some(50.0),
                higher_is_worse: true,
                hard_min: Some(0.0),
                hard_max: Some(100.0),
            },
        );
        thresholds.insert(
            MetricName::Vrl,
            MetricThreshold {
                warn: Some(10.0),
                critical: Some(30.0),
                higher_is_worse: true,
                hard_min: Some(0.0),
                hard_max: None,
            },
        );
        thresholds.insert(
            MetricName::Fr,
            MetricThreshold {
                warn: Some(0.10),
                critical: Some(0.25),
                higher_is_worse: true,
                hard_min: Some(0.0),
                hard_max: Some(1.0),
            },
        );
        Self { thresholds }
    }

    pub fn get(&self, metric: MetricName) -> Option<&MetricThreshold> {
        self.thresholds.get(&metric)
    }

    pub fn evaluate(&self, metric: MetricName, value: f64) -> MetricSeverity {
        self.thresholds
            .get(&metric)
            .map(|t| t.evaluate(value))
            .unwrap_or(MetricSeverity::Ok)
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::standard()
    }
}
