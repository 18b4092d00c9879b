use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{PldError, Result};
use crate::policy::RepairTier;
use crate::validator::ValidationMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub validation: ValidationConfig,
    pub policy: PolicyConfig,
    pub metrics: MetricsConfig,
    pub router: RouterConfig,
}

impl RuntimeConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self).map_err(|e| PldError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.validation.schema_major.is_empty()
            || !self.validation.schema_major.chars().all(|c| c.is_ascii_digit())
        {
            errors.push("validation.schema_major must be a numeric major version");
        }

        if self.policy.soft_repair_attempts_max == 0 {
            errors.push("policy.soft_repair_attempts_max must be greater than 0");
        }
        if self.policy.failover_mrbf_ceiling == 0 {
            errors.push("policy.failover_mrbf_ceiling must be greater than 0");
        }
        if self.policy.prdr_window_turns == 0 {
            errors.push("policy.prdr_window_turns must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.policy.min_reentry_confidence) {
            errors.push("policy.min_reentry_confidence must be between 0.0 and 1.0");
        }

        if self.router.reorder_window == 0 {
            errors.push("router.reorder_window must be greater than 0");
        }
        if self.router.channel_capacity == 0 {
            errors.push("router.channel_capacity must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PldError::Config(errors.join("; ")))
        }
    }
}

/// How incoming events are validated. Fixed per deployment or ingestion
/// path, never per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    pub schema_major: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Strict,
            schema_major: "2".to_string(),
        }
    }
}

/// Escalation thresholds for the lifecycle policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub soft_repair_attempts_max: u32,
    pub directed_repair_attempts_max: u32,
    pub hard_repair_attempts_max: u32,
    /// Turns after a reentry checkpoint within which a new drift counts as
    /// a recurrence.
    pub prdr_window_turns: u32,
    pub min_reentry_confidence: f64,
    /// Total repair attempts across all tiers before failover.
    pub failover_mrbf_ceiling: u32,
}

impl PolicyConfig {
    pub fn tier_budget(&self, tier: RepairTier) -> u32 {
        match tier {
            RepairTier::Soft => self.soft_repair_attempts_max,
            RepairTier::Directed => self.directed_repair_attempts_max,
            RepairTier::Hard => self.hard_repair_attempts_max,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            soft_repair_attempts_max: 2,
            directed_repair_attempts_max: 1,
            hard_repair_attempts_max: 1,
            prdr_window_turns: 3,
            min_reentry_confidence: 0.70,
            failover_mrbf_ceiling: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Recovery-latency cutoff in turns; 0 disables the cutoff.
    pub vrl_cutoff_turns: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { vrl_cutoff_turns: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Bounded reorder window per session, in buffered events.
    pub reorder_window: usize,
    pub channel_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            reorder_window: 8,
            channel_capacity: 64,
        }
    }
}
