//! Static lifecycle taxonomy: code prefixes, phases, and registry status.
//!
//! The registry is built once at startup and never mutated afterwards; it is
//! safe to share behind an `Arc` for concurrent reads.

use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{PldError, Result};

/// Lifecycle phase of an event. `None` denotes non-lifecycle/observability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Drift,
    Repair,
    Reentry,
    Continue,
    Outcome,
    Failover,
    #[default]
    None,
}

impl Phase {
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Phase::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Repair => "repair",
            Self::Reentry => "reentry",
            Self::Continue => "continue",
            Self::Outcome => "outcome",
            Self::Failover => "failover",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Governance status of a taxonomy entry. Reporting-only: it never affects
/// accept/reject decisions, only metric confidence tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    Canonical,
    Provisional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub prefix: String,
    pub phase: Phase,
    pub status: RegistryStatus,
}

impl TaxonomyEntry {
    pub fn new(prefix: impl Into<String>, phase: Phase, status: RegistryStatus) -> Self {
        Self {
            prefix: prefix.into(),
            phase,
            status,
        }
    }
}

/// Immutable prefix → phase mapping with per-entry governance status.
#[derive(Debug, Clone)]
pub struct TaxonomyRegistry {
    entries: HashMap<String, TaxonomyEntry>,
}

impl TaxonomyRegistry {
    /// The canonical v2 registry: lifecycle prefixes plus the known
    /// non-lifecycle families (derived metrics, diagnostics, system).
    pub fn standard() -> Self {
        use RegistryStatus::{Canonical, Provisional};

        Self::from_entries(vec![
            TaxonomyEntry::new("D", Phase::Drift, Canonical),
            TaxonomyEntry::new("R", Phase::Repair, Canonical),
            TaxonomyEntry::new("RE", Phase::Reentry, Canonical),
            TaxonomyEntry::new("C", Phase::Continue, Canonical),
            TaxonomyEntry::new("O", Phase::Outcome, Canonical),
            TaxonomyEntry::new("F", Phase::Failover, Canonical),
            TaxonomyEntry::new("M", Phase::None, Provisional),
            TaxonomyEntry::new("INFO", Phase::None, Canonical),
            TaxonomyEntry::new("SYS", Phase::None, Provisional),
        ])
    }

    pub fn from_entries(entries: Vec<TaxonomyEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.prefix.clone(), e))
                .collect(),
        }
    }

    /// Extract the taxonomy prefix from a code: the leading segment before
    /// the first underscore, with trailing digits stripped.
    /// `D4_tool_error` → `D`, `RE2_aligned` → `RE`, `M1_PRDR` → `M`.
    pub fn extract_prefix(code: &str) -> Option<&str> {
        let head = code.split('_').next().unwrap_or("");
        let trimmed = head.trim_end_matches(|c: char| c.is_ascii_digit());
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    pub fn entry(&self, code: &str) -> Option<&TaxonomyEntry> {
        Self::extract_prefix(code).and_then(|p| self.entries.get(p))
    }

    /// Resolve the phase a code belongs to. Errors on a prefix the registry
    /// has never seen.
    pub fn resolve_phase(&self, code: &str) -> Result<Phase> {
        self.entry(code)
            .map(|e| e.phase)
            .ok_or_else(|| {
                PldError::UnknownPrefix(
                    Self::extract_prefix(code).unwrap_or(code).to_string(),
                )
            })
    }

    /// The required phase when the code carries a lifecycle prefix; `None`
    /// for non-lifecycle and unknown prefixes (which must pair with
    /// `phase=none`).
    pub fn lifecycle_phase(&self, code: &str) -> Option<Phase> {
        self.entry(code)
            .map(|e| e.phase)
            .filter(|p| p.is_lifecycle())
    }

    pub fn is_lifecycle_prefix(&self, code: &str) -> bool {
        self.lifecycle_phase(code).is_some()
    }

    pub fn status(&self, code: &str) -> Option<RegistryStatus> {
        self.entry(code).map(|e| e.status)
    }
}

impl Default for TaxonomyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extraction_strips_digits() {
        assert_eq!(TaxonomyRegistry::extract_prefix("D4_tool_error"), Some("D"));
        assert_eq!(TaxonomyRegistry::extract_prefix("RE2_aligned"), Some("RE"));
        assert_eq!(TaxonomyRegistry::extract_prefix("M1_PRDR"), Some("M"));
        assert_eq!(
            TaxonomyRegistry::extract_prefix("INFO_latency_spike"),
            Some("INFO")
        );
        assert_eq!(TaxonomyRegistry::extract_prefix("C0_normal"), Some("C"));
        assert_eq!(TaxonomyRegistry::extract_prefix("42_bogus"), None);
        assert_eq!(TaxonomyRegistry::extract_prefix(""), None);
    }

    #[test]
    fn test_resolve_phase_lifecycle() {
        let registry = TaxonomyRegistry::standard();
        assert_eq!(registry.resolve_phase("D1_instruction").unwrap(), Phase::Drift);
        assert_eq!(registry.resolve_phase("R5_hard_reset").unwrap(), Phase::Repair);
        assert_eq!(registry.resolve_phase("RE1_checkpoint").unwrap(), Phase::Reentry);
        assert_eq!(registry.resolve_phase("F1_escalation").unwrap(), Phase::Failover);
    }

    #[test]
    fn test_resolve_phase_non_lifecycle() {
        let registry = TaxonomyRegistry::standard();
        assert_eq!(registry.resolve_phase("M1_PRDR").unwrap(), Phase::None);
        assert_eq!(registry.resolve_phase("INFO_generic").unwrap(), Phase::None);
    }

    #[test]
    fn test_resolve_phase_unknown_prefix() {
        let registry = TaxonomyRegistry::standard();
        assert!(registry.resolve_phase("X9_mystery").is_err());
    }

    #[test]
    fn test_lifecycle_prefix_check() {
        let registry = TaxonomyRegistry::standard();
        assert!(registry.is_lifecycle_prefix("D1_instruction"));
        assert!(registry.is_lifecycle_prefix("RE2_aligned"));
        assert!(!registry.is_lifecycle_prefix("M1_PRDR"));
        assert!(!registry.is_lifecycle_prefix("UNKNOWN_thing"));
    }

    #[test]
    fn test_numeric_classifier_is_advisory() {
        let registry = TaxonomyRegistry::standard();
        // Classifier digits never change the resolved phase.
        assert_eq!(
            registry.resolve_phase("D1_a").unwrap(),
            registry.resolve_phase("D99_b").unwrap()
        );
    }

    #[test]
    fn test_status_lookup() {
        let registry = TaxonomyRegistry::standard();
        assert_eq!(registry.status("D1_x"), Some(RegistryStatus::Canonical));
        assert_eq!(registry.status("M1_PRDR"), Some(RegistryStatus::Provisional));
        assert_eq!(registry.status("ZZ_unknown"), None);
    }
}
