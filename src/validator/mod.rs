//! Two-level event validation: structural constraints plus the semantic
//! phase matrix. Stateless — the same event under the same mode always
//! yields the same result, and the input is never mutated.

pub mod sequence;

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::{PLDEvent, PhaseRequirement};
use crate::taxonomy::{Phase, TaxonomyRegistry};

/// Canonical code pattern: uppercase prefix, optional numeric classifier,
/// optional descriptor segments. Descriptor case is tolerated so canonical
/// derived-metric codes (`M1_PRDR`) stay admissible.
static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Z0-9]*[0-9]*(?:_[a-zA-Z0-9]+)*$").expect("code pattern is valid")
});

/// How violations are treated. Chosen per deployment or ingestion path,
/// never per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    Strict,
    Warn,
    Normalize,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Strict => "strict",
            Self::Warn => "warn",
            Self::Normalize => "normalize",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Must,
    Should,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn must(rule: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Must,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn should(rule: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Should,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.field, self.message)
    }
}

/// Outcome of validating a single event.
///
/// `normalized` is populated only in normalize mode when a single
/// unambiguous correction exists; it is a candidate replacement for the
/// in-flight event and never touches stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Violation>,
    pub normalized: Option<PLDEvent>,
}

impl ValidationResult {
    pub fn was_normalized(&self) -> bool {
        self.normalized.is_some()
    }
}

pub struct Validator {
    registry: Arc<TaxonomyRegistry>,
    schema_major: String,
}

impl Validator {
    pub fn new(registry: Arc<TaxonomyRegistry>) -> Self {
        Self::with_schema_major(registry, "2")
    }

    pub fn with_schema_major(registry: Arc<TaxonomyRegistry>, major: impl Into<String>) -> Self {
        Self {
            registry,
            schema_major: major.into(),
        }
    }

    /// Validate an event under the given mode.
    ///
    /// Strict mode fails fast after the structural pass; warn and normalize
    /// modes collect the full violation set.
    pub fn validate(&self, event: &PLDEvent, mode: ValidationMode) -> ValidationResult {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        self.check_structural(event, &mut violations);

        if mode == ValidationMode::Strict && !violations.is_empty() {
            return ValidationResult {
                is_valid: false,
                violations,
                warnings,
                normalized: None,
            };
        }

        self.check_phase_prefix(event, &mut violations);
        self.check_event_type_phase(event, mode, &mut violations, &mut warnings);

        if mode == ValidationMode::Normalize
            && !violations.is_empty()
            && let Some(candidate) = self.normalize_candidate(event, &violations)
        {
            // The corrected constraints are surfaced as warnings so callers
            // can see what was rewritten before acceptance.
            warnings.append(&mut violations);
            return ValidationResult {
                is_valid: true,
                violations,
                warnings,
                normalized: Some(candidate),
            };
        }

        ValidationResult {
            is_valid: violations.is_empty(),
            violations,
            warnings,
            normalized: None,
        }
    }

    fn check_structural(&self, event: &PLDEvent, violations: &mut Vec<Violation>) {
        if event.schema_major() != self.schema_major {
            violations.push(Violation::must(
                "schema_version_incompatible",
                "schema_version",
                format!(
                    "major version {:?} is not supported (expected {})",
                    event.schema_version, self.schema_major
                ),
            ));
        }

        if event.turn_sequence < 1 {
            violations.push(Violation::must(
                "turn_sequence_out_of_range",
                "turn_sequence",
                "turn_sequence must be >= 1",
            ));
        }

        if event.session_id.as_str().trim().is_empty() {
            violations.push(Violation::must(
                "session_id_empty",
                "session_id",
                "session_id must be non-empty",
            ));
        }

        if event.event_id.as_str().trim().is_empty() {
            violations.push(Violation::must(
                "event_id_empty",
                "event_id",
                "event_id must be non-empty",
            ));
        }

        if !CODE_PATTERN.is_match(&event.pld.code) {
            violations.push(Violation::must(
                "code_pattern_mismatch",
                "pld.code",
                format!("code {:?} does not match the canonical pattern", event.pld.code),
            ));
        }

        if let Some(confidence) = event.pld.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            violations.push(Violation::must(
                "confidence_out_of_range",
                "pld.confidence",
                format!("confidence {} outside [0, 1]", confidence),
            ));
        }
    }

    /// Phase ↔ prefix rule: lifecycle prefixes bind the phase; every other
    /// prefix may only pair with `none`.
    fn check_phase_prefix(&self, event: &PLDEvent, violations: &mut Vec<Violation>) {
        match self.registry.lifecycle_phase(&event.pld.code) {
            Some(required) if event.pld.phase != required => {
                violations.push(Violation::must(
                    "phase_prefix_mismatch",
                    "pld.phase",
                    format!(
                        "code {:?} requires phase {:?}, got {:?}",
                        event.pld.code,
                        required.as_str(),
                        event.pld.phase.as_str()
                    ),
                ));
            }
            None if event.pld.phase != Phase::None => {
                violations.push(Violation::must(
                    "non_lifecycle_phase",
                    "pld.phase",
                    format!(
                        "non-lifecycle code {:?} requires phase \"none\", got {:?}",
                        event.pld.code,
                        event.pld.phase.as_str()
                    ),
                ));
            }
            _ => {}
        }
    }

    fn check_event_type_phase(
        &self,
        event: &PLDEvent,
        mode: ValidationMode,
        violations: &mut Vec<Violation>,
        warnings: &mut Vec<Violation>,
    ) {
        match event.event_type.phase_requirement() {
            PhaseRequirement::Must(required) if event.pld.phase != required => {
                violations.push(Violation::must(
                    "must_phase_mismatch",
                    "pld.phase",
                    format!(
                        "event_type {} requires phase {:?}, got {:?}",
                        event.event_type,
                        required.as_str(),
                        event.pld.phase.as_str()
                    ),
                ));
            }
            PhaseRequirement::Should(recommended) if event.pld.phase != recommended => {
                // Strict mode ignores SHOULD deviations entirely.
                if mode != ValidationMode::Strict {
                    warnings.push(Violation::should(
                        "should_phase_mismatch",
                        "pld.phase",
                        format!(
                            "event_type {} recommends phase {:?}, got {:?}",
                            event.event_type,
                            recommended.as_str(),
                            event.pld.phase.as_str()
                        ),
                    ));
                }
            }
            _ => {}
        }
    }

    /// Attempt a deterministic correction: only a phase mismatch where the
    /// code prefix and the event-type requirement agree on a single target
    /// phase is correctable. The candidate is re-validated strictly.
    fn normalize_candidate(
        &self,
        event: &PLDEvent,
        violations: &[Violation],
    ) -> Option<PLDEvent> {
        let phase_rules = [
            "phase_prefix_mismatch",
            "non_lifecycle_phase",
            "must_phase_mismatch",
        ];
        if !violations
            .iter()
            .all(|v| phase_rules.contains(&v.rule.as_str()))
        {
            return None;
        }

        let from_code = self
            .registry
            .lifecycle_phase(&event.pld.code)
            .unwrap_or(Phase::None);
        let target = match event.event_type.phase_requirement() {
            PhaseRequirement::Must(required) => {
                if required != from_code {
                    // Code and event type disagree; no unambiguous fix.
                    return None;
                }
                required
            }
            _ => from_code,
        };

        if target == event.pld.phase {
            return None;
        }

        let mut candidate = event.clone();
        candidate.pld.phase = target;

        let check = self.validate(&candidate, ValidationMode::Strict);
        if check.is_valid { Some(candidate) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::wire::tests::sample_event;
    use crate::event::EventType;

    fn validator() -> Validator {
        Validator::new(Arc::new(TaxonomyRegistry::standard()))
    }

    #[test]
    fn test_valid_event_passes_all_modes() {
        let event = sample_event();
        for mode in [
            ValidationMode::Strict,
            ValidationMode::Warn,
            ValidationMode::Normalize,
        ] {
            let result = validator().validate(&event, mode);
            assert!(result.is_valid, "mode {mode}: {:?}", result.violations);
            assert!(result.normalized.is_none());
        }
    }

    #[test]
    fn test_schema_major_mismatch_rejected() {
        let mut event = sample_event();
        event.schema_version = "1.0".into();
        let result = validator().validate(&event, ValidationMode::Strict);
        assert!(!result.is_valid);
        assert_eq!(result.violations[0].rule, "schema_version_incompatible");
    }

    #[test]
    fn test_minor_version_difference_tolerated() {
        let mut event = sample_event();
        event.schema_version = "2.7".into();
        assert!(validator().validate(&event, ValidationMode::Strict).is_valid);
    }

    #[test]
    fn test_turn_sequence_zero_rejected() {
        let mut event = sample_event();
        event.turn_sequence = 0;
        let result = validator().validate(&event, ValidationMode::Warn);
        assert!(result
            .violations
            .iter()
            .any(|v| v.rule == "turn_sequence_out_of_range"));
    }

    #[test]
    fn test_code_pattern() {
        let mut event = sample_event();
        for good in ["D1_instruction", "RE2_aligned", "C0_normal", "M1_PRDR", "INFO_generic"] {
            event.pld.code = good.into();
            let result = validator().validate(&event, ValidationMode::Warn);
            assert!(
                !result.violations.iter().any(|v| v.rule == "code_pattern_mismatch"),
                "{good} should match"
            );
        }
        for bad in ["d1_lower", "_leading", "D1__double", "D1_trailing_", ""] {
            event.pld.code = bad.into();
            let result = validator().validate(&event, ValidationMode::Warn);
            assert!(
                result.violations.iter().any(|v| v.rule == "code_pattern_mismatch"),
                "{bad:?} should not match"
            );
        }
    }

    #[test]
    fn test_lifecycle_prefix_binds_phase() {
        let mut event = sample_event();
        event.pld.code = "D4_tool_error".into();
        event.pld.phase = Phase::Continue;
        event.event_type = EventType::LatencySpike; // MAY-level, so only the prefix rule fires
        let result = validator().validate(&event, ValidationMode::Warn);
        assert!(!result.is_valid);
        assert!(result.violations.iter().any(|v| v.rule == "phase_prefix_mismatch"));
    }

    #[test]
    fn test_non_lifecycle_prefix_requires_none() {
        let mut event = sample_event();
        event.event_type = EventType::Info;
        event.pld.code = "INFO_generic".into();
        event.pld.phase = Phase::Drift;
        let result = validator().validate(&event, ValidationMode::Warn);
        assert!(result.violations.iter().any(|v| v.rule == "non_lifecycle_phase"));
    }

    #[test]
    fn test_should_violation_warns_not_rejects() {
        let mut event = sample_event();
        event.event_type = EventType::SessionClosed;
        event.pld.code = "C0_normal".into();
        event.pld.phase = Phase::Continue;

        // Strict: SHOULD deviations are ignored.
        let strict = validator().validate(&event, ValidationMode::Strict);
        assert!(strict.is_valid);
        assert!(strict.warnings.is_empty());

        // Warn: admitted, but surfaced.
        let warn = validator().validate(&event, ValidationMode::Warn);
        assert!(warn.is_valid);
        assert!(warn.warnings.iter().any(|v| v.rule == "should_phase_mismatch"));
    }

    #[test]
    fn test_normalize_corrects_unambiguous_phase() {
        let mut event = sample_event();
        event.pld.code = "D4_tool_error".into();
        event.pld.phase = Phase::Continue;

        let strict = validator().validate(&event, ValidationMode::Strict);
        assert!(!strict.is_valid);

        let normalized = validator().validate(&event, ValidationMode::Normalize);
        assert!(normalized.is_valid);
        let candidate = normalized.normalized.expect("candidate present");
        assert_eq!(candidate.pld.phase, Phase::Drift);
        assert!(!normalized.warnings.is_empty());
        // Input untouched.
        assert_eq!(event.pld.phase, Phase::Continue);
    }

    #[test]
    fn test_normalize_refuses_ambiguous_fix() {
        let mut event = sample_event();
        // Code says repair, event type says drift: two competing targets.
        event.pld.code = "R1_clarify".into();
        event.pld.phase = Phase::Continue;
        event.event_type = EventType::DriftDetected;

        let result = validator().validate(&event, ValidationMode::Normalize);
        assert!(!result.is_valid);
        assert!(result.normalized.is_none());
    }

    #[test]
    fn test_normalize_never_fixes_structural() {
        let mut event = sample_event();
        event.turn_sequence = 0;
        event.pld.phase = Phase::Continue;
        let result = validator().validate(&event, ValidationMode::Normalize);
        assert!(!result.is_valid);
        assert!(result.normalized.is_none());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut event = sample_event();
        event.pld.phase = Phase::Repair;
        for mode in [
            ValidationMode::Strict,
            ValidationMode::Warn,
            ValidationMode::Normalize,
        ] {
            let first = validator().validate(&event, mode);
            let second = validator().validate(&event, mode);
            assert_eq!(first.is_valid, second.is_valid);
            assert_eq!(first.violations, second.violations);
            assert_eq!(first.warnings, second.warnings);
        }
    }
}
