use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stable,
    DriftDetected,
    RepairSoft,
    RepairDirected,
    RepairHard,
    ReentryPending,
    Failover,
    Closed,
}

impl LifecycleState {
    pub fn allowed_transitions(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Stable => &[Stable, DriftDetected, Failover, Closed],
            DriftDetected => &[
                RepairSoft,
                RepairDirected,
                RepairHard,
                ReentryPending,
                Stable,
                Failover,
                Closed,
            ],
            RepairSoft => &[
                RepairSoft,
                RepairDirected,
                ReentryPending,
                Stable,
                DriftDetected,
                Failover,
                Closed,
            ],
            RepairDirected => &[
                RepairDirected,
                RepairHard,
                ReentryPending,
                Stable,
                DriftDetected,
                Failover,
                Closed,
            ],
            RepairHard => &[
                RepairHard,
                ReentryPending,
                Stable,
                DriftDetected,
                Failover,
                Closed,
            ],
            ReentryPending => &[ReentryPending, Stable, DriftDetected, Failover, Closed],
            // A failover must resolve through a recovery path; drift is
            // never reachable from here directly.
            Failover => &[Failover, ReentryPending, Stable, Closed],
            Closed => &[],
        }
    }

    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Closed)
    }

    pub fn is_repair(&self) -> bool {
        matches!(
            self,
            LifecycleState::RepairSoft | LifecycleState::RepairDirected | LifecycleState::RepairHard
        )
    }

    pub fn repair_tier(&self) -> Option<RepairTier> {
        match self {
            LifecycleState::RepairSoft => Some(RepairTier::Soft),
            LifecycleState::RepairDirected => Some(RepairTier::Directed),
            LifecycleState::RepairHard => Some(RepairTier::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stable => "stable",
            Self::DriftDetected => "drift_detected",
            Self::RepairSoft => "repair:soft",
            Self::RepairDirected => "repair:directed",
            Self::RepairHard => "repair:hard",
            Self::ReentryPending => "reentry_pending",
            Self::Failover => "failover",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Escalation tier of a repair attempt. Ordered: exhausting one tier moves
/// the ladder to the next.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RepairTier {
    #[default]
    Soft,
    Directed,
    Hard,
}

impl RepairTier {
    pub fn state(&self) -> LifecycleState {
        match self {
            Self::Soft => LifecycleState::RepairSoft,
            Self::Directed => LifecycleState::RepairDirected,
            Self::Hard => LifecycleState::RepairHard,
        }
    }

    pub fn next(&self) -> Option<RepairTier> {
        match self {
            Self::Soft => Some(Self::Directed),
            Self::Directed => Some(Self::Hard),
            Self::Hard => None,
        }
    }
}

impl fmt::Display for RepairTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Soft => "soft",
            Self::Directed => "directed",
            Self::Hard => "hard",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: LifecycleState, to: LifecycleState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(LifecycleState::Stable.can_transition_to(LifecycleState::DriftDetected));
        assert!(LifecycleState::DriftDetected.can_transition_to(LifecycleState::RepairSoft));
        assert!(LifecycleState::RepairSoft.can_transition_to(LifecycleState::ReentryPending));
        assert!(LifecycleState::ReentryPending.can_transition_to(LifecycleState::Stable));
    }

    #[test]
    fn test_failover_never_reaches_drift_directly() {
        assert!(!LifecycleState::Failover.can_transition_to(LifecycleState::DriftDetected));
        assert!(LifecycleState::Failover.can_transition_to(LifecycleState::ReentryPending));
        assert!(LifecycleState::Failover.can_transition_to(LifecycleState::Stable));
        assert!(LifecycleState::Failover.can_transition_to(LifecycleState::Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(LifecycleState::Closed.is_terminal());
        assert!(LifecycleState::Closed.allowed_transitions().is_empty());
        assert!(!LifecycleState::Failover.is_terminal());
    }

    #[test]
    fn test_repair_tier_ladder() {
        assert_eq!(RepairTier::Soft.next(), Some(RepairTier::Directed));
        assert_eq!(RepairTier::Directed.next(), Some(RepairTier::Hard));
        assert_eq!(RepairTier::Hard.next(), None);
        assert!(RepairTier::Soft < RepairTier::Hard);
    }

    #[test]
    fn test_repair_states() {
        assert!(LifecycleState::RepairDirected.is_repair());
        assert_eq!(
            LifecycleState::RepairHard.repair_tier(),
            Some(RepairTier::Hard)
        );
        assert_eq!(LifecycleState::Stable.repair_tier(), None);
    }
}
