//! Lifecycle governance core for conversational agent runtimes: validates
//! drift/repair/reentry/failover event streams, bridges internal signals
//! into canonical events, drives the per-session escalation policy, and
//! derives stability metrics (PRDR, VRL, FR) without contaminating the raw
//! event log.

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod sink;
pub mod taxonomy;
pub mod validator;

pub use bridge::{BuiltEvent, EventContext, RuntimeSignal, SignalBridge, SignalKind};
pub use config::{MetricsConfig, PolicyConfig, RouterConfig, RuntimeConfig, ValidationConfig};
pub use error::{PldError, Result};
pub use event::{
    EventId, EventSource, EventType, PLD_SCHEMA_VERSION, PLDEvent, PldBlock, SessionId, UxBlock,
};
pub use metrics::{DerivedMetricRecord, MetricName, MetricsEngine, ThresholdSet, VrlReport};
pub use policy::{LifecycleState, PolicyDecision, PolicyEngine, RepairTier, SessionState};
pub use runtime::SessionRouter;
pub use sink::{EventSink, MemorySink, RejectionRecord};
pub use taxonomy::{Phase, RegistryStatus, TaxonomyEntry, TaxonomyRegistry};
pub use validator::{ValidationMode, ValidationResult, Validator, Violation};
