//! Event data model and JSON wire boundary.

mod types;
pub mod wire;

pub use types::{
    EventId, EventSource, EventType, PLD_SCHEMA_VERSION, PLDEvent, PhaseRequirement, PldBlock,
    RuntimeBlock, SessionId, UxBlock,
};
