//! Closed-schema JSON boundary for event ingestion and emission.
//!
//! Typed deserialization is the structural gate: missing fields, wrong
//! types, and unknown top-level keys all fail here and are turned into
//! rejection records for the external dead-letter mechanism.

use crate::error::Result;
use crate::event::PLDEvent;
use crate::sink::RejectionRecord;

/// Machine error code attached to rejections produced at the wire boundary.
pub const WIRE_ERROR_CODE: &str = "structural_violation";

/// Parse a raw JSON payload into an event, or produce a rejection record
/// carrying whatever identity could be salvaged from the payload.
pub fn parse_event(raw: &str) -> std::result::Result<PLDEvent, Box<RejectionRecord>> {
    serde_json::from_str::<PLDEvent>(raw)
        .map_err(|err| Box::new(RejectionRecord::from_raw(raw, WIRE_ERROR_CODE, err.to_string())))
}

pub fn to_json(event: &PLDEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}
