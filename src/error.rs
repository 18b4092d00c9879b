use thiserror::Error;

use crate::validator::Violation;

#[derive(Error, Debug)]
pub enum PldError {
    #[error("Unknown taxonomy prefix: {0}")]
    UnknownPrefix(String),

    #[error("No semantic mapping for runtime signal: {0}")]
    UnmappableSignal(String),

    #[error("Event rejected with {} violation(s)", .violations.len())]
    EventRejected { violations: Vec<Violation> },

    #[error(
        "turn_sequence regression for session {session_id}: got {turn_sequence}, last observed {last}"
    )]
    TurnRegression {
        session_id: String,
        turn_sequence: u32,
        last: u32,
    },

    #[error("Session already closed: {0}")]
    SessionClosed(String),

    #[error("Session channel unavailable: {0}")]
    RouterChannel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PldError>;
