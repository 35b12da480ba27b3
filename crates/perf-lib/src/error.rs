//! Error types shared by every engine component

use thiserror::Error;

/// Errors surfaced across component boundaries
#[derive(Debug, Error)]
pub enum PerfError {
    /// Platform counters or files needed by a probe are missing
    #[error("{component}: platform resource unavailable: {reason}")]
    ProbeUnavailable { component: String, reason: String },

    /// A single sampling attempt failed
    #[error("sampling failed: {0}")]
    Sample(String),

    /// Operation not allowed in the component's current status
    #[error("{component} is {status}, expected {expected}")]
    InvalidState {
        component: String,
        status: String,
        expected: &'static str,
    },

    #[error("a component named '{0}' is already registered")]
    DuplicateName(String),

    #[error("no component named '{0}'")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence backend failure; in-memory state is unaffected
    #[error("storage error: {0}")]
    Storage(String),

    #[error("import rejected: {0}")]
    Import(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PerfError>;
