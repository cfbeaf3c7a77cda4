//! Simulation error types.
//!
//! Only setup and I/O failures surface as [`SimError`]. Oracle failures
//! degrade to fallback replies, lookup misses are no-ops and checkpoint
//! failures are logged, so a running simulation never stops on them.

use thiserror::Error;

/// Simulation errors.
#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Profile input could not be loaded.
    #[error("Profile error: {0}")]
    Profile(String),

    /// Checkpoint or report could not be written or read.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// HTTP client could not be set up.
    #[error("Network error: {0}")]
    Network(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;
