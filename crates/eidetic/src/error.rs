//! Error types for Eidetic

use thiserror::Error;

use crate::memory::types::TierId;

/// Main error type for Eidetic operations
#[derive(Error, Debug, Clone)]
pub enum EideticError {
    /// Malformed request, fatal to that call only
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One backing tier could not be reached or rejected the operation
    #[error("Tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: TierId, reason: String },

    /// A fan-out call or consolidation batch ran out of time
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Every tier in a fan-out failed
    #[error("All tiers failed: {}", format_failures(.0))]
    AllTiersFailed(Vec<(TierId, String)>),

    /// Content analysis produced no usable signals
    #[error("Routing ambiguous: {0}")]
    RoutingAmbiguous(String),

    /// Record lookup by id failed
    #[error("Record not found: {0}")]
    NotFound(uuid::Uuid),

    /// Record store / snapshot errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_failures(failures: &[(TierId, String)]) -> String {
    failures
        .iter()
        .map(|(tier, reason)| format!("{tier} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for EideticError {
    fn from(e: std::io::Error) -> Self {
        EideticError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EideticError {
    fn from(e: serde_json::Error) -> Self {
        EideticError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for EideticError {
    fn from(e: toml::de::Error) -> Self {
        EideticError::Config(format!("Failed to parse config: {e}"))
    }
}

/// Result type alias for Eidetic operations
pub type Result<T> = std::result::Result<T, EideticError>;
