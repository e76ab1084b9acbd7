use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid version string {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("payload key must not be empty")]
    EmptyKey,

    #[error("manifest name must not be empty")]
    EmptyName,

    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
