//! Error types shared across the engine boundary.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty value for {kind}")]
    EmptyId { kind: &'static str },
    #[error("invalid length for {kind}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

/// Error model for calls into the external tokenization engine.
///
/// Business rejections carry the engine's code and message verbatim; this
/// layer never retries them on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("verification method required")]
    VerificationMethodRequired,
    #[error("engine rejected request: code={code}, message={message}")]
    Rejected { code: i32, message: String },
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Core-component initialization failures, classified for retry handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreInitError {
    #[error("initialization already in progress")]
    InitializationInProgress,
    #[error("core already initialized")]
    AlreadyInitialized,
    #[error("internal component error")]
    InternalComponent,
    #[error("persisted storage error")]
    Storage,
    #[error("stale component version")]
    StaleVersion,
    #[error("storage migration error")]
    Migration,
    #[error("core init failed: code={code}, message={message}")]
    Other { code: i32, message: String },
}

impl CoreInitError {
    /// Transient failures are retried with a bounded backoff after wiping
    /// corrupted persisted state; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InternalComponent | Self::Storage | Self::StaleVersion | Self::Migration
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayConfigError {
    #[error("gateway component already configured")]
    AlreadyConfigured,
    #[error("gateway configuration failed: code={code}, message={message}")]
    Failed { code: i32, message: String },
}

#[cfg(test)]
mod tests {
    use super::CoreInitError;

    #[test]
    fn transient_classification_matches_the_enumerated_set() {
        assert!(CoreInitError::InternalComponent.is_transient());
        assert!(CoreInitError::Storage.is_transient());
        assert!(CoreInitError::StaleVersion.is_transient());
        assert!(CoreInitError::Migration.is_transient());
        assert!(!CoreInitError::AlreadyInitialized.is_transient());
        assert!(!CoreInitError::InitializationInProgress.is_transient());
        assert!(!CoreInitError::Other {
            code: 7,
            message: "boom".to_string()
        }
        .is_transient());
    }
}
