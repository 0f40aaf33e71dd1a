//! Error types for fishpond-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fishpond-core
#[derive(Error, Debug)]
pub enum Error {
    /// Event store collaborator errors
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Snapshot store collaborator errors
    #[error("Snapshot store error: {0}")]
    SnapshotStore(#[from] SnapshotStoreError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Broken call discipline or internal bookkeeping. The affected fish
    /// instance must not be used any further.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (shutdown signal or dropped consumer)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Fatal errors poison the fish instance that raised them.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EventStore(err) => err.is_transient(),
            Self::SnapshotStore(err) => err.is_transient(),
            Self::Config(_)
            | Self::Invariant(_)
            | Self::Json(_)
            | Self::Cancelled(_) => false,
        }
    }
}

/// Errors reported by an event store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    #[error("Event stream closed before completion")]
    StreamClosed,

    #[error("Events delivered out of order: {0}")]
    OutOfOrder(String),

    #[error("Event store state poisoned: {0}")]
    Poisoned(String),
}

impl EventStoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::StreamClosed)
    }
}

/// Errors reported by a snapshot store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStoreError {
    #[error("Snapshot backend failure: {0}")]
    Backend(String),

    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot store state poisoned: {0}")]
    Poisoned(String),
}

impl SnapshotStoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violations_are_fatal() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let benign = vec![
            Error::EventStore(EventStoreError::StreamClosed),
            Error::SnapshotStore(SnapshotStoreError::Backend("disk".to_string())),
            Error::Config(ConfigError::ValidationError("zero".to_string())),
            Error::Json(json_err),
            Error::Cancelled("shutdown".to_string()),
        ];
        for err in benign {
            assert!(!err.is_fatal(), "{err} should not be fatal");
        }
        assert!(Error::Invariant("pointer out of range".to_string()).is_fatal());
    }

    #[test]
    fn transient_store_errors_are_retryable() {
        assert!(Error::from(EventStoreError::Unavailable("net".to_string())).is_retryable());
        assert!(Error::from(SnapshotStoreError::Unavailable("busy".to_string())).is_retryable());
        assert!(!Error::from(SnapshotStoreError::Backend("corrupt".to_string())).is_retryable());
        assert!(!Error::Invariant("x".to_string()).is_retryable());
    }

    #[test]
    fn display_includes_layer_prefix() {
        let err = Error::from(EventStoreError::OutOfOrder("7/b before 3/a".to_string()));
        assert_eq!(
            err.to_string(),
            "Event store error: Events delivered out of order: 7/b before 3/a"
        );
    }
}
