//! Error types for replication sessions.

use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors reported by a replication session.
///
/// Everything except [`ReplicationError::Configuration`] and
/// [`ReplicationError::InvalidConfigFile`] reaches the caller through the
/// session's `last_error` and a change notification, never as a return value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Invalid combination of settings, rejected synchronously.
    #[error("invalid replication configuration: {message}")]
    Configuration {
        /// Why the setting was rejected.
        message: String,
    },

    /// The engine factory could not build an engine.
    #[error("engine construction failed (status {status}): {message}")]
    EngineConstruction {
        /// Status code reported by the factory.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The engine reported an error while running.
    #[error("replication error: {message}")]
    EngineRuntime {
        /// Optional status code from the engine.
        code: Option<u16>,
        /// Error message.
        message: String,
    },

    /// The owning database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// The background context no longer accepts tasks.
    #[error("background context has shut down")]
    ServerUnavailable,

    /// A session configuration file could not be parsed.
    #[error("invalid configuration file: {0}")]
    InvalidConfigFile(String),
}

impl ReplicationError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an engine construction error.
    pub fn construction(status: u16, message: impl Into<String>) -> Self {
        Self::EngineConstruction {
            status,
            message: message.into(),
        }
    }

    /// Creates an engine runtime error.
    pub fn runtime(code: Option<u16>, message: impl Into<String>) -> Self {
        Self::EngineRuntime {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the error means no engine ever ran.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::EngineConstruction { .. } | Self::DatabaseClosed | Self::ServerUnavailable
        )
    }

    /// Returns the engine status code, if the error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::EngineConstruction { status, .. } => Some(*status),
            Self::EngineRuntime { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfigFile(err.to_string())
    }
}
