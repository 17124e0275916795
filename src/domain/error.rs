use thiserror::Error;

/// Domain-level errors for DevScope.
///
/// Facts about the user's machine (a missing tool, an unreadable sensor) never
/// show up here; they are folded into status values. These variants describe
/// failures of the subsystem itself or of its configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Tool not found in registry: {0}")]
    ToolNotFound(String),

    #[error("Unknown custom detector: {0}")]
    UnknownDetector(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Metrics collector error: {0}")]
    Collector(String),

    #[error("Collector request '{action}' timed out after {timeout_ms}ms")]
    CollectorTimeout { action: String, timeout_ms: u64 },

    #[error("Metrics collector exited")]
    CollectorExited,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
