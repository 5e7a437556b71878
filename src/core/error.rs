use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("instrument conflict: {0}")]
    InstrumentConflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("reader capacity exceeded: {0}")]
    Capacity(String),

    #[error("pipeline already shut down")]
    Shutdown,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MetricsError>;

impl MetricsError {
    /// Creates a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new instrument conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::InstrumentConflict(msg.into())
    }

    /// Creates a new capacity error
    pub fn capacity<S: Into<String>>(msg: S) -> Self {
        Self::Capacity(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Capacity(_))
    }

    /// Returns the error category for diagnostics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::InstrumentConflict(_) => "conflict",
            Self::Serialization(_) | Self::Json(_) | Self::Decode(_) => "serialization",
            Self::Transport(_) => "transport",
            Self::Capacity(_) => "capacity",
            Self::Shutdown => "lifecycle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MetricsError::configuration("bad boundaries");
        assert_eq!(err.to_string(), "configuration error: bad boundaries");
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(MetricsError::transport("connection reset").is_recoverable());
        assert!(MetricsError::capacity("too many readers").is_recoverable());
        assert!(!MetricsError::configuration("invalid view").is_recoverable());
        assert!(!MetricsError::Shutdown.is_recoverable());
    }

    #[test]
    fn test_json_error_category() {
        let err: MetricsError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), "serialization");
    }
}
