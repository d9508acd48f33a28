//! Error taxonomy for the caching proxy.

use crate::config::ConfigError;

/// Broad class of an [`EdgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Storage,
    Serialization,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Storage => write!(f, "storage"),
            Self::Serialization => write!(f, "serialization"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Errors surfaced by the caching core.
///
/// Only `Config` is fatal. Everything else is recovered where it happens and
/// degrades to a redirect or a skipped population.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    /// Origin unreachable, timed out, or answered with a non-OK status.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem or metadata store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Corrupt or unreadable metadata record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Missing or invalid startup parameter.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EdgeError {
    /// Get the error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the process must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_is_fatal() {
        assert!(EdgeError::Config(ConfigError::Missing("origin")).is_fatal());
        assert!(!EdgeError::Network("refused".into()).is_fatal());
        assert!(!EdgeError::Storage("disk full".into()).is_fatal());
        assert!(!EdgeError::Serialization("eof".into()).is_fatal());
    }

    #[test]
    fn test_io_error_is_storage() {
        let err: EdgeError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
