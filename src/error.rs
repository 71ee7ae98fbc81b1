//! Error types for the transfer engine
//!
//! Backpressure ("would block") is not an error and never shows up here.
//! Pipeline I/O failures are sticky inside the pipeline and only become an
//! [`EngineError`] when the owner asks for a result (e.g. on finalize).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The asynchronous I/O pipeline hit an error
    #[error("I/O pipeline error: {0}")]
    Pipeline(String),

    /// All worker slots of the pool are in use
    #[error("Worker pool exhausted ({limit} tasks running)")]
    PoolExhausted { limit: usize },

    /// A pooled task panicked before producing its result
    #[error("Worker task panicked: {0}")]
    TaskPanicked(String),

    /// The event loop is no longer running
    #[error("Event loop has stopped")]
    LoopStopped,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation cancelled by user
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a pipeline error
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if the protocol layer may retry the operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Pipeline(_) | Self::PoolExhausted { .. } => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| EngineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = EngineError::io("/test/path", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/test/path")));
    }

    #[test]
    fn test_error_recoverability() {
        assert!(EngineError::pipeline("disk full").is_recoverable());
        assert!(EngineError::PoolExhausted { limit: 4 }.is_recoverable());
        assert!(!EngineError::LoopStopped.is_recoverable());
        assert!(!EngineError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_context_keeps_source_information() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = EngineError::io("/data/file", io_err).with_context("finalizing download");

        assert!(err.is_recoverable());
        assert_eq!(err.path(), Some(&PathBuf::from("/data/file")));
        assert!(err.to_string().starts_with("finalizing download: "));
    }

    #[test]
    fn test_with_path_extension() {
        let res: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        let err = res.with_path("/locked").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
