//! Error types for rtcsource core primitives

use thiserror::Error;

/// Main error type for runtime and control-queue operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// The control queue worker has shut down
    #[error("Control queue closed: {queue}")]
    QueueClosed {
        /// Queue name
        queue: String,
    },

    /// Spawning a worker thread failed
    #[error("Failed to spawn worker {name}: {source}")]
    Spawn {
        /// Worker name
        name: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::Initialization { .. } => false,
            CoreError::InvalidConfiguration { .. } => false,
            CoreError::QueueClosed { .. } => false,
            CoreError::Spawn { .. } => true,
        }
    }
}
