//! Media pipeline error types and handling
//!
//! This module defines the error taxonomy of the media-source pipeline. Only
//! [`MediaError::PermanentCapture`] is allowed to cross into the source state machine;
//! everything else is absorbed where it occurs.

use thiserror::Error;

/// Main error type for media-source operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    /// Options or device info rejected by the source's validator
    #[error("Validation rejected: {reason}")]
    ValidationRejected {
        /// Rejection reason
        reason: String,
    },

    /// A single frame could not be captured; capture continues
    #[error("Transient capture error: {reason}")]
    TransientCapture {
        /// Failure reason
        reason: String,
    },

    /// The capturer cannot continue; the source ends
    #[error("Permanent capture error: {reason}")]
    PermanentCapture {
        /// Failure reason
        reason: String,
    },

    /// Every pool slot for the requested shape is borrowed and capacity is reached
    #[error("Buffer pool exhausted: {capacity} slots borrowed")]
    PoolExhausted {
        /// Pool capacity at the time of the request
        capacity: usize,
    },

    /// Sink handle is not registered
    #[error("Unknown sink")]
    UnknownSink,

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Unsupported format error
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },

    /// Native buffer backend failed to provide pixels
    #[error("Native buffer error: {message}")]
    NativeBuffer {
        /// Error message
        message: String,
    },

    /// Runtime or control-queue failure
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },
}

impl From<rtcsource_core::CoreError> for MediaError {
    fn from(error: rtcsource_core::CoreError) -> Self {
        MediaError::Runtime {
            message: error.to_string(),
        }
    }
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::ValidationRejected { .. } => true,
            MediaError::TransientCapture { .. } => true,
            MediaError::PermanentCapture { .. } => false,
            MediaError::PoolExhausted { .. } => true,
            MediaError::UnknownSink => true,
            MediaError::InvalidFrameData { .. } => false,
            MediaError::UnsupportedFormat { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::InvalidState { .. } => false,
            MediaError::NativeBuffer { .. } => true,
            MediaError::Runtime { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::ValidationRejected { .. } => ErrorCategory::Configuration,
            MediaError::TransientCapture { .. } => ErrorCategory::Capture,
            MediaError::PermanentCapture { .. } => ErrorCategory::Capture,
            MediaError::PoolExhausted { .. } => ErrorCategory::Memory,
            MediaError::UnknownSink => ErrorCategory::State,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Format,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::NativeBuffer { .. } => ErrorCategory::Device,
            MediaError::Runtime { .. } => ErrorCategory::State,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// Capture backend errors
    Capture,
    /// Memory management errors
    Memory,
    /// State management errors
    State,
    /// Data validation errors
    Data,
    /// Format and data structure errors
    Format,
    /// Device and hardware errors
    Device,
}
