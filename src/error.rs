//! # Error Types
//!
//! Custom error types for Sense Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Sense Bridge
#[derive(Debug, Error)]
pub enum SenseBridgeError {
    /// Registry lookup miss (channel not in the table or disabled by config)
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Datum shorter than its declared layout
    #[error("Buffer too short: field {field} needs {needed} bytes at offset {offset}, {available} available")]
    BufferTooShort {
        field: usize,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// No sample recorded yet for the requested field
    #[error("No samples for {channel}.{field}")]
    EmptyBuffer { channel: String, field: String },

    /// Value count does not match the characteristic layout
    #[error("Layout mismatch: expected {expected} values, got {actual}")]
    LayoutMismatch { expected: usize, actual: usize },

    /// Session start without a usable name
    #[error("Session name is required")]
    MissingName,

    /// Session payload rejected by validation
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// A session is already recording on this client
    #[error("Session {0} is already active")]
    SessionAlreadyActive(String),

    /// Stop or flush requested without an active session
    #[error("No active session")]
    NoActiveSession,

    /// Session id not known to the store
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Network or server failure on a persistence call
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Wireless link errors (missing characteristic, read/write failure, timeout)
    #[error("Device error: {0}")]
    Device(String),

    /// Export errors
    #[error("Export error: {0}")]
    Export(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SenseBridgeError {
    fn from(err: reqwest::Error) -> Self {
        SenseBridgeError::TransportFailure(err.to_string())
    }
}

impl From<csv::Error> for SenseBridgeError {
    fn from(err: csv::Error) -> Self {
        SenseBridgeError::Export(err.to_string())
    }
}

/// Result type alias for Sense Bridge
pub type Result<T> = std::result::Result<T, SenseBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_too_short_message() {
        let err = SenseBridgeError::BufferTooShort {
            field: 1,
            offset: 4,
            needed: 4,
            available: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 4"));
        assert!(msg.contains("2 available"));
    }

    #[test]
    fn test_empty_buffer_message() {
        let err = SenseBridgeError::EmptyBuffer {
            channel: "temperature".to_string(),
            field: "temperature".to_string(),
        };
        assert_eq!(err.to_string(), "No samples for temperature.temperature");
    }

    #[test]
    fn test_layout_mismatch_message() {
        let err = SenseBridgeError::LayoutMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Layout mismatch: expected 3 values, got 2");
    }
}
