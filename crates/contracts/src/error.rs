//! Layered error definitions
//!
//! Categorized by source: config / detection / alert / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Detection Errors =====
    /// Detection adapter failed to produce detections
    #[error("detection adapter '{adapter}' failed: {message}")]
    Detection { adapter: String, message: String },

    /// Detection adapter did not answer in time
    #[error("detection adapter '{adapter}' timed out after {waited_ms}ms")]
    DetectionTimeout { adapter: String, waited_ms: u64 },

    /// Unsupported image payload
    #[error("unsupported image payload: {message}")]
    InvalidImage { message: String },

    // ===== Alert Errors =====
    /// Emergency request rejected at the boundary
    #[error("emergency request '{alert_id}' rejected: {message}")]
    InvalidAlert { alert_id: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create detection adapter error
    pub fn detection(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detection {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Create invalid alert error
    pub fn invalid_alert(alert_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAlert {
            alert_id: alert_id.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
