//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Observer creation error
    #[error("failed to create observer '{name}': {message}")]
    ObserverCreation { name: String, message: String },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create an observer creation error
    pub fn observer_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ObserverCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
