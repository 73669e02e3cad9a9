//! Error types for CLI operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Malformed scenario line
    #[error("Scenario {path} line {line}: {message}")]
    Scenario {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn scenario(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Scenario {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
