//! Ingestion error types

use contracts::ContractError;
use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Detection adapter returned an error
    #[error("detection adapter '{adapter}' failed: {source}")]
    Adapter {
        /// Adapter name
        adapter: String,
        #[source]
        source: ContractError,
    },

    /// Detection adapter exceeded the per-call timeout
    #[error("detection adapter '{adapter}' timed out after {waited_ms}ms")]
    Timeout {
        /// Adapter name
        adapter: String,
        /// Configured timeout
        waited_ms: u64,
    },

    /// Inference pool no longer accepts jobs
    #[error("inference pool is closed")]
    PoolClosed,

    /// Worker dropped the job without answering
    #[error("inference worker dropped job for '{image}'")]
    WorkerLost {
        /// Image name
        image: String,
    },
}

impl IngestionError {
    /// Short label used as the `degraded` reason and metric tag
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Adapter { .. } => "adapter_error",
            Self::Timeout { .. } => "adapter_timeout",
            Self::PoolClosed => "pool_closed",
            Self::WorkerLost { .. } => "worker_lost",
        }
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
