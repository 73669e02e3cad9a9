//! Controller error types

use contracts::{ContractError, IntersectionId};
use signal_engine::EngineError;
use thiserror::Error;

/// Intersection controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Engine could not be built from the intersection configuration
    #[error("intersection '{intersection}': {source}")]
    Engine {
        intersection: IntersectionId,
        #[source]
        source: EngineError,
    },

    /// Controller task is gone
    #[error("intersection '{intersection}' is not running")]
    Stopped { intersection: IntersectionId },

    #[error("duplicate intersection id '{0}'")]
    DuplicateIntersection(IntersectionId),

    #[error("unknown intersection '{0}'")]
    UnknownIntersection(IntersectionId),

    /// Hub was built without a channel for this intersection
    #[error("hub carries no channel for intersection '{0}'")]
    NotOnHub(IntersectionId),

    /// No inference pool attached to the handle
    #[error("intersection '{0}' has no detection adapter")]
    NoDetector(IntersectionId),

    /// Rejected input (e.g. unsupported image)
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ControllerError {
    pub fn engine(intersection: &IntersectionId, source: EngineError) -> Self {
        Self::Engine {
            intersection: intersection.clone(),
            source,
        }
    }

    pub fn stopped(intersection: &IntersectionId) -> Self {
        Self::Stopped {
            intersection: intersection.clone(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ControllerError>;
