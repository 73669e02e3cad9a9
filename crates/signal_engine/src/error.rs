//! Engine error types

use contracts::{Lane, SignalColor};
use thiserror::Error;

/// Safety invariant broken at a tick boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    /// Green lanes span more than one phase group
    #[error("green lanes {lanes:?} span more than one phase group")]
    ConflictingGreens { lanes: Vec<Lane> },

    /// Colour table disagrees with the structural state
    #[error("lane {lane} shows {actual} but state requires {expected}")]
    ColorMismatch {
        lane: Lane,
        expected: SignalColor,
        actual: SignalColor,
    },

    /// Green went straight to red
    #[error("lane {lane} went from green to red without yellow")]
    SkippedYellow { lane: Lane },

    /// Normal green ended before its minimum without authorisation
    #[error("group '{group}' left green after {served_s:.1}s, minimum is {min_s:.1}s")]
    MinGreenCut {
        group: String,
        served_s: f64,
        min_s: f64,
    },

    /// Normal green planned beyond its maximum
    #[error("group '{group}' planned {planned_s:.1}s green, maximum is {max_s:.1}s")]
    MaxGreenExceeded {
        group: String,
        planned_s: f64,
        max_s: f64,
    },
}

/// Engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Phase layout cannot be built from configuration
    #[error("invalid phase layout: {0}")]
    InvalidLayout(String),

    /// Group index outside the layout
    #[error("unknown phase group index {0}")]
    UnknownGroup(usize),

    /// Operation refused while in fail-safe
    #[error("intersection is in fail-safe: {reason}")]
    FailSafe { reason: String },

    /// Invariant violation
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
