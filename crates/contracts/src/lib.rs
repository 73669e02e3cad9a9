//! # Contracts
//!
//! Frozen interface contracts shared by every AISC crate: the signal data
//! model, the static configuration blueprint, the error type and the trait
//! seams to external collaborators (detection model, push observers).
//! Business crates depend on this crate only; reverse dependencies are
//! prohibited.
//!
//! ## Time Model
//! - Engine deadlines are monotonic `std::time::Instant` values supplied by the
//!   caller (never read from a global clock inside the engine)
//! - Wire-facing timestamps (`created_at`, snapshot `timestamp`) are UTC
//!   `chrono::DateTime` values
//! - Durations in configuration and on the wire are `f64` seconds

mod adapter;
mod alert;
mod blueprint;
mod detection;
mod error;
mod intersection_id;
mod lane;
mod sink;
mod snapshot;

pub use adapter::DetectionAdapter;
pub use alert::*;
pub use blueprint::*;
pub use detection::*;
pub use error::*;
pub use intersection_id::IntersectionId;
pub use lane::*;
pub use sink::PushSink;
pub use snapshot::*;
