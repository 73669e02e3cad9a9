//! Run orchestration module.

mod orchestrator;
mod scenario;
mod stats;

pub use orchestrator::{Pipeline, RunConfig};
pub use scenario::{check_speed, Scenario};
pub use stats::RunStats;
