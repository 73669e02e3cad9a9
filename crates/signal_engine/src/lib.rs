//! # Signal Engine
//!
//! Core signal control logic for one intersection, free of I/O and clocks.
//!
//! - [`TimingPolicy`]: density-based green allocation and next-group selection
//! - [`SignalStateMachine`]: authoritative phase state with safety invariants
//!   and the fail-safe all-red state
//! - [`OverrideCoordinator`]: emergency alert queue, preemption and
//!   schedule restoration
//!
//! Every operation takes the current `Instant` from the caller. The
//! intersection controller is expected to run, per event:
//! `coordinator.tick` → `state_machine.tick` → `state_machine.enforce_invariants`.

mod coordinator;
mod error;
mod layout;
mod policy;
mod state_machine;

pub use coordinator::{AlertEvent, CoordinatorConfig, OverrideCoordinator, SubmitOutcome};
pub use error::{EngineError, InvariantViolation};
pub use layout::{PhaseGroup, PhaseLayout};
pub use policy::TimingPolicy;
pub use state_machine::{
    GreenMode, GreenPlan, OverrideGrant, Preemption, RestorePoint, SignalState,
    SignalStateMachine, Transition,
};
