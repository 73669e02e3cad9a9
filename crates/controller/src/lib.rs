//! # Controller
//!
//! Runtime of the signal controller: one single-owner task per intersection.
//!
//! - [`IntersectionController`]: event loop applying timer expiry, detection
//!   batches and emergency requests in arrival order, then publishing a
//!   snapshot to the [`BroadcastHub`](dispatcher::BroadcastHub)
//! - [`IntersectionHandle`]: cloneable, typed entry point (ingestion,
//!   emergency submission, snapshot query, reset, shutdown)
//! - [`IntersectionRegistry`]: spawns and stops the controllers of a blueprint
//!
//! ## Usage Example
//!
//! ```ignore
//! let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
//! let mut registry = IntersectionRegistry::spawn(&blueprint, hub, Some(pool)).await?;
//! let handle = registry.get(&IntersectionId::new("main-st"))?;
//! let ack = handle.submit_emergency(request).await?;
//! registry.shutdown().await;
//! ```

mod actor;
mod error;
mod event;
mod handle;
mod registry;
mod snapshot;

pub use actor::IntersectionController;
pub use error::{ControllerError, Result};
pub use event::{ControllerEvent, ControllerSettings, DetectionBatch, OriginSender};
pub use handle::IntersectionHandle;
pub use registry::IntersectionRegistry;
pub use snapshot::{build_snapshot, efficiency_score};
