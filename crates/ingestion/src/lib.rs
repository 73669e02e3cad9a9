//! # Ingestion
//!
//! Detection ingestion for the signal controller.
//!
//! Responsibilities:
//! - Aggregate detection batches into per-lane counts (`aggregate`)
//! - Run the external detection adapter off the controller loop
//!   (`InferencePool`, bounded queue + per-call timeout)
//! - Provide mock adapters for tests and model-less runs
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{aggregate, AggregationConfig, InferencePool, MockDetectionAdapter, PoolConfig};
//!
//! let pool = InferencePool::spawn(Arc::new(MockDetectionAdapter::new(Default::default())), PoolConfig::default());
//! let result = pool.infer(image).await;
//! let outcome = match result.detections {
//!     Ok(d) => aggregate(&d, &AggregationConfig::from(&detection_cfg)),
//!     Err(e) => AggregationOutcome::degraded(e.reason()),
//! };
//! ```

mod aggregator;
mod config;
mod error;
mod mock;
mod pool;

// Re-exports
pub use aggregator::{aggregate, AggregationConfig, AggregationOutcome};
pub use config::{InferenceMetrics, MetricsSnapshot, PoolConfig};
pub use error::{IngestionError, Result};
pub use mock::{MockDetectionAdapter, MockDetectionConfig, StaticDetectionAdapter};
pub use pool::{InferencePool, InferenceResult};
