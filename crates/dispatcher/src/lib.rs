//! # Dispatcher
//!
//! Real-time push channel.
//!
//! Responsibilities:
//! - `BroadcastHub`: one channel per configured intersection, each with a
//!   latest-wins status slot and bounded event queues per subscriber;
//!   publishing never blocks the controllers
//! - Observers (`ObserverHandle`): one worker per configured sink, isolated
//!   from every other observer
//! - Sinks: log, JSON Lines file and UDP JSON

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod hub;
pub mod metrics;
pub mod sinks;

pub use contracts::{PushMessage, PushSink};
pub use dispatcher::{create_observer, Dispatcher};
pub use error::DispatcherError;
pub use handle::ObserverHandle;
pub use hub::{BroadcastHub, HubMetrics, Subscription};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, FileSinkConfig, LogSink, NetworkSink, NetworkSinkConfig};
