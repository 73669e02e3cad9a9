//! Dispatcher - builds push observers from configuration and attaches them to the hub

use std::sync::Arc;

use tracing::{info, instrument};

use contracts::{ObserverConfig, ObserverType};

use crate::error::DispatcherError;
use crate::handle::ObserverHandle;
use crate::hub::BroadcastHub;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink, NetworkSink};

/// Create one observer and subscribe it to `hub`
#[instrument(
    name = "dispatcher_create_observer",
    skip(config, hub),
    fields(observer = %config.name, observer_type = ?config.observer_type)
)]
pub async fn create_observer(
    config: &ObserverConfig,
    hub: &BroadcastHub,
) -> Result<ObserverHandle, DispatcherError> {
    // Sink first: a failed sink must not leave a dangling subscriber
    match config.observer_type {
        ObserverType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(ObserverHandle::spawn(sink, subscribe(config, hub)))
        }
        ObserverType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::observer_creation(&config.name, e.to_string()))?;
            Ok(ObserverHandle::spawn(sink, subscribe(config, hub)))
        }
        ObserverType::Network => {
            let sink = NetworkSink::from_params(&config.name, &config.params)
                .await
                .map_err(|e| DispatcherError::observer_creation(&config.name, e.to_string()))?;
            Ok(ObserverHandle::spawn(sink, subscribe(config, hub)))
        }
    }
}

fn subscribe(config: &ObserverConfig, hub: &BroadcastHub) -> crate::hub::Subscription {
    hub.subscribe_with_capacity(&config.name, config.queue_capacity)
}

/// Running set of configured observers
pub struct Dispatcher {
    hub: Arc<BroadcastHub>,
    handles: Vec<ObserverHandle>,
}

impl Dispatcher {
    /// Create every configured observer. Fails on the first observer that
    /// cannot be created, shutting down the ones already started.
    #[instrument(
        name = "dispatcher_start",
        skip(configs, hub),
        fields(observer_count = configs.len())
    )]
    pub async fn start(
        configs: &[ObserverConfig],
        hub: Arc<BroadcastHub>,
    ) -> Result<Self, DispatcherError> {
        let mut dispatcher = Self {
            hub,
            handles: Vec::with_capacity(configs.len()),
        };
        for config in configs {
            match create_observer(config, &dispatcher.hub).await {
                Ok(handle) => dispatcher.handles.push(handle),
                Err(e) => {
                    dispatcher.shutdown().await;
                    return Err(e);
                }
            }
        }
        info!(observers = dispatcher.handles.len(), "Dispatcher started");
        Ok(dispatcher)
    }

    /// Dispatcher over already spawned handles (for testing)
    pub fn with_handles(hub: Arc<BroadcastHub>, handles: Vec<ObserverHandle>) -> Self {
        Self { hub, handles }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Get metrics for all observers
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Detach every observer from the hub, then flush and close its sink
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(self) {
        for handle in self.handles {
            self.hub.unsubscribe(handle.subscriber_id());
            handle.shutdown().await;
        }
        info!("Dispatcher shutdown complete");
    }
}
