//! Run orchestrator - wires hub, observers, detector and controllers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use contracts::{ControllerBlueprint, ImagePayload, PushMessage};
use controller::{IntersectionHandle, IntersectionRegistry};
use dispatcher::{BroadcastHub, Dispatcher, Subscription};
use ingestion::{InferencePool, MockDetectionAdapter, MockDetectionConfig, PoolConfig};
use observability::{ControllerMetricsAggregator, MetricsSummary};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::scenario::{ReplayStats, Scenario};
use super::RunStats;

/// JPEG start and end markers; the mock detector ignores pixel data.
const SYNTHETIC_JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\xff\xd9";

const SUMMARY_QUEUE: usize = 1024;

/// Run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub blueprint: ControllerBlueprint,

    /// Stop after this long (None = until signal, or until the scenario ends)
    pub duration: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    pub scenario: Option<Scenario>,

    /// Scenario replay speed multiplier (1.0 = recorded offsets)
    pub replay_speed: f64,

    /// Period of synthetic images fed through the mock detector (None = off)
    pub mock_feed: Option<Duration>,

    /// Mock detector RNG seed
    pub seed: u64,
}

/// Main run orchestrator
pub struct Pipeline {
    config: RunConfig,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Run until the duration elapses, `shutdown` resolves or, without a
    /// duration, the scenario has been replayed.
    pub async fn run<F>(self, shutdown: F) -> Result<RunStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let config = self.config;
        let blueprint = &config.blueprint;

        if let Some(port) = config.metrics_port {
            observability::init_metrics_only(port)?;
        }

        let hub = Arc::new(BroadcastHub::from_blueprint(blueprint));

        if blueprint.observers.is_empty() {
            warn!("No observers configured - push messages only reach the run summary");
        }
        let dispatcher = Dispatcher::start(&blueprint.observers, hub.clone())
            .await
            .context("Failed to start observers")?;

        let summary = hub.subscribe_with_capacity("run-summary", SUMMARY_QUEUE);
        let summary_id = summary.id();
        let summary_task = tokio::spawn(summarize(summary));

        let pool = config.mock_feed.map(|_| {
            let adapter = MockDetectionAdapter::new(MockDetectionConfig {
                seed: config.seed,
                ..Default::default()
            });
            Arc::new(InferencePool::spawn(
                Arc::new(adapter),
                PoolConfig::from(&blueprint.detection),
            ))
        });

        let mut registry = match IntersectionRegistry::spawn(blueprint, hub.clone(), pool.clone())
            .await
        {
            Ok(registry) => registry,
            Err(e) => {
                dispatcher.shutdown().await;
                return Err(e).context("Failed to start intersection controllers");
            }
        };

        info!(
            intersections = registry.len(),
            observers = dispatcher.len(),
            mock_feed = ?config.mock_feed,
            scenario_steps = config.scenario.as_ref().map_or(0, Scenario::len),
            "Controllers running"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let feed = config.mock_feed.map(|period| {
            let handles: Vec<IntersectionHandle> = registry.handles().cloned().collect();
            tokio::spawn(feed_images(handles, period, stop_rx))
        });

        let replay = wait_for_stop(&registry, &config, shutdown).await;

        // Teardown, producers first
        info!("Shutting down...");
        let _ = stop_tx.send(true);
        let images_ingested = match feed {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "image feed task failed");
                0
            }),
            None => 0,
        };

        registry.shutdown().await;

        if let Some(pool) = pool {
            match Arc::try_unwrap(pool) {
                Ok(pool) => pool.shutdown().await,
                Err(_) => warn!("inference pool still referenced, skipping drain"),
            }
        }

        let observers = dispatcher.metrics();
        dispatcher.shutdown().await;

        hub.unsubscribe(summary_id);
        let metrics = summary_task.await.unwrap_or_else(|e| {
            warn!(error = %e, "summary task failed");
            MetricsSummary::default()
        });

        let stats = RunStats {
            duration: start_time.elapsed(),
            intersections: blueprint.intersections.len(),
            images_ingested,
            replay,
            hub_events_dropped: hub.metrics().events_dropped(),
            observers,
            metrics,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            snapshots = stats.metrics.snapshots,
            "Run complete"
        );
        Ok(stats)
    }
}

async fn wait_for_stop<F>(
    registry: &IntersectionRegistry,
    config: &RunConfig,
    shutdown: F,
) -> Option<ReplayStats>
where
    F: Future<Output = ()>,
{
    let deadline = async {
        match config.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    let mut replay = None;
    if let Some(scenario) = &config.scenario {
        tokio::select! {
            stats = scenario.replay(registry, config.replay_speed) => {
                info!(
                    steps = stats.steps,
                    failed = stats.failed,
                    alerts_accepted = stats.alerts_accepted,
                    "Scenario finished"
                );
                replay = Some(stats);
                if config.duration.is_none() {
                    return replay;
                }
            }
            _ = &mut deadline => {
                warn!("Run duration elapsed before the scenario finished");
                return replay;
            }
            _ = &mut shutdown => {
                warn!("Received shutdown signal during scenario replay");
                return replay;
            }
        }
    }

    tokio::select! {
        _ = &mut deadline => info!("Run duration elapsed"),
        _ = &mut shutdown => warn!("Received shutdown signal"),
    }
    replay
}

/// Push one synthetic image per intersection every `period`.
/// Returns the number of images that produced a report.
async fn feed_images(
    handles: Vec<IntersectionHandle>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0u64;
    let mut ingested = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        for handle in &handles {
            let image = ImagePayload::new(
                format!("{}-{frame}.jpg", handle.id()),
                "image/jpeg",
                Bytes::from_static(SYNTHETIC_JPEG),
            );
            match handle.ingest_image(image).await {
                Ok(report) => {
                    ingested += 1;
                    debug!(
                        intersection = %handle.id(),
                        vehicles = report.total_vehicles,
                        "synthetic image ingested"
                    );
                }
                Err(e) => warn!(intersection = %handle.id(), error = %e, "synthetic image rejected"),
            }
        }
        frame += 1;
    }
    ingested
}

async fn summarize(mut subscription: Subscription) -> MetricsSummary {
    let mut aggregator = ControllerMetricsAggregator::new();
    while let Some(message) = subscription.recv().await {
        match &message {
            PushMessage::IntersectionStatus(snapshot) => aggregator.update_snapshot(snapshot),
            PushMessage::VehicleDetection(report) => aggregator.update_detection(report),
            PushMessage::AlertOutcome(outcome) => aggregator.update_outcome(outcome),
            PushMessage::EmergencyAlert(_) => {}
        }
    }
    aggregator.summary()
}
