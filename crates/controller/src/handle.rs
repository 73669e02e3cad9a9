//! IntersectionHandle - typed entry point into one controller

use std::sync::Arc;

use contracts::{
    Detection, DetectionReport, EmergencyAck, EmergencyRequest, ImagePayload, IntersectionId,
    IntersectionSnapshot,
};
use dispatcher::{BroadcastHub, Subscription};
use ingestion::{AggregationConfig, InferencePool};
use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};

use crate::error::{ControllerError, Result};
use crate::event::{ControllerEvent, DetectionBatch, OriginSender};

/// Cloneable handle to a running [`IntersectionController`](crate::IntersectionController)
///
/// Every call is answered by the controller task after the input has been
/// applied, so replies reflect the state of the intersection at that point.
#[derive(Clone)]
pub struct IntersectionHandle {
    id: IntersectionId,
    tx: mpsc::Sender<ControllerEvent>,
    hub: Arc<BroadcastHub>,
    pool: Option<Arc<InferencePool>>,
    aggregation: Arc<AggregationConfig>,
}

impl IntersectionHandle {
    pub(crate) fn new(
        id: IntersectionId,
        tx: mpsc::Sender<ControllerEvent>,
        hub: Arc<BroadcastHub>,
        pool: Option<Arc<InferencePool>>,
        aggregation: Arc<AggregationConfig>,
    ) -> Self {
        Self {
            id,
            tx,
            hub,
            pool,
            aggregation,
        }
    }

    pub fn id(&self) -> &IntersectionId {
        &self.id
    }

    /// Controller task still accepts events
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Run the detection adapter on `image` and apply the counts.
    ///
    /// Adapter errors and timeouts degrade the batch to zero counts; only an
    /// unsupported image or a stopped controller return an error.
    #[instrument(
        name = "handle_ingest_image",
        skip(self, image),
        fields(intersection = %self.id, image = %image.name)
    )]
    pub async fn ingest_image(&self, image: ImagePayload) -> Result<DetectionReport> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| ControllerError::NoDetector(self.id.clone()))?;
        image.validate()?;

        let result = pool.infer(image).await;
        let processing_time_ms = result.processing_time_ms();
        let batch = match result.detections {
            Ok(detections) => {
                DetectionBatch::from_detections(&detections, &self.aggregation, processing_time_ms)
            }
            Err(e) => {
                warn!(error = %e, "detection adapter failed, degrading batch");
                DetectionBatch::degraded(e.reason(), processing_time_ms)
            }
        };
        self.submit_batch(batch).await
    }

    /// Apply an already computed detection list.
    pub async fn submit_detections(
        &self,
        detections: &[Detection],
        processing_time_ms: f64,
    ) -> Result<DetectionReport> {
        let batch = DetectionBatch::from_detections(detections, &self.aggregation, processing_time_ms);
        self.submit_batch(batch).await
    }

    pub async fn submit_batch(&self, batch: DetectionBatch) -> Result<DetectionReport> {
        self.request(|reply| ControllerEvent::Detections { batch, reply })
            .await
    }

    pub async fn submit_emergency(&self, request: EmergencyRequest) -> Result<EmergencyAck> {
        self.request(|reply| ControllerEvent::Emergency {
            request,
            origin: None,
            reply,
        })
        .await
    }

    /// Submit an alert; later outcomes (honored, completed, ...) go to `origin`.
    pub async fn submit_emergency_with_origin(
        &self,
        request: EmergencyRequest,
        origin: OriginSender,
    ) -> Result<EmergencyAck> {
        self.request(|reply| ControllerEvent::Emergency {
            request,
            origin: Some(origin),
            reply,
        })
        .await
    }

    /// Hub subscription; covers every intersection sharing the hub.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        self.hub.subscribe(name)
    }

    pub async fn latest_snapshot(&self) -> Result<Arc<IntersectionSnapshot>> {
        self.request(|reply| ControllerEvent::Snapshot { reply })
            .await
    }

    /// Operator reset; the only way out of fail-safe.
    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| ControllerEvent::Reset { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControllerEvent::Shutdown { reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerEvent,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControllerError::stopped(&self.id))?;
        rx.await.map_err(|_| ControllerError::stopped(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{Lane, NextPhaseStrategy, PhaseGroupConfig, TimingConfig};
    use ingestion::{PoolConfig, StaticDetectionAdapter};

    use crate::{ControllerSettings, IntersectionController};

    fn config() -> contracts::IntersectionConfig {
        contracts::IntersectionConfig {
            id: IntersectionId::new("int-h"),
            next_phase: NextPhaseStrategy::RoundRobin,
            timing: TimingConfig::default(),
            phase_groups: vec![
                PhaseGroupConfig {
                    name: "ns".into(),
                    lanes: vec![Lane::North, Lane::South],
                    min_green_s: 5.0,
                    max_green_s: 40.0,
                },
                PhaseGroupConfig {
                    name: "ew".into(),
                    lanes: vec![Lane::East, Lane::West],
                    min_green_s: 5.0,
                    max_green_s: 40.0,
                },
            ],
        }
    }

    fn spawn_with(pool: Option<Arc<InferencePool>>) -> IntersectionHandle {
        let hub = Arc::new(BroadcastHub::new([IntersectionId::new("int-h")], 64));
        let (handle, _task) =
            IntersectionController::spawn(&config(), ControllerSettings::default(), hub, pool)
                .unwrap();
        handle
    }

    fn image() -> ImagePayload {
        ImagePayload::new("frame.jpg", "image/jpeg", Bytes::from_static(&[0xFF, 0xD8, 0xFF]))
    }

    #[tokio::test]
    async fn test_ingest_image_counts_lanes() {
        let adapter = StaticDetectionAdapter::new(vec![
            Detection::new("car", 0.9, Lane::North),
            Detection::new("car", 0.8, Lane::North),
            Detection::new("bus", 0.7, Lane::West),
        ]);
        let pool = InferencePool::spawn(Arc::new(adapter), PoolConfig::default());
        let handle = spawn_with(Some(Arc::new(pool)));

        let report = handle.ingest_image(image()).await.unwrap();
        assert_eq!(report.total_vehicles, 3);
        assert_eq!(report.lane_counts.get(&Lane::North), Some(&2));
        assert!(report.degraded.is_none());

        let snapshot = handle.latest_snapshot().await.unwrap();
        assert_eq!(snapshot.total_vehicles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_timeout_degrades() {
        let adapter = StaticDetectionAdapter::new(vec![Detection::new("car", 0.9, Lane::North)])
            .with_latency(Duration::from_secs(10));
        let config = PoolConfig {
            timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        };
        let pool = InferencePool::spawn(Arc::new(adapter), config);
        let handle = spawn_with(Some(Arc::new(pool)));

        let report = handle.ingest_image(image()).await.unwrap();
        assert_eq!(report.total_vehicles, 0);
        assert!(report.degraded.is_some());
    }

    #[tokio::test]
    async fn test_ingest_without_detector() {
        let handle = spawn_with(None);
        assert!(matches!(
            handle.ingest_image(image()).await,
            Err(ControllerError::NoDetector(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_image_rejected() {
        let adapter = StaticDetectionAdapter::new(Vec::new());
        let pool = InferencePool::spawn(Arc::new(adapter), PoolConfig::default());
        let handle = spawn_with(Some(Arc::new(pool)));

        let bad = ImagePayload::new("notes.txt", "text/plain", Bytes::from_static(b"hi"));
        assert!(matches!(
            handle.ingest_image(bad).await,
            Err(ControllerError::Contract(_))
        ));
    }
}
