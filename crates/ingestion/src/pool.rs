//! Inference pool
//!
//! Runs the detection adapter on a fixed set of worker tasks so a slow model
//! never blocks an intersection's event loop. Every call is bounded by a
//! timeout; the caller receives either detections or an [`IngestionError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{bounded, Receiver, Sender};
use contracts::{Detection, DetectionAdapter, ImagePayload};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{InferenceMetrics, PoolConfig};
use crate::error::{IngestionError, Result};

/// Answer of one inference job
#[derive(Debug)]
pub struct InferenceResult {
    pub detections: Result<Vec<Detection>>,
    /// Wall time from submission to answer
    pub elapsed: Duration,
}

impl InferenceResult {
    pub fn processing_time_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

struct InferenceJob {
    image: ImagePayload,
    submitted_at: Instant,
    reply: oneshot::Sender<InferenceResult>,
}

/// Multi-worker inference pool
pub struct InferencePool {
    adapter_name: String,
    tx: Sender<InferenceJob>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<InferenceMetrics>,
}

impl InferencePool {
    /// Spawn `config.workers` tasks sharing `adapter`.
    #[instrument(
        name = "inference_pool_spawn",
        skip(adapter, config),
        fields(adapter_name = adapter.name(), workers = config.workers)
    )]
    pub fn spawn<A>(adapter: Arc<A>, config: PoolConfig) -> Self
    where
        A: DetectionAdapter + Sync + 'static,
    {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let metrics = Arc::new(InferenceMetrics::new());
        let adapter_name = adapter.name().to_string();

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(inference_worker(
                    worker_id,
                    adapter.clone(),
                    rx.clone(),
                    config.timeout,
                    metrics.clone(),
                ))
            })
            .collect();

        info!(adapter = %adapter_name, "inference pool started");

        Self {
            adapter_name,
            tx,
            workers,
            metrics,
        }
    }

    /// Adapter name
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Metrics
    pub fn metrics(&self) -> &Arc<InferenceMetrics> {
        &self.metrics
    }

    /// Queue one image and wait for its detections.
    ///
    /// Waits for queue space when every worker is busy and the queue is full.
    pub async fn infer(&self, image: ImagePayload) -> InferenceResult {
        let submitted_at = Instant::now();
        let name = image.name.clone();
        let (reply, rx) = oneshot::channel();

        let job = InferenceJob {
            image,
            submitted_at,
            reply,
        };
        if self.tx.send(job).await.is_err() {
            return InferenceResult {
                detections: Err(IngestionError::PoolClosed),
                elapsed: submitted_at.elapsed(),
            };
        }
        self.metrics.record_submitted();
        self.metrics.update_queue_len(self.tx.len());

        match rx.await {
            Ok(result) => result,
            Err(_) => InferenceResult {
                detections: Err(IngestionError::WorkerLost { image: name }),
                elapsed: submitted_at.elapsed(),
            },
        }
    }

    /// Stop accepting jobs, drain the queue and wait for workers.
    pub async fn shutdown(self) {
        self.tx.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(adapter = %self.adapter_name, error = %e, "inference worker panicked");
            }
        }
        info!(adapter = %self.adapter_name, "inference pool stopped");
    }
}

async fn inference_worker<A>(
    worker_id: usize,
    adapter: Arc<A>,
    rx: Receiver<InferenceJob>,
    timeout: Duration,
    metrics: Arc<InferenceMetrics>,
) where
    A: DetectionAdapter + Sync + 'static,
{
    debug!(worker_id, adapter = adapter.name(), "inference worker started");

    while let Ok(job) = rx.recv().await {
        metrics.update_queue_len(rx.len());

        let detections = match tokio::time::timeout(timeout, adapter.detect(&job.image)).await {
            Ok(Ok(detections)) => {
                metrics.record_succeeded();
                Ok(detections)
            }
            Ok(Err(e)) => {
                metrics.record_failed();
                metrics::counter!("aisc_inference_failures_total").increment(1);
                warn!(worker_id, image = %job.image.name, error = %e, "detection adapter failed");
                Err(IngestionError::Adapter {
                    adapter: adapter.name().to_string(),
                    source: e,
                })
            }
            Err(_) => {
                metrics.record_timed_out();
                metrics::counter!("aisc_inference_timeouts_total").increment(1);
                warn!(
                    worker_id,
                    image = %job.image.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "detection adapter timed out"
                );
                Err(IngestionError::Timeout {
                    adapter: adapter.name().to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        };

        let elapsed = job.submitted_at.elapsed();
        metrics::histogram!("aisc_inference_latency_ms").record(elapsed.as_secs_f64() * 1000.0);

        // Submitter may have gone away
        let _ = job.reply.send(InferenceResult {
            detections,
            elapsed,
        });
    }

    debug!(worker_id, "inference worker exiting");
}
