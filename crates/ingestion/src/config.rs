//! Inference pool configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use contracts::DetectionConfig;

/// Inference pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker task count
    pub workers: usize,

    /// Pending job capacity; submitters wait when full
    pub queue_capacity: usize,

    /// Per-call adapter timeout
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for PoolConfig {
    fn from(cfg: &DetectionConfig) -> Self {
        Self {
            workers: cfg.workers.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            timeout: cfg.timeout(),
        }
    }
}

/// Inference metrics
#[derive(Debug, Default)]
pub struct InferenceMetrics {
    /// Jobs accepted into the queue
    pub jobs_submitted: AtomicU64,

    /// Jobs answered with detections
    pub jobs_succeeded: AtomicU64,

    /// Jobs whose adapter call errored
    pub jobs_failed: AtomicU64,

    /// Jobs whose adapter call timed out
    pub jobs_timed_out: AtomicU64,

    /// Current queue length
    pub queue_len: AtomicUsize,
}

impl InferenceMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Update queue length
    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub queue_len: usize,
}
