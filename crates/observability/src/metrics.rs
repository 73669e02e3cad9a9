//! Controller metrics
//!
//! Records `metrics` facade values from published snapshots, detection
//! reports and alert outcomes, and aggregates them in memory for run summaries.

use std::collections::{BTreeMap, HashMap};

use contracts::{AlertOutcome, AlertOutcomeKind, DetectionReport, IntersectionSnapshot};
use metrics::{counter, gauge, histogram};

/// Record gauges for one published snapshot.
///
/// # Example
///
/// ```ignore
/// let snapshot = hub.publish(build_snapshot(&sm, now));
/// observability::record_snapshot_metrics(&snapshot);
/// ```
pub fn record_snapshot_metrics(snapshot: &IntersectionSnapshot) {
    let id = snapshot.intersection_id.to_string();

    counter!("aisc_snapshots_total", "intersection" => id.clone()).increment(1);
    gauge!("aisc_sequence", "intersection" => id.clone()).set(snapshot.sequence as f64);
    gauge!("aisc_total_vehicles", "intersection" => id.clone()).set(snapshot.total_vehicles as f64);
    gauge!("aisc_efficiency_score", "intersection" => id.clone()).set(snapshot.efficiency_score);
    gauge!("aisc_queued_alerts", "intersection" => id.clone()).set(snapshot.queued_alerts as f64);
    gauge!("aisc_cycle_count", "intersection" => id.clone()).set(snapshot.cycle_count as f64);
    gauge!("aisc_emergency_mode", "intersection" => id.clone())
        .set(if snapshot.emergency_mode { 1.0 } else { 0.0 });
    gauge!("aisc_fail_safe", "intersection" => id.clone())
        .set(if snapshot.is_failed() { 1.0 } else { 0.0 });

    for (lane, count) in &snapshot.lane_counts {
        gauge!(
            "aisc_lane_vehicles",
            "intersection" => id.clone(),
            "lane" => lane.as_str()
        )
        .set(count.vehicle_count as f64);
    }
}

/// Record one detection ingestion
pub fn record_detection_report(report: &DetectionReport) {
    let id = report.intersection_id.to_string();

    counter!("aisc_detection_batches_total", "intersection" => id.clone()).increment(1);
    histogram!("aisc_detection_processing_ms", "intersection" => id.clone())
        .record(report.processing_time_ms);
    histogram!("aisc_detection_vehicles", "intersection" => id.clone())
        .record(report.total_vehicles as f64);

    if let Some(reason) = &report.degraded {
        counter!(
            "aisc_detection_degraded_total",
            "intersection" => id.clone(),
            "reason" => reason.clone()
        )
        .increment(1);
    }
    if !report.emergency_lanes.is_empty() {
        counter!("aisc_emergency_detections_total", "intersection" => id)
            .increment(report.emergency_lanes.len() as u64);
    }
}

/// Record one alert lifecycle event
pub fn record_alert_outcome(outcome: &AlertOutcome) {
    counter!(
        "aisc_alert_outcomes_total",
        "intersection" => outcome.intersection_id.to_string(),
        "outcome" => outcome.kind.as_str()
    )
    .increment(1);
}

/// In-memory aggregation across a run, for the CLI summary
#[derive(Debug, Clone, Default)]
pub struct ControllerMetricsAggregator {
    pub snapshots: u64,
    pub detection_batches: u64,
    pub degraded_batches: u64,
    /// Snapshots that carried a failure
    pub fail_safe_snapshots: u64,
    pub efficiency_stats: RunningStats,
    pub vehicle_stats: RunningStats,
    pub processing_ms_stats: RunningStats,
    pub outcome_counts: HashMap<AlertOutcomeKind, u64>,
    /// Latest cycle count per intersection
    pub cycles: BTreeMap<String, u64>,
}

impl ControllerMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
        self.snapshots += 1;
        if snapshot.is_failed() {
            self.fail_safe_snapshots += 1;
        }
        self.efficiency_stats.push(snapshot.efficiency_score);
        self.cycles
            .insert(snapshot.intersection_id.to_string(), snapshot.cycle_count);
    }

    pub fn update_detection(&mut self, report: &DetectionReport) {
        self.detection_batches += 1;
        if report.degraded.is_some() {
            self.degraded_batches += 1;
        }
        self.vehicle_stats.push(report.total_vehicles as f64);
        self.processing_ms_stats.push(report.processing_time_ms);
    }

    pub fn update_outcome(&mut self, outcome: &AlertOutcome) {
        *self.outcome_counts.entry(outcome.kind).or_insert(0) += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        let mut outcomes: Vec<(String, u64)> = self
            .outcome_counts
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect();
        outcomes.sort();

        MetricsSummary {
            snapshots: self.snapshots,
            detection_batches: self.detection_batches,
            degraded_batches: self.degraded_batches,
            degraded_rate: if self.detection_batches > 0 {
                self.degraded_batches as f64 / self.detection_batches as f64 * 100.0
            } else {
                0.0
            },
            fail_safe_snapshots: self.fail_safe_snapshots,
            efficiency: StatsSummary::from(&self.efficiency_stats),
            vehicles: StatsSummary::from(&self.vehicle_stats),
            processing_ms: StatsSummary::from(&self.processing_ms_stats),
            outcomes,
            cycles: self.cycles.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub snapshots: u64,
    pub detection_batches: u64,
    pub degraded_batches: u64,
    pub degraded_rate: f64,
    pub fail_safe_snapshots: u64,
    pub efficiency: StatsSummary,
    pub vehicles: StatsSummary,
    pub processing_ms: StatsSummary,
    /// Alert outcome counts, sorted by outcome name
    pub outcomes: Vec<(String, u64)>,
    pub cycles: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Controller Metrics Summary ===")?;
        writeln!(f, "Snapshots: {}", self.snapshots)?;
        writeln!(
            f,
            "Detection batches: {} (degraded {}, {:.2}%)",
            self.detection_batches, self.degraded_batches, self.degraded_rate
        )?;
        writeln!(f, "Fail-safe snapshots: {}", self.fail_safe_snapshots)?;
        writeln!(f, "Efficiency: {}", self.efficiency)?;
        writeln!(f, "Vehicles per batch: {}", self.vehicles)?;
        writeln!(f, "Processing (ms): {}", self.processing_ms)?;

        if !self.outcomes.is_empty() {
            writeln!(f, "Alert outcomes:")?;
            for (kind, count) in &self.outcomes {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }
        if !self.cycles.is_empty() {
            writeln!(f, "Completed phases:")?;
            for (id, cycles) in &self.cycles {
                writeln!(f, "  {}: {}", id, cycles)?;
            }
        }

        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean / variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
