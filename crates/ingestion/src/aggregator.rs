//! Lane aggregation
//!
//! Turns one batch of detections into per-lane vehicle counts and emergency
//! flags. Pure and deterministic for a given batch.

use std::collections::HashSet;

use contracts::{empty_lane_counts, Detection, DetectionConfig, Lane, LaneCounts};
use tracing::warn;

/// Aggregation settings derived from [`DetectionConfig`]
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub confidence_threshold: f64,
    pub emergency_classes: HashSet<String>,
    /// Empty counts every class
    pub vehicle_classes: HashSet<String>,
}

impl AggregationConfig {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
            emergency_classes: HashSet::new(),
            vehicle_classes: HashSet::new(),
        }
    }

    pub fn with_emergency_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.emergency_classes = normalize(classes);
        self
    }

    pub fn with_vehicle_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vehicle_classes = normalize(classes);
        self
    }

    fn is_emergency(&self, class: &str) -> bool {
        self.emergency_classes.contains(class)
    }

    fn is_counted(&self, class: &str) -> bool {
        self.vehicle_classes.is_empty()
            || self.vehicle_classes.contains(class)
            || self.is_emergency(class)
    }
}

impl From<&DetectionConfig> for AggregationConfig {
    fn from(cfg: &DetectionConfig) -> Self {
        Self::new(cfg.confidence_threshold)
            .with_emergency_classes(&cfg.emergency_classes)
            .with_vehicle_classes(&cfg.vehicle_classes)
    }
}

fn normalize<I, S>(classes: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    classes
        .into_iter()
        .map(|c| c.as_ref().trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Aggregation result
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOutcome {
    /// One entry per lane, zero when nothing was counted
    pub counts: LaneCounts,
    /// Detections that passed the confidence threshold
    pub accepted: usize,
    /// Reason the batch was degraded to zero counts
    pub degraded: Option<String>,
}

impl AggregationOutcome {
    /// Zero counts with a degrade reason.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            counts: empty_lane_counts(),
            accepted: 0,
            degraded: Some(reason.into()),
        }
    }

    pub fn total_vehicles(&self) -> u32 {
        self.counts.values().map(|c| c.vehicle_count).sum()
    }

    pub fn emergency_lanes(&self) -> Vec<Lane> {
        self.counts
            .iter()
            .filter(|(_, c)| c.has_emergency_vehicle)
            .map(|(l, _)| *l)
            .collect()
    }
}

/// Aggregate a detection batch into lane counts.
///
/// A batch holding any malformed detection (confidence outside `[0, 1]` or
/// NaN, non-finite or inverted box) is degraded as a whole.
pub fn aggregate(detections: &[Detection], cfg: &AggregationConfig) -> AggregationOutcome {
    if let Some((idx, why)) = detections
        .iter()
        .enumerate()
        .find_map(|(i, d)| malformed(d).map(|why| (i, why)))
    {
        warn!(index = idx, reason = why, "malformed detection, batch degraded");
        return AggregationOutcome::degraded(format!("malformed detection #{idx}: {why}"));
    }

    let mut counts = empty_lane_counts();
    let mut accepted = 0;

    for d in detections {
        if d.confidence < cfg.confidence_threshold {
            continue;
        }
        accepted += 1;

        let class = d.class.trim().to_ascii_lowercase();
        let entry = counts.entry(d.assigned_lane).or_default();
        if cfg.is_emergency(&class) {
            entry.has_emergency_vehicle = true;
        }
        if cfg.is_counted(&class) {
            entry.vehicle_count += 1;
        }
    }

    AggregationOutcome {
        counts,
        accepted,
        degraded: None,
    }
}

fn malformed(d: &Detection) -> Option<&'static str> {
    if !(0.0..=1.0).contains(&d.confidence) {
        return Some("confidence outside [0, 1]");
    }
    if !d.bounding_box.is_well_formed() {
        return Some("invalid bounding box");
    }
    None
}
