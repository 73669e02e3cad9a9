//! ControllerBlueprint - Config Loader output
//!
//! Static configuration of the whole controller: detection settings, alert
//! handling, per-intersection phase layout and timing, and push observers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::{IntersectionId, Lane};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete controller blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    #[validate(nested)]
    pub detection: DetectionConfig,

    #[serde(default)]
    #[validate(nested)]
    pub emergency: EmergencyConfig,

    #[serde(default)]
    #[validate(nested)]
    pub hub: HubConfig,

    #[serde(default)]
    #[validate(nested)]
    pub controller: ControllerConfig,

    #[validate(length(min = 1), nested)]
    pub intersections: Vec<IntersectionConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub observers: Vec<ObserverConfig>,
}

impl ControllerBlueprint {
    /// Blueprint with default settings for the given intersections.
    pub fn with_intersections(intersections: Vec<IntersectionConfig>) -> Self {
        Self {
            version: ConfigVersion::V1,
            detection: DetectionConfig::default(),
            emergency: EmergencyConfig::default(),
            hub: HubConfig::default(),
            controller: ControllerConfig::default(),
            intersections,
            observers: Vec::new(),
        }
    }
}

// ========== Detection ==========

/// Lane aggregation and inference pool settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DetectionConfig {
    /// Detections below this confidence are discarded
    #[serde(default = "default_confidence_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f64,

    /// Classes that flag a lane as carrying an emergency vehicle
    #[serde(default = "default_emergency_classes")]
    pub emergency_classes: Vec<String>,

    /// Classes counted as vehicles; empty counts every class
    #[serde(default = "default_vehicle_classes")]
    pub vehicle_classes: Vec<String>,

    /// Per-call detection adapter timeout
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    /// Inference worker count
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 64))]
    pub workers: usize,

    /// Pending inference jobs before submitters wait
    #[serde(default = "default_detection_queue")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Raise an alert when a batch contains an emergency vehicle
    #[serde(default = "default_true")]
    pub auto_alert: bool,

    #[serde(default = "default_auto_alert_priority")]
    #[validate(range(min = 1, max = 5))]
    pub auto_alert_priority: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            emergency_classes: default_emergency_classes(),
            vehicle_classes: default_vehicle_classes(),
            timeout_ms: default_timeout_ms(),
            workers: default_workers(),
            queue_capacity: default_detection_queue(),
            auto_alert: true,
            auto_alert_priority: default_auto_alert_priority(),
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_confidence_threshold() -> f64 {
    0.4
}

fn default_emergency_classes() -> Vec<String> {
    ["ambulance", "fire_truck", "police", "rescue"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_vehicle_classes() -> Vec<String> {
    ["car", "motorcycle", "bus", "truck"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_workers() -> usize {
    2
}

fn default_detection_queue() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_auto_alert_priority() -> u8 {
    3
}

// ========== Emergency ==========

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EmergencyConfig {
    /// TTL applied to requests that carry none
    #[serde(default = "default_ttl_s")]
    #[validate(range(exclusive_min = 0.0, max = 86_400.0))]
    pub default_ttl_s: f64,

    /// Resolved alert ids remembered for duplicate detection
    #[serde(default = "default_recent_id_window")]
    pub recent_id_window: usize,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            default_ttl_s: default_ttl_s(),
            recent_id_window: default_recent_id_window(),
        }
    }
}

fn default_ttl_s() -> f64 {
    120.0
}

fn default_recent_id_window() -> usize {
    256
}

// ========== Hub / Controller ==========

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// Per-subscriber event queue capacity
    #[serde(default = "default_event_queue_capacity")]
    #[validate(range(min = 1))]
    pub event_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

fn default_event_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    #[serde(default = "default_mailbox_capacity")]
    #[validate(range(min = 1))]
    pub mailbox_capacity: usize,

    /// Periodic status publication interval
    #[serde(default = "default_status_interval_ms")]
    #[validate(range(min = 10))]
    pub status_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_status_interval_ms() -> u64 {
    1000
}

// ========== Intersection ==========

/// One intersection's phase layout and timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IntersectionConfig {
    pub id: IntersectionId,

    #[serde(default)]
    pub next_phase: NextPhaseStrategy,

    #[serde(default)]
    #[validate(nested)]
    pub timing: TimingConfig,

    /// Cyclic list of phase groups; the first one starts green
    #[validate(length(min = 2), nested)]
    pub phase_groups: Vec<PhaseGroupConfig>,
}

impl IntersectionConfig {
    /// Index of the group containing `lane`.
    pub fn group_of(&self, lane: Lane) -> Option<usize> {
        self.phase_groups.iter().position(|g| g.lanes.contains(&lane))
    }
}

/// Selection of the group that follows a normal green
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextPhaseStrategy {
    /// (current + 1) mod n
    #[default]
    RoundRobin,
    /// Largest proposed duration, ties in cyclic order
    Demand,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimingConfig {
    #[serde(default = "default_yellow_s")]
    #[validate(range(exclusive_min = 0.0))]
    pub yellow_s: f64,

    #[serde(default = "default_base_duration_s")]
    #[validate(range(min = 0.0))]
    pub base_duration_s: f64,

    /// Seconds added per counted vehicle
    #[serde(default = "default_density_factor_s")]
    #[validate(range(min = 0.0))]
    pub density_factor_s: f64,

    /// Hold time of an emergency override green
    #[serde(default = "default_override_duration_s")]
    #[validate(range(exclusive_min = 0.0))]
    pub override_duration_s: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            yellow_s: default_yellow_s(),
            base_duration_s: default_base_duration_s(),
            density_factor_s: default_density_factor_s(),
            override_duration_s: default_override_duration_s(),
        }
    }
}

fn default_yellow_s() -> f64 {
    3.0
}

fn default_base_duration_s() -> f64 {
    30.0
}

fn default_density_factor_s() -> f64 {
    2.0
}

fn default_override_duration_s() -> f64 {
    60.0
}

/// Set of mutually non-conflicting lanes
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PhaseGroupConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub lanes: Vec<Lane>,

    #[serde(default = "default_min_green_s")]
    #[validate(range(min = 0.0))]
    pub min_green_s: f64,

    #[serde(default = "default_max_green_s")]
    #[validate(range(exclusive_min = 0.0))]
    pub max_green_s: f64,
}

fn default_min_green_s() -> f64 {
    10.0
}

fn default_max_green_s() -> f64 {
    120.0
}

// ========== Observers ==========

/// Push observer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObserverConfig {
    #[validate(length(min = 1))]
    pub name: String,

    pub observer_type: ObserverType,

    /// Event queue capacity of the observer's subscription
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverType {
    Log,
    File,
    Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intersection() -> IntersectionConfig {
        IntersectionConfig {
            id: "x1".into(),
            next_phase: NextPhaseStrategy::RoundRobin,
            timing: TimingConfig::default(),
            phase_groups: vec![
                PhaseGroupConfig {
                    name: "ns".into(),
                    lanes: vec![Lane::North, Lane::South],
                    min_green_s: 10.0,
                    max_green_s: 120.0,
                },
                PhaseGroupConfig {
                    name: "ew".into(),
                    lanes: vec![Lane::East, Lane::West],
                    min_green_s: 10.0,
                    max_green_s: 120.0,
                },
            ],
        }
    }

    #[test]
    fn test_group_of() {
        let cfg = intersection();
        assert_eq!(cfg.group_of(Lane::South), Some(0));
        assert_eq!(cfg.group_of(Lane::West), Some(1));
    }

    #[test]
    fn test_derive_validation() {
        let mut bp = ControllerBlueprint {
            version: ConfigVersion::V1,
            detection: DetectionConfig::default(),
            emergency: EmergencyConfig::default(),
            hub: HubConfig::default(),
            controller: ControllerConfig::default(),
            intersections: vec![intersection()],
            observers: vec![],
        };
        assert!(bp.validate().is_ok());

        bp.detection.confidence_threshold = 1.5;
        assert!(bp.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let d = DetectionConfig::default();
        assert_eq!(d.confidence_threshold, 0.4);
        assert_eq!(d.timeout(), Duration::from_secs(2));
        assert!(d.emergency_classes.iter().any(|c| c == "ambulance"));
        assert_eq!(TimingConfig::default().override_duration_s, 60.0);
    }
}
