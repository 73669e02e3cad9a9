//! Mailbox messages and per-controller settings

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AlertOutcome, ControllerBlueprint, Detection, DetectionReport, EmergencyAck, EmergencyRequest,
    EmergencyType, IntersectionSnapshot, Lane,
};
use ingestion::{aggregate, AggregationConfig, AggregationOutcome};
use tokio::sync::{mpsc, oneshot};

/// Settings shared by every controller of one blueprint
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub aggregation: AggregationConfig,
    /// Raise an alert for emergency vehicles seen in detection batches
    pub auto_alert: bool,
    pub auto_alert_priority: u8,
    /// TTL of requests that carry none
    pub default_ttl_s: f64,
    pub recent_id_window: usize,
    /// Longest gap between two published snapshots
    pub status_interval: Duration,
    pub mailbox_capacity: usize,
}

impl ControllerSettings {
    pub fn from_blueprint(blueprint: &ControllerBlueprint) -> Self {
        Self {
            aggregation: AggregationConfig::from(&blueprint.detection),
            auto_alert: blueprint.detection.auto_alert,
            auto_alert_priority: blueprint.detection.auto_alert_priority,
            default_ttl_s: blueprint.emergency.default_ttl_s,
            recent_id_window: blueprint.emergency.recent_id_window,
            status_interval: blueprint.controller.status_interval(),
            mailbox_capacity: blueprint.controller.mailbox_capacity.max(1),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let detection = contracts::DetectionConfig::default();
        let emergency = contracts::EmergencyConfig::default();
        let controller = contracts::ControllerConfig::default();
        Self {
            aggregation: AggregationConfig::from(&detection),
            auto_alert: detection.auto_alert,
            auto_alert_priority: detection.auto_alert_priority,
            default_ttl_s: emergency.default_ttl_s,
            recent_id_window: emergency.recent_id_window,
            status_interval: controller.status_interval(),
            mailbox_capacity: controller.mailbox_capacity,
        }
    }
}

/// One aggregated detection batch, ready for the controller
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub outcome: AggregationOutcome,
    /// Emergency vehicle type seen per flagged lane
    pub emergencies: Vec<(Lane, EmergencyType)>,
    pub processing_time_ms: f64,
}

impl DetectionBatch {
    pub fn from_detections(
        detections: &[Detection],
        config: &AggregationConfig,
        processing_time_ms: f64,
    ) -> Self {
        let outcome = aggregate(detections, config);
        let emergencies = outcome
            .emergency_lanes()
            .into_iter()
            .filter_map(|lane| {
                detections
                    .iter()
                    .filter(|d| d.assigned_lane == lane)
                    .filter(|d| d.confidence >= config.confidence_threshold)
                    .find_map(|d| EmergencyType::from_class(&d.class.trim().to_ascii_lowercase()))
                    .map(|kind| (lane, kind))
            })
            .collect();

        Self {
            outcome,
            emergencies,
            processing_time_ms,
        }
    }

    /// Zero counts, e.g. after an adapter failure
    pub fn degraded(reason: impl Into<String>, processing_time_ms: f64) -> Self {
        Self {
            outcome: AggregationOutcome::degraded(reason),
            emergencies: Vec::new(),
            processing_time_ms,
        }
    }
}

/// Receives every later outcome of one submitted alert
pub type OriginSender = mpsc::Sender<AlertOutcome>;

/// Controller mailbox message
#[derive(Debug)]
pub enum ControllerEvent {
    Detections {
        batch: DetectionBatch,
        reply: oneshot::Sender<DetectionReport>,
    },
    Emergency {
        request: EmergencyRequest,
        origin: Option<OriginSender>,
        reply: oneshot::Sender<EmergencyAck>,
    },
    /// Operator reset, clears fail-safe
    Reset { reply: oneshot::Sender<()> },
    Snapshot {
        reply: oneshot::Sender<Arc<IntersectionSnapshot>>,
    },
    Shutdown { reply: oneshot::Sender<()> },
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Detections { .. } => "detections",
            Self::Emergency { .. } => "emergency",
            Self::Reset { .. } => "reset",
            Self::Snapshot { .. } => "snapshot",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
