//! IntersectionSnapshot and push messages
//!
//! A snapshot is built once per controller tick and shared as
//! `Arc<IntersectionSnapshot>`; it is never mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    AlertOutcome, DetectionReport, EmergencyAlert, IntersectionId, Lane, LaneCounts, SignalColor,
};

/// Observable per-lane signal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPhase {
    pub color: SignalColor,
    /// Seconds until the lane's colour is scheduled to change; 0 for red
    pub remaining_time_s: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    /// Name of the phase group the lane belongs to
    pub group: String,
}

/// Immutable state snapshot for one intersection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionSnapshot {
    pub intersection_id: IntersectionId,
    /// Strictly increasing per intersection
    pub sequence: u64,
    pub phases: BTreeMap<Lane, SignalPhase>,
    /// Group currently green or yellow; `None` in fail-safe
    pub active_group: Option<String>,
    pub lane_counts: LaneCounts,
    pub total_vehicles: u32,
    /// Share of counted vehicles sitting on green lanes (1.0 with no vehicles)
    pub efficiency_score: f64,
    pub emergency_mode: bool,
    pub active_alert_id: Option<String>,
    pub queued_alerts: usize,
    /// Invariant violation that put the intersection in fail-safe
    pub failure: Option<String>,
    /// Completed green phases since start or last reset
    pub cycle_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl IntersectionSnapshot {
    pub fn color_of(&self, lane: Lane) -> Option<SignalColor> {
        self.phases.get(&lane).map(|p| p.color)
    }

    pub fn lanes_with(&self, color: SignalColor) -> Vec<Lane> {
        self.phases
            .iter()
            .filter(|(_, p)| p.color == color)
            .map(|(l, _)| *l)
            .collect()
    }

    pub fn green_lanes(&self) -> Vec<Lane> {
        self.lanes_with(SignalColor::Green)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Message on the real-time push channel
///
/// Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    IntersectionStatus(Arc<IntersectionSnapshot>),
    VehicleDetection(DetectionReport),
    EmergencyAlert(EmergencyAlert),
    AlertOutcome(AlertOutcome),
}

impl PushMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IntersectionStatus(_) => "intersection_status",
            Self::VehicleDetection(_) => "vehicle_detection",
            Self::EmergencyAlert(_) => "emergency_alert",
            Self::AlertOutcome(_) => "alert_outcome",
        }
    }

    pub fn intersection_status(&self) -> Option<&Arc<IntersectionSnapshot>> {
        match self {
            Self::IntersectionStatus(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::empty_lane_counts;

    fn snapshot() -> IntersectionSnapshot {
        let mut phases = BTreeMap::new();
        for (lane, color) in [
            (Lane::North, SignalColor::Green),
            (Lane::South, SignalColor::Green),
            (Lane::East, SignalColor::Red),
            (Lane::West, SignalColor::Red),
        ] {
            phases.insert(
                lane,
                SignalPhase {
                    color,
                    remaining_time_s: if color == SignalColor::Red { 0.0 } else { 12.0 },
                    min_duration_s: 10.0,
                    max_duration_s: 120.0,
                    group: "ns".into(),
                },
            );
        }
        IntersectionSnapshot {
            intersection_id: "x1".into(),
            sequence: 1,
            phases,
            active_group: Some("ns".into()),
            lane_counts: empty_lane_counts(),
            total_vehicles: 0,
            efficiency_score: 1.0,
            emergency_mode: false,
            active_alert_id: None,
            queued_alerts: 0,
            failure: None,
            cycle_count: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_green_lanes() {
        let s = snapshot();
        assert_eq!(s.green_lanes(), vec![Lane::North, Lane::South]);
        assert_eq!(s.color_of(Lane::East), Some(SignalColor::Red));
        assert!(!s.is_failed());
    }

    #[test]
    fn test_push_message_tagging() {
        let msg = PushMessage::IntersectionStatus(Arc::new(snapshot()));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "intersection_status");
        assert_eq!(v["data"]["intersection_id"], "x1");
        assert_eq!(v["data"]["phases"]["north"]["color"], "green");
        assert_eq!(msg.kind(), "intersection_status");
    }
}
