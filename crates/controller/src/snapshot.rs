//! Snapshot construction from live engine state

use std::time::Instant;

use chrono::Utc;
use contracts::{total_in, IntersectionSnapshot, Lane, LaneCounts};
use signal_engine::{OverrideCoordinator, SignalStateMachine};

/// Share of counted vehicles on green lanes; 1.0 when nothing is counted.
pub fn efficiency_score(counts: &LaneCounts, green: &[Lane]) -> f64 {
    let total: u32 = counts.values().map(|c| c.vehicle_count).sum();
    if total == 0 {
        return 1.0;
    }
    (total_in(counts, green) as f64 / total as f64).clamp(0.0, 1.0)
}

/// Immutable view of one intersection at `now`
pub fn build_snapshot(
    sm: &SignalStateMachine,
    coordinator: &OverrideCoordinator,
    counts: &LaneCounts,
    sequence: u64,
    now: Instant,
) -> IntersectionSnapshot {
    let green = sm.green_lanes();
    let active_group = sm
        .active_group()
        .and_then(|g| sm.layout().group(g).ok())
        .map(|g| g.name.clone());

    IntersectionSnapshot {
        intersection_id: sm.id().clone(),
        sequence,
        phases: sm.phases(now),
        active_group,
        lane_counts: counts.clone(),
        total_vehicles: counts.values().map(|c| c.vehicle_count).sum(),
        efficiency_score: efficiency_score(counts, &green),
        emergency_mode: coordinator.is_active(),
        active_alert_id: coordinator.active_alert().map(|a| a.id.clone()),
        queued_alerts: coordinator.queued_len(),
        failure: sm.failure().map(str::to_string),
        cycle_count: sm.cycle_count(),
        timestamp: Utc::now(),
    }
}
