//! IntersectionController - the per-intersection event loop
//!
//! One tokio task owns the state machine and the override coordinator of a
//! single intersection. Every input (timer expiry, detection batch, emergency
//! request, operator command) is applied in arrival order, followed by one
//! engine step and one published snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use contracts::{
    AckStatus, AlertOutcome, AlertOutcomeKind, DetectionReport, EmergencyAck, EmergencyAlert,
    EmergencyRequest, IntersectionConfig, IntersectionId, IntersectionSnapshot, LaneCounts,
    PushMessage, empty_lane_counts,
};
use dispatcher::BroadcastHub;
use ingestion::InferencePool;
use observability::{record_alert_outcome, record_detection_report, record_snapshot_metrics};
use signal_engine::{
    AlertEvent, CoordinatorConfig, OverrideCoordinator, SignalStateMachine, SubmitOutcome,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ControllerError, Result};
use crate::event::{ControllerEvent, ControllerSettings, DetectionBatch, OriginSender};
use crate::handle::IntersectionHandle;
use crate::snapshot::build_snapshot;

/// Single-owner controller of one intersection
pub struct IntersectionController {
    id: IntersectionId,
    sm: SignalStateMachine,
    coordinator: OverrideCoordinator,
    hub: Arc<BroadcastHub>,
    settings: ControllerSettings,
    counts: LaneCounts,
    sequence: u64,
    latest: Arc<IntersectionSnapshot>,
    last_publish: Instant,
    /// Origin channels of alerts that may still produce outcomes
    origins: HashMap<String, OriginSender>,
    auto_seq: u64,
    rx: mpsc::Receiver<ControllerEvent>,
}

impl IntersectionController {
    /// Build the engine for `config`; the first group starts green at `now`.
    pub fn new(
        config: &IntersectionConfig,
        settings: ControllerSettings,
        hub: Arc<BroadcastHub>,
        rx: mpsc::Receiver<ControllerEvent>,
        now: Instant,
    ) -> Result<Self> {
        let counts = empty_lane_counts();
        let sm = SignalStateMachine::from_config(config, &counts, now)
            .map_err(|e| ControllerError::engine(&config.id, e))?;

        let emergency = contracts::EmergencyConfig {
            default_ttl_s: settings.default_ttl_s,
            recent_id_window: settings.recent_id_window,
        };
        let coordinator_config = CoordinatorConfig::from_config(&config.timing, &emergency)
            .map_err(|e| ControllerError::engine(&config.id, e))?;
        let coordinator = OverrideCoordinator::new(coordinator_config);

        let latest = Arc::new(build_snapshot(&sm, &coordinator, &counts, 0, now));

        Ok(Self {
            id: config.id.clone(),
            sm,
            coordinator,
            hub,
            settings,
            counts,
            sequence: 0,
            latest,
            last_publish: now,
            origins: HashMap::new(),
            auto_seq: 0,
            rx,
        })
    }

    /// Spawn the controller task and return its handle.
    #[instrument(
        name = "controller_spawn",
        skip(config, settings, hub, pool),
        fields(intersection = %config.id)
    )]
    pub fn spawn(
        config: &IntersectionConfig,
        settings: ControllerSettings,
        hub: Arc<BroadcastHub>,
        pool: Option<Arc<InferencePool>>,
    ) -> Result<(IntersectionHandle, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity.max(1));
        let aggregation = Arc::new(settings.aggregation.clone());
        let now = tokio::time::Instant::now().into_std();
        let controller = Self::new(config, settings, hub.clone(), rx, now)?;

        let handle = IntersectionHandle::new(config.id.clone(), tx, hub, pool, aggregation);
        let task = tokio::spawn(controller.run());

        info!(groups = config.phase_groups.len(), "intersection controller started");
        Ok((handle, task))
    }

    /// Event loop; returns on shutdown or when every handle is dropped.
    pub async fn run(mut self) {
        let start = tokio::time::Instant::now().into_std();
        self.step(start);

        loop {
            let wake = self.next_wake();

            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        debug!(intersection = %self.id, "all handles dropped");
                        break;
                    };
                    if !self.handle_event(event) {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                    let now = tokio::time::Instant::now().into_std();
                    self.step(now);
                }
            }
        }

        info!(
            intersection = %self.id,
            snapshots = self.sequence,
            cycles = self.sm.cycle_count(),
            "intersection controller stopped"
        );
    }

    /// Earliest of engine deadline, override deadline and status refresh.
    fn next_wake(&self) -> Instant {
        let status = self.last_publish + self.settings.status_interval;
        [
            self.sm.next_deadline(),
            self.coordinator.next_deadline(&self.sm),
        ]
        .into_iter()
        .flatten()
        .fold(status, Instant::min)
    }

    /// Apply one mailbox event; `false` ends the loop.
    fn handle_event(&mut self, event: ControllerEvent) -> bool {
        let now = tokio::time::Instant::now().into_std();
        debug!(intersection = %self.id, kind = event.kind(), "controller event");
        metrics::counter!(
            "aisc_controller_events_total",
            "intersection" => self.id.to_string(),
            "kind" => event.kind()
        )
        .increment(1);

        match event {
            ControllerEvent::Detections { batch, reply } => {
                let report = self.on_detections(batch, now);
                self.step(now);
                let _ = reply.send(report);
            }
            ControllerEvent::Emergency {
                request,
                origin,
                reply,
            } => {
                let ack = self.on_emergency(request, origin, now);
                self.step(now);
                let _ = reply.send(ack);
            }
            ControllerEvent::Reset { reply } => {
                self.on_reset(now);
                self.step(now);
                let _ = reply.send(());
            }
            ControllerEvent::Snapshot { reply } => {
                let _ = reply.send(self.latest.clone());
            }
            ControllerEvent::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // ========== Engine step ==========

    /// Coordinator tick, state machine tick, invariant check, publish.
    fn step(&mut self, now: Instant) {
        match self.coordinator.tick(&mut self.sm, &self.counts, now) {
            Ok(events) => self.report_all(events),
            Err(e) => {
                error!(intersection = %self.id, error = %e, "override step failed");
                self.sm.enter_fail_safe(e.to_string());
            }
        }

        if let Some(transition) = self.sm.tick(&self.counts, now) {
            debug!(intersection = %self.id, ?transition, "phase transition");
        }

        if let Some(violation) = self.sm.enforce_invariants() {
            error!(intersection = %self.id, violation = %violation, "invariant violated");
            // Fail-safe aborts the override in effect
            match self.coordinator.tick(&mut self.sm, &self.counts, now) {
                Ok(events) => self.report_all(events),
                Err(e) => error!(intersection = %self.id, error = %e, "override abort failed"),
            }
        }

        self.publish_snapshot(now);
    }

    fn publish_snapshot(&mut self, now: Instant) {
        self.sequence += 1;
        let snapshot = build_snapshot(&self.sm, &self.coordinator, &self.counts, self.sequence, now);
        record_snapshot_metrics(&snapshot);
        self.latest = self.hub.publish(snapshot);
        self.last_publish = now;
    }

    // ========== Inputs ==========

    #[instrument(
        name = "controller_detections",
        skip(self, batch, now),
        fields(intersection = %self.id, accepted = batch.outcome.accepted)
    )]
    fn on_detections(&mut self, batch: DetectionBatch, now: Instant) -> DetectionReport {
        let DetectionBatch {
            outcome,
            emergencies,
            processing_time_ms,
        } = batch;

        if let Some(reason) = &outcome.degraded {
            warn!(reason = %reason, "detection batch degraded to zero counts");
        }

        let report = DetectionReport {
            intersection_id: self.id.clone(),
            total_vehicles: outcome.total_vehicles(),
            lane_counts: outcome
                .counts
                .iter()
                .map(|(lane, c)| (*lane, c.vehicle_count))
                .collect(),
            emergency_lanes: outcome.emergency_lanes(),
            processing_time_ms,
            confidence_threshold: self.settings.aggregation.confidence_threshold,
            degraded: outcome.degraded.clone(),
            timestamp: Utc::now(),
        };
        self.counts = outcome.counts;

        record_detection_report(&report);
        self.hub
            .publish_event(&self.id, PushMessage::VehicleDetection(report.clone()));

        if self.settings.auto_alert {
            for (lane, emergency_type) in emergencies {
                if self.coordinator.has_alert_for(lane) {
                    continue;
                }
                self.auto_seq += 1;
                let request = EmergencyRequest::new(
                    format!("auto-{}-{}-{}", self.id, lane, self.auto_seq),
                    emergency_type,
                    lane,
                    self.settings.auto_alert_priority,
                );
                info!(lane = %lane, kind = ?emergency_type, "raising automatic alert");
                self.on_emergency(request, None, now);
            }
        }

        report
    }

    #[instrument(
        name = "controller_emergency",
        skip(self, request, origin, now),
        fields(intersection = %self.id, alert_id = %request.alert_id)
    )]
    fn on_emergency(
        &mut self,
        request: EmergencyRequest,
        origin: Option<OriginSender>,
        now: Instant,
    ) -> EmergencyAck {
        let alert_id = request.alert_id.clone();
        let (lane, priority) = (request.detected_lane, request.priority_level);

        let alert = match request.into_alert(self.settings.default_ttl_s, Utc::now()) {
            Ok(alert) => alert,
            Err(e) => {
                let reason = e.to_string();
                warn!(reason = %reason, "emergency request rejected");
                let outcome = AlertOutcome {
                    intersection_id: self.id.clone(),
                    alert_id: alert_id.clone(),
                    kind: AlertOutcomeKind::Rejected,
                    target_lane: lane,
                    priority_level: priority,
                    at: Utc::now(),
                };
                self.emit_outcome(outcome, origin.as_ref());
                return EmergencyAck {
                    alert_id,
                    status: AckStatus::Rejected { reason },
                };
            }
        };

        let submitted = self
            .coordinator
            .submit(alert.clone(), self.sm.layout(), now);
        let status = match &submitted {
            SubmitOutcome::Accepted => {
                self.hub
                    .publish_event(&self.id, PushMessage::EmergencyAlert(alert.clone()));
                if let Some(origin) = origin.clone() {
                    self.origins.insert(alert.id.clone(), origin);
                }
                AckStatus::Accepted
            }
            SubmitOutcome::Duplicate => AckStatus::Duplicate,
            SubmitOutcome::Rejected(reason) => AckStatus::Rejected {
                reason: reason.clone(),
            },
        };

        // A duplicate never replaces the origin of the first submission
        let outcome = self.outcome_for(&alert, submitted.kind());
        self.emit_outcome(outcome, origin.as_ref());

        EmergencyAck { alert_id, status }
    }

    fn on_reset(&mut self, now: Instant) {
        info!(intersection = %self.id, failure = ?self.sm.failure(), "operator reset");
        let events = self.coordinator.on_reset(now);
        self.report_all(events);
        self.sm.reset(&self.counts, now);
    }

    // ========== Outcome reporting ==========

    fn report_all(&mut self, events: Vec<AlertEvent>) {
        for event in events {
            let outcome = self.outcome_for(&event.alert, event.kind);
            let origin = if event.kind.is_terminal() {
                self.origins.remove(&event.alert.id)
            } else {
                self.origins.get(&event.alert.id).cloned()
            };
            self.emit_outcome(outcome, origin.as_ref());
        }
    }

    fn outcome_for(&self, alert: &EmergencyAlert, kind: AlertOutcomeKind) -> AlertOutcome {
        AlertOutcome {
            intersection_id: self.id.clone(),
            alert_id: alert.id.clone(),
            kind,
            target_lane: alert.target_lane,
            priority_level: alert.priority_level,
            at: Utc::now(),
        }
    }

    fn emit_outcome(&self, outcome: AlertOutcome, origin: Option<&OriginSender>) {
        info!(
            intersection = %self.id,
            alert_id = %outcome.alert_id,
            outcome = %outcome.kind,
            "alert outcome"
        );
        record_alert_outcome(&outcome);
        if let Some(origin) = origin {
            if origin.try_send(outcome.clone()).is_err() {
                debug!(alert_id = %outcome.alert_id, "origin channel unavailable");
            }
        }
        self.hub
            .publish_event(&self.id, PushMessage::AlertOutcome(outcome));
    }
}
