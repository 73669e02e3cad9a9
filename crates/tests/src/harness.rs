//! Synthetic-time driver for one intersection's engine.
//!
//! Runs the same per-step order as the intersection controller and checks
//! the observable safety properties after every step.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use contracts::{
    empty_lane_counts, AlertOutcomeKind, EmergencyAlert, EmergencyType, Lane, LaneCounts,
    SignalColor,
};
use signal_engine::{
    AlertEvent, CoordinatorConfig, OverrideCoordinator, PhaseGroup, PhaseLayout,
    SignalStateMachine, SubmitOutcome, TimingPolicy,
};

pub const STEP: Duration = Duration::from_millis(100);

pub fn group(name: &str, lanes: &[Lane], min_s: u64, max_s: u64) -> PhaseGroup {
    PhaseGroup::new(
        name,
        lanes.to_vec(),
        Duration::from_secs(min_s),
        Duration::from_secs(max_s),
    )
}

pub fn alert(id: &str, lane: Lane, priority: u8) -> EmergencyAlert {
    EmergencyAlert {
        id: id.to_string(),
        emergency_type: EmergencyType::Ambulance,
        target_lane: lane,
        priority_level: priority,
        created_at: Utc::now(),
        ttl_s: 300.0,
    }
}

pub struct Harness {
    t0: Instant,
    now: Instant,
    pub sm: SignalStateMachine,
    pub coordinator: OverrideCoordinator,
    pub counts: LaneCounts,
    pub events: Vec<(Duration, String, AlertOutcomeKind)>,
    colors: BTreeMap<Lane, SignalColor>,
}

impl Harness {
    pub fn new(groups: Vec<PhaseGroup>, policy: TimingPolicy, yellow_s: u64, override_s: u64) -> Self {
        let t0 = Instant::now();
        let counts = empty_lane_counts();
        let layout = PhaseLayout::new(groups).unwrap();
        let sm = SignalStateMachine::new(
            "scenario".into(),
            layout,
            policy,
            Duration::from_secs(yellow_s),
            &counts,
            t0,
        );
        let coordinator = OverrideCoordinator::new(CoordinatorConfig {
            override_duration: Duration::from_secs(override_s),
            recent_id_window: 16,
        });
        let colors = sm.colors().clone();
        Self {
            t0,
            now: t0,
            sm,
            coordinator,
            counts,
            events: Vec::new(),
            colors,
        }
    }

    pub fn at(&self, offset: Duration) -> Instant {
        self.t0 + offset
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.t0
    }

    pub fn color(&self, lane: Lane) -> SignalColor {
        self.sm.colors()[&lane]
    }

    pub fn submit(&mut self, alert: EmergencyAlert) -> SubmitOutcome {
        self.coordinator.submit(alert, self.sm.layout(), self.now)
    }

    /// One controller step at the current instant.
    pub fn step(&mut self) {
        let now = self.now;
        let events = self
            .coordinator
            .tick(&mut self.sm, &self.counts, now)
            .unwrap();
        self.record(events);
        self.sm.tick(&self.counts, now);

        let violation = self.sm.enforce_invariants();
        assert!(
            violation.is_none(),
            "invariant violated at {:?}: {violation:?}",
            self.elapsed()
        );
        self.check_trace();
    }

    /// Step every [`STEP`] until `offset` from start (inclusive).
    pub fn advance_to(&mut self, offset: Duration) {
        let target = self.at(offset);
        while self.now < target {
            self.now = (self.now + STEP).min(target);
            self.step();
        }
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.advance_to(Duration::from_secs(secs));
    }

    pub fn outcomes_of(&self, id: &str) -> Vec<AlertOutcomeKind> {
        self.events
            .iter()
            .filter(|(_, alert_id, _)| alert_id == id)
            .map(|(_, _, kind)| *kind)
            .collect()
    }

    fn record(&mut self, events: Vec<AlertEvent>) {
        let at = self.elapsed();
        self.events
            .extend(events.into_iter().map(|e| (at, e.alert.id, e.kind)));
    }

    /// Green lanes share one group; green never turns red without yellow and
    /// yellow never turns back to green.
    fn check_trace(&mut self) {
        let layout = self.sm.layout();
        let green_groups: Vec<usize> = self
            .sm
            .green_lanes()
            .into_iter()
            .filter_map(|l| layout.group_of(l))
            .collect();
        assert!(
            green_groups.windows(2).all(|w| w[0] == w[1]),
            "conflicting greens at {:?}",
            self.elapsed()
        );

        for (lane, color) in self.sm.colors() {
            let before = self.colors.get(lane).copied();
            assert!(
                !(before == Some(SignalColor::Green) && *color == SignalColor::Red),
                "{lane} went green -> red at {:?}",
                self.elapsed()
            );
            assert!(
                !(before == Some(SignalColor::Yellow) && *color == SignalColor::Green),
                "{lane} went yellow -> green at {:?}",
                self.elapsed()
            );
        }
        self.colors = self.sm.colors().clone();
    }
}
