//! Timing and preemption scenarios against the signal engine.

use std::time::Duration;

use contracts::{AlertOutcomeKind, Lane, LaneCount, NextPhaseStrategy, SignalColor};
use signal_engine::{PhaseLayout, SubmitOutcome, TimingPolicy};

use crate::harness::{alert, group, Harness};

const NS: [Lane; 2] = [Lane::North, Lane::South];
const EW: [Lane; 2] = [Lane::East, Lane::West];

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Density allocation: 20s base, 1s per vehicle, 40s cap.
#[test]
fn test_scenario_density_allocation() {
    let layout = PhaseLayout::new(vec![group("ns", &NS, 10, 40), group("ew", &EW, 10, 40)]).unwrap();
    let policy = TimingPolicy::new(20.0, 1.0);

    let mut counts = contracts::empty_lane_counts();
    for (lane, n) in [(Lane::North, 10), (Lane::South, 8), (Lane::East, 1), (Lane::West, 1)] {
        counts.insert(
            lane,
            LaneCount {
                vehicle_count: n,
                has_emergency_vehicle: false,
            },
        );
    }

    assert_eq!(policy.schedule(&layout, &counts), vec![secs(38), secs(22)]);

    // Heavier traffic never exceeds the cap
    counts.get_mut(&Lane::North).unwrap().vehicle_count = 100;
    assert_eq!(policy.propose(&layout.groups()[0], &counts), secs(40));

    // Demand selection takes the busier group next
    let demand = policy.clone().with_strategy(NextPhaseStrategy::Demand);
    let three = PhaseLayout::new(vec![
        group("n", &[Lane::North], 10, 60),
        group("s", &[Lane::South], 10, 60),
        group("ew", &EW, 10, 60),
    ])
    .unwrap();
    counts.get_mut(&Lane::South).unwrap().vehicle_count = 0;
    counts.get_mut(&Lane::East).unwrap().vehicle_count = 30;
    assert_eq!(demand.next_group(&three, 0, &counts), 2);
}

/// Alert for a group whose normal green has not served its minimum waits
/// for the minimum, then goes through yellow to the override green.
#[test]
fn test_scenario_override_deferred_until_min_green() {
    let mut h = Harness::new(
        vec![group("ew", &EW, 20, 60), group("ns", &NS, 10, 60)],
        TimingPolicy::new(30.0, 0.0),
        3,
        60,
    );
    assert_eq!(h.color(Lane::East), SignalColor::Green);

    h.advance_secs(3);
    assert_eq!(h.submit(alert("amb", Lane::North, 5)), SubmitOutcome::Accepted);
    h.step();
    assert!(!h.coordinator.is_active());

    h.advance_to(millis(19_900));
    assert_eq!(h.color(Lane::East), SignalColor::Green);
    assert_eq!(h.color(Lane::North), SignalColor::Red);
    assert!(h.outcomes_of("amb").is_empty());

    h.advance_secs(20);
    assert_eq!(h.color(Lane::East), SignalColor::Yellow);
    assert_eq!(h.outcomes_of("amb"), vec![AlertOutcomeKind::Honored]);

    h.advance_secs(23);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.color(Lane::South), SignalColor::Green);
    assert_eq!(h.sm.override_until(1), Some(h.at(secs(83))));
}

/// Alert for the group that is already clearing waits for the next green's
/// minimum instead of turning the yellow back to green.
#[test]
fn test_scenario_alert_for_clearing_group() {
    let mut h = Harness::new(
        vec![group("ns", &NS, 10, 60), group("ew", &EW, 10, 60)],
        TimingPolicy::new(30.0, 0.0),
        3,
        60,
    );

    h.advance_secs(30);
    assert_eq!(h.color(Lane::North), SignalColor::Yellow);

    h.advance_secs(31);
    assert_eq!(h.submit(alert("amb", Lane::North, 5)), SubmitOutcome::Accepted);
    h.step();
    assert!(h.outcomes_of("amb").is_empty());

    h.advance_secs(33);
    assert_eq!(h.color(Lane::North), SignalColor::Red);
    assert_eq!(h.color(Lane::East), SignalColor::Green);

    h.advance_to(millis(42_900));
    assert!(h.outcomes_of("amb").is_empty());

    h.advance_secs(43);
    assert_eq!(h.outcomes_of("amb"), vec![AlertOutcomeKind::Honored]);
    assert_eq!(h.color(Lane::East), SignalColor::Yellow);

    h.advance_secs(46);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.sm.override_until(0), Some(h.at(secs(106))));
}

/// Two alerts for the same group in one tick: the higher priority is
/// honored first, the other follows without a normal cycle in between.
#[test]
fn test_scenario_same_tick_alerts_chain() {
    let mut h = Harness::new(
        vec![group("ns", &NS, 10, 60), group("ew", &EW, 10, 60)],
        TimingPolicy::new(30.0, 0.0),
        3,
        60,
    );

    h.advance_secs(12);
    assert_eq!(h.submit(alert("low", Lane::East, 3)), SubmitOutcome::Accepted);
    assert_eq!(h.submit(alert("high", Lane::West, 5)), SubmitOutcome::Accepted);
    h.step();

    assert_eq!(h.outcomes_of("high"), vec![AlertOutcomeKind::Honored]);
    assert!(h.outcomes_of("low").is_empty());
    assert_eq!(h.coordinator.queued_len(), 1);

    h.advance_secs(15);
    assert_eq!(h.color(Lane::East), SignalColor::Green);
    assert_eq!(h.sm.override_until(1), Some(h.at(secs(75))));

    // East/West stay green from the first override through the second
    for t in [30, 60, 75, 76, 100, 134] {
        h.advance_secs(t);
        assert_eq!(h.color(Lane::East), SignalColor::Green, "at {t}s");
        assert_eq!(h.color(Lane::North), SignalColor::Red, "at {t}s");
    }
    assert_eq!(
        h.outcomes_of("high"),
        vec![AlertOutcomeKind::Honored, AlertOutcomeKind::Completed]
    );
    assert_eq!(h.outcomes_of("low"), vec![AlertOutcomeKind::Honored]);
    assert_eq!(h.sm.override_until(1), Some(h.at(secs(135))));

    h.advance_secs(135);
    assert_eq!(
        h.outcomes_of("low"),
        vec![AlertOutcomeKind::Honored, AlertOutcomeKind::Completed]
    );
    assert_eq!(h.color(Lane::East), SignalColor::Yellow);

    // Interrupted North/South green resumes its remaining 18s
    h.advance_secs(138);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.sm.next_deadline(), Some(h.at(secs(156))));
    assert!(!h.coordinator.is_active());
}

/// Interrupted green resumes with the time it had left, not a fresh
/// allocation.
#[test]
fn test_scenario_restore_resumes_remaining() {
    let mut h = Harness::new(
        vec![group("ns", &NS, 10, 60), group("ew", &EW, 10, 60)],
        TimingPolicy::new(40.0, 0.0),
        3,
        60,
    );

    h.advance_secs(15);
    h.submit(alert("fire", Lane::East, 4));
    h.step();
    assert_eq!(h.color(Lane::North), SignalColor::Yellow);

    h.advance_secs(18);
    assert_eq!(h.color(Lane::East), SignalColor::Green);

    h.advance_secs(78);
    assert_eq!(
        h.outcomes_of("fire"),
        vec![AlertOutcomeKind::Honored, AlertOutcomeKind::Completed]
    );
    assert_eq!(h.color(Lane::East), SignalColor::Yellow);

    h.advance_secs(81);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.sm.next_deadline(), Some(h.at(secs(106))));
    let north = &h.sm.phases(h.at(secs(81)))[&Lane::North];
    assert!((north.remaining_time_s - 25.0).abs() < 1e-9);

    h.advance_to(millis(105_900));
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    h.advance_secs(106);
    assert_eq!(h.color(Lane::North), SignalColor::Yellow);
}

/// Alerts whose TTL runs out while queued expire without touching the cycle.
#[test]
fn test_scenario_queued_alert_expires() {
    let mut h = Harness::new(
        vec![group("ns", &NS, 30, 60), group("ew", &EW, 10, 60)],
        TimingPolicy::new(40.0, 0.0),
        3,
        60,
    );

    let mut short = alert("short", Lane::East, 2);
    short.ttl_s = 5.0;
    h.submit(short);
    h.advance_secs(5);

    assert_eq!(h.outcomes_of("short"), vec![AlertOutcomeKind::Expired]);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.coordinator.queued_len(), 0);
    // Expired ids are remembered
    assert_eq!(h.submit(alert("short", Lane::East, 2)), SubmitOutcome::Duplicate);
}

/// A full normal cycle keeps yellow between green and red on every lane
/// and counts one cycle per yellow.
#[test]
fn test_scenario_normal_cycle_trace() {
    let mut h = Harness::new(
        vec![
            group("n", &[Lane::North], 5, 30),
            group("e", &[Lane::East], 5, 30),
            group("s", &[Lane::South], 5, 30),
            group("w", &[Lane::West], 5, 30),
        ],
        TimingPolicy::new(10.0, 0.0),
        2,
        60,
    );

    // Four greens of 10s, each followed by 2s of yellow
    h.advance_secs(48);
    assert_eq!(h.sm.cycle_count(), 4);
    assert_eq!(h.color(Lane::North), SignalColor::Green);
    assert_eq!(h.sm.active_group(), Some(0));
}
