//! Adaptive timing policy
//!
//! `green = clamp(base + density_factor * vehicles_in_group, min, max)`.
//! Evaluated once at the start of every normal green, never continuously.

use std::time::Duration;

use contracts::{total_in, LaneCounts, NextPhaseStrategy, TimingConfig};

use crate::layout::{seconds, PhaseGroup, PhaseLayout};
use crate::EngineError;

/// Pure green-time allocation
#[derive(Debug, Clone, PartialEq)]
pub struct TimingPolicy {
    /// Seconds granted to an empty group before clamping
    pub base_duration_s: f64,
    /// Seconds added per counted vehicle
    pub density_factor_s: f64,
    pub strategy: NextPhaseStrategy,
}

impl TimingPolicy {
    pub fn new(base_duration_s: f64, density_factor_s: f64) -> Self {
        Self {
            base_duration_s,
            density_factor_s,
            strategy: NextPhaseStrategy::RoundRobin,
        }
    }

    pub fn with_strategy(mut self, strategy: NextPhaseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn from_config(timing: &TimingConfig, strategy: NextPhaseStrategy) -> Result<Self, EngineError> {
        // Rejects negative / non-finite values up front
        seconds(timing.base_duration_s, "base_duration_s")?;
        seconds(timing.density_factor_s, "density_factor_s")?;
        Ok(Self::new(timing.base_duration_s, timing.density_factor_s).with_strategy(strategy))
    }

    /// Proposed green duration for `group`, always within `[min_green, max_green]`.
    pub fn propose(&self, group: &PhaseGroup, counts: &LaneCounts) -> Duration {
        let vehicles = total_in(counts, &group.lanes) as f64;
        let raw = self.base_duration_s + self.density_factor_s * vehicles;
        let min = group.min_green.as_secs_f64();
        let max = group.max_green.as_secs_f64();
        let clamped = if raw.is_nan() { min } else { raw.clamp(min, max) };
        Duration::try_from_secs_f64(clamped).unwrap_or(group.min_green)
    }

    /// Proposals for every group, in layout order.
    pub fn schedule(&self, layout: &PhaseLayout, counts: &LaneCounts) -> Vec<Duration> {
        layout
            .groups()
            .iter()
            .map(|g| self.propose(g, counts))
            .collect()
    }

    /// Group that follows `current` after a normal green.
    ///
    /// Demand selection picks the largest proposal among the other groups;
    /// equal proposals resolve in cyclic order starting after `current`.
    pub fn next_group(&self, layout: &PhaseLayout, current: usize, counts: &LaneCounts) -> usize {
        let n = layout.len();
        match self.strategy {
            NextPhaseStrategy::RoundRobin => layout.next_index(current),
            NextPhaseStrategy::Demand => {
                let mut best = layout.next_index(current);
                let mut best_len = Duration::ZERO;
                for step in 1..n {
                    let idx = (current + step) % n;
                    let len = self.propose(&layout.groups()[idx], counts);
                    if step == 1 || len > best_len {
                        best = idx;
                        best_len = len;
                    }
                }
                best
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::tests::ns_ew;
    use crate::layout::PhaseGroup;
    use contracts::{empty_lane_counts, Lane};

    fn counts(n: u32, s: u32, e: u32, w: u32) -> LaneCounts {
        let mut c = empty_lane_counts();
        for (lane, v) in [(Lane::North, n), (Lane::South, s), (Lane::East, e), (Lane::West, w)] {
            c.entry(lane).or_default().vehicle_count = v;
        }
        c
    }

    #[test]
    fn test_density_schedule() {
        let layout = ns_ew(0, 40);
        let policy = TimingPolicy::new(20.0, 1.0);
        let schedule = policy.schedule(&layout, &counts(10, 8, 1, 1));
        assert_eq!(schedule[0], Duration::from_secs(38));
        assert_eq!(schedule[1], Duration::from_secs(22));
    }

    #[test]
    fn test_clamped_to_bounds() {
        let layout = ns_ew(15, 40);
        let policy = TimingPolicy::new(5.0, 2.0);
        assert_eq!(
            policy.propose(&layout.groups()[0], &counts(0, 0, 0, 0)),
            Duration::from_secs(15)
        );
        assert_eq!(
            policy.propose(&layout.groups()[0], &counts(100, 100, 0, 0)),
            Duration::from_secs(40)
        );
    }

    #[test]
    fn test_monotonic_in_count() {
        let layout = ns_ew(10, 60);
        let policy = TimingPolicy::new(10.0, 2.0);
        let group = &layout.groups()[0];
        let mut prev = Duration::ZERO;
        for n in 0..50 {
            let d = policy.propose(group, &counts(n, 0, 0, 0));
            assert!(d >= prev);
            assert!(d >= group.min_green && d <= group.max_green);
            prev = d;
        }
    }

    #[test]
    fn test_round_robin_order() {
        let layout = ns_ew(10, 60);
        let policy = TimingPolicy::new(30.0, 2.0);
        let c = counts(50, 50, 0, 0);
        assert_eq!(policy.next_group(&layout, 0, &c), 1);
        assert_eq!(policy.next_group(&layout, 1, &c), 0);
    }

    #[test]
    fn test_demand_prefers_busiest_with_cyclic_ties() {
        let layout = PhaseLayout::new(vec![
            PhaseGroup::new("n", vec![Lane::North], Duration::from_secs(5), Duration::from_secs(60)),
            PhaseGroup::new("s", vec![Lane::South], Duration::from_secs(5), Duration::from_secs(60)),
            PhaseGroup::new("ew", vec![Lane::East, Lane::West], Duration::from_secs(5), Duration::from_secs(60)),
        ])
        .unwrap();
        let policy = TimingPolicy::new(10.0, 1.0).with_strategy(NextPhaseStrategy::Demand);

        // ew busiest
        assert_eq!(policy.next_group(&layout, 0, &counts(0, 1, 5, 5)), 2);
        // s and ew tie from n: cyclic order after n wins
        assert_eq!(policy.next_group(&layout, 0, &counts(0, 4, 2, 2)), 1);
        // tie seen from s: ew comes first cyclically
        assert_eq!(policy.next_group(&layout, 1, &counts(3, 0, 2, 1)), 2);
    }
}
