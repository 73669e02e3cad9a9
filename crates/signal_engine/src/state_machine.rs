//! Signal state machine for one intersection.
//!
//! Owns the authoritative phase state. All deadlines are absolute
//! `Instant`s supplied by the caller, so the machine never reads a clock and
//! every test can drive it with synthetic time.
//!
//! Colour changes are applied to a materialised per-lane table and checked
//! against the structural state at every tick boundary
//! ([`SignalStateMachine::enforce_invariants`]).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use contracts::{
    IntersectionConfig, IntersectionId, Lane, LaneCounts, SignalColor, SignalPhase,
};
use tracing::{debug, error, instrument};

use crate::layout::{seconds, PhaseLayout};
use crate::policy::TimingPolicy;
use crate::{EngineError, InvariantViolation};

/// Hold granted to an override green
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideGrant {
    /// Maximum hold measured from green start
    pub hold: Duration,
    /// Alert expiry; the hold never outlives it
    pub expires_at: Instant,
}

impl OverrideGrant {
    fn until(&self, green_start: Instant) -> Instant {
        (green_start + self.hold).min(self.expires_at)
    }
}

/// How the green that follows a yellow is planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenPlan {
    /// Fresh policy proposal from the counts at green start
    Fresh,
    /// Continue an interrupted normal green
    Resume { remaining: Duration, served: Duration },
    /// Coordinator-held override green
    Override(OverrideGrant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenMode {
    /// Policy-timed green; `served_before` counts time served before an interruption
    Normal {
        deadline: Instant,
        served_before: Duration,
    },
    /// Held by the override coordinator until it restores or preempts
    Override { until: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalState {
    Green {
        group: usize,
        started: Instant,
        mode: GreenMode,
    },
    Yellow {
        group: usize,
        deadline: Instant,
        next: usize,
        plan: GreenPlan,
    },
    FailSafeAllRed {
        reason: String,
    },
}

/// Saved position to return to after an override chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePoint {
    pub group: usize,
    /// `Fresh` or `Resume`
    pub plan: GreenPlan,
}

/// Result of a preemption request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preemption {
    /// Target not reachable yet: a normal green short of its minimum, or
    /// the target itself clearing through yellow
    Deferred,
    /// Current green went yellow towards the target
    Started,
    /// Yellow in progress now leads to the target
    Redirected,
    /// Target was already green; it is now held
    Held,
}

/// Colour transition applied by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    ToYellow { from: usize, next: usize },
    ToGreen { group: usize, held: bool },
}

/// Authoritative phase state of one intersection
#[derive(Debug)]
pub struct SignalStateMachine {
    id: IntersectionId,
    layout: PhaseLayout,
    policy: TimingPolicy,
    yellow: Duration,
    state: SignalState,
    colors: BTreeMap<Lane, SignalColor>,
    pending: Option<InvariantViolation>,
    cycle_count: u64,
}

impl SignalStateMachine {
    /// First group green with the policy's initial proposal, all others red.
    pub fn new(
        id: IntersectionId,
        layout: PhaseLayout,
        policy: TimingPolicy,
        yellow: Duration,
        counts: &LaneCounts,
        now: Instant,
    ) -> Self {
        let mut sm = Self {
            id,
            layout,
            policy,
            yellow,
            state: SignalState::FailSafeAllRed {
                reason: String::new(),
            },
            colors: BTreeMap::new(),
            pending: None,
            cycle_count: 0,
        };
        sm.colors = sm.layout.lanes().map(|(l, _)| (l, SignalColor::Red)).collect();
        sm.start_initial(counts, now);
        sm
    }

    pub fn from_config(
        cfg: &IntersectionConfig,
        counts: &LaneCounts,
        now: Instant,
    ) -> Result<Self, EngineError> {
        let layout = PhaseLayout::from_config(cfg)?;
        let policy = TimingPolicy::from_config(&cfg.timing, cfg.next_phase)?;
        let yellow = seconds(cfg.timing.yellow_s, "yellow_s")?;
        if yellow.is_zero() {
            return Err(EngineError::InvalidLayout("yellow_s must be positive".into()));
        }
        Ok(Self::new(cfg.id.clone(), layout, policy, yellow, counts, now))
    }

    fn start_initial(&mut self, counts: &LaneCounts, now: Instant) {
        let duration = self.policy.propose(&self.layout.groups()[0], counts);
        self.state = SignalState::Green {
            group: 0,
            started: now,
            mode: GreenMode::Normal {
                deadline: now + duration,
                served_before: Duration::ZERO,
            },
        };
        self.sync_colors();
    }

    // ========== Accessors ==========

    pub fn id(&self) -> &IntersectionId {
        &self.id
    }

    pub fn layout(&self) -> &PhaseLayout {
        &self.layout
    }

    pub fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    pub fn yellow(&self) -> Duration {
        self.yellow
    }

    pub fn state(&self) -> &SignalState {
        &self.state
    }

    pub fn colors(&self) -> &BTreeMap<Lane, SignalColor> {
        &self.colors
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, SignalState::FailSafeAllRed { .. })
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            SignalState::FailSafeAllRed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Group currently green or yellow
    pub fn active_group(&self) -> Option<usize> {
        match self.state {
            SignalState::Green { group, .. } | SignalState::Yellow { group, .. } => Some(group),
            SignalState::FailSafeAllRed { .. } => None,
        }
    }

    pub fn green_lanes(&self) -> Vec<Lane> {
        self.colors
            .iter()
            .filter(|(_, c)| **c == SignalColor::Green)
            .map(|(l, _)| *l)
            .collect()
    }

    /// Next instant at which [`tick`](Self::tick) will act on its own.
    ///
    /// Override greens have none; the coordinator ends them.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SignalState::Green {
                mode: GreenMode::Normal { deadline, .. },
                ..
            } => Some(deadline),
            SignalState::Yellow { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Instant at which the current normal green has served its minimum.
    pub fn min_green_at(&self) -> Option<Instant> {
        match self.state {
            SignalState::Green {
                group,
                started,
                mode: GreenMode::Normal { served_before, .. },
            } => {
                let min = self.layout.groups()[group].min_green;
                Some(started + min.saturating_sub(served_before))
            }
            _ => None,
        }
    }

    /// End of the hold when `group` is the current override green.
    pub fn override_until(&self, group: usize) -> Option<Instant> {
        match self.state {
            SignalState::Green {
                group: g,
                mode: GreenMode::Override { until },
                ..
            } if g == group => Some(until),
            _ => None,
        }
    }

    /// Position to come back to once an override chain ends.
    pub fn restore_point(&self, now: Instant) -> Option<RestorePoint> {
        match self.state {
            SignalState::Green {
                group,
                started,
                mode:
                    GreenMode::Normal {
                        deadline,
                        served_before,
                    },
            } => Some(RestorePoint {
                group,
                plan: GreenPlan::Resume {
                    remaining: deadline.saturating_duration_since(now),
                    served: served_before + now.saturating_duration_since(started),
                },
            }),
            SignalState::Yellow { next, plan, .. } => Some(RestorePoint {
                group: next,
                plan: match plan {
                    GreenPlan::Override(_) => GreenPlan::Fresh,
                    other => other,
                },
            }),
            _ => None,
        }
    }

    // ========== Transitions ==========

    /// Apply at most one timed transition.
    ///
    /// `counts` feed the policy when a fresh normal green starts.
    #[instrument(level = "trace", name = "signal_engine_tick", skip(self, counts, now), fields(intersection = %self.id))]
    pub fn tick(&mut self, counts: &LaneCounts, now: Instant) -> Option<Transition> {
        match self.state {
            SignalState::Green {
                group,
                started,
                mode: mode @ GreenMode::Normal { deadline, .. },
            } if now >= deadline => {
                self.check_min_served(group, started, mode, now);
                let next = self.policy.next_group(&self.layout, group, counts);
                Some(self.enter_yellow(group, next, GreenPlan::Fresh, now))
            }
            SignalState::Yellow {
                deadline,
                next,
                plan,
                ..
            } if now >= deadline => Some(self.enter_green(next, plan, counts, now)),
            _ => None,
        }
    }

    /// Route the signal to `target` for an override hold.
    ///
    /// A different normal green must have served its minimum unless
    /// `bypass_min` is set (strictly higher priority than the honored alert).
    #[instrument(name = "signal_engine_preempt", skip(self, grant, now), fields(intersection = %self.id))]
    pub fn begin_preemption(
        &mut self,
        target: usize,
        grant: OverrideGrant,
        bypass_min: bool,
        now: Instant,
    ) -> Result<Preemption, EngineError> {
        self.layout.group(target)?;
        let min_pending = !bypass_min && self.min_green_at().is_some_and(|at| now < at);

        match self.state {
            SignalState::FailSafeAllRed { ref reason } => Err(EngineError::FailSafe {
                reason: reason.clone(),
            }),
            SignalState::Green { group, started, .. } if group == target => {
                self.state = SignalState::Green {
                    group,
                    started,
                    mode: GreenMode::Override {
                        until: grant.until(now),
                    },
                };
                Ok(Preemption::Held)
            }
            SignalState::Green {
                mode: GreenMode::Normal { .. },
                ..
            } if min_pending => {
                debug!(target, "preemption deferred until min green served");
                Ok(Preemption::Deferred)
            }
            SignalState::Green { group, .. } => {
                self.enter_yellow(group, target, GreenPlan::Override(grant), now);
                Ok(Preemption::Started)
            }
            SignalState::Yellow { group, .. } if group == target => {
                debug!(target, "preemption deferred until yellow clears");
                Ok(Preemption::Deferred)
            }
            SignalState::Yellow {
                group, deadline, ..
            } => {
                self.state = SignalState::Yellow {
                    group,
                    deadline,
                    next: target,
                    plan: GreenPlan::Override(grant),
                };
                Ok(Preemption::Redirected)
            }
        }
    }

    /// Leave an override and return to `point`.
    ///
    /// The same group continues green without a colour change; any other
    /// group is reached through yellow. A yellow of the restored group itself
    /// runs out towards its planned next group.
    #[instrument(name = "signal_engine_restore", skip(self, point, counts, now), fields(intersection = %self.id, group = point.group))]
    pub fn restore(
        &mut self,
        point: RestorePoint,
        counts: &LaneCounts,
        now: Instant,
    ) -> Result<Option<Transition>, EngineError> {
        self.layout.group(point.group)?;

        match self.state {
            SignalState::FailSafeAllRed { ref reason } => Err(EngineError::FailSafe {
                reason: reason.clone(),
            }),
            SignalState::Green { group, .. } if group == point.group => {
                let mode = self.normal_mode(group, point.plan, counts, now);
                self.state = SignalState::Green {
                    group,
                    started: now,
                    mode,
                };
                Ok(None)
            }
            SignalState::Green { group, .. } => {
                Ok(Some(self.enter_yellow(group, point.group, point.plan, now)))
            }
            SignalState::Yellow { group, .. } if group == point.group => {
                debug!(group, "restore target is clearing; yellow keeps its next group");
                Ok(None)
            }
            SignalState::Yellow {
                group, deadline, ..
            } => {
                self.state = SignalState::Yellow {
                    group,
                    deadline,
                    next: point.group,
                    plan: point.plan,
                };
                Ok(None)
            }
        }
    }

    /// Flag a timed normal green that ends before its minimum.
    fn check_min_served(&mut self, group: usize, started: Instant, mode: GreenMode, now: Instant) {
        let GreenMode::Normal { served_before, .. } = mode else {
            return;
        };
        let served = served_before + now.saturating_duration_since(started);
        let min = self.layout.groups()[group].min_green;
        if served < min && self.pending.is_none() {
            self.pending = Some(InvariantViolation::MinGreenCut {
                group: self.layout.groups()[group].name.clone(),
                served_s: served.as_secs_f64(),
                min_s: min.as_secs_f64(),
            });
        }
    }

    /// Green `group` turns yellow towards `next`.
    fn enter_yellow(&mut self, group: usize, next: usize, plan: GreenPlan, now: Instant) -> Transition {
        self.cycle_count += 1;
        self.state = SignalState::Yellow {
            group,
            deadline: now + self.yellow,
            next,
            plan,
        };
        self.sync_colors();

        metrics::counter!("aisc_phase_transitions_total", "intersection" => self.id.to_string(), "to" => "yellow")
            .increment(1);
        debug!(
            intersection = %self.id,
            from = %self.layout.groups()[group].name,
            next = %self.layout.groups()[next].name,
            "green -> yellow"
        );

        Transition::ToYellow { from: group, next }
    }

    fn enter_green(&mut self, group: usize, plan: GreenPlan, counts: &LaneCounts, now: Instant) -> Transition {
        let (mode, held) = match plan {
            GreenPlan::Override(grant) => (
                GreenMode::Override {
                    until: grant.until(now),
                },
                true,
            ),
            other => (self.normal_mode(group, other, counts, now), false),
        };

        self.state = SignalState::Green {
            group,
            started: now,
            mode,
        };
        self.sync_colors();

        metrics::counter!("aisc_phase_transitions_total", "intersection" => self.id.to_string(), "to" => "green")
            .increment(1);
        debug!(
            intersection = %self.id,
            group = %self.layout.groups()[group].name,
            held,
            "yellow -> green"
        );

        Transition::ToGreen { group, held }
    }

    fn normal_mode(&mut self, group: usize, plan: GreenPlan, counts: &LaneCounts, now: Instant) -> GreenMode {
        let (planned, remaining, served_before) = match plan {
            GreenPlan::Resume { remaining, served } => (served + remaining, remaining, served),
            _ => {
                let d = self.policy.propose(&self.layout.groups()[group], counts);
                (d, d, Duration::ZERO)
            }
        };

        let max = self.layout.groups()[group].max_green;
        if planned > max && self.pending.is_none() {
            self.pending = Some(InvariantViolation::MaxGreenExceeded {
                group: self.layout.groups()[group].name.clone(),
                planned_s: planned.as_secs_f64(),
                max_s: max.as_secs_f64(),
            });
        }

        GreenMode::Normal {
            deadline: now + remaining,
            served_before,
        }
    }

    // ========== Safety ==========

    /// Colour every lane should show in the current structural state.
    fn expected_color(&self, lane_group: usize) -> SignalColor {
        match self.state {
            SignalState::Green { group, .. } if group == lane_group => SignalColor::Green,
            SignalState::Yellow { group, .. } if group == lane_group => SignalColor::Yellow,
            _ => SignalColor::Red,
        }
    }

    fn sync_colors(&mut self) {
        let updates: Vec<(Lane, SignalColor)> = self
            .layout
            .lanes()
            .map(|(lane, g)| (lane, self.expected_color(g)))
            .collect();
        for (lane, color) in updates {
            self.set_color(lane, color);
        }
    }

    fn set_color(&mut self, lane: Lane, color: SignalColor) {
        let prev = self.colors.insert(lane, color);
        if prev == Some(SignalColor::Green) && color == SignalColor::Red && self.pending.is_none() {
            self.pending = Some(InvariantViolation::SkippedYellow { lane });
        }
    }

    /// Check every safety invariant against the current state.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if let Some(v) = &self.pending {
            return Err(v.clone());
        }

        for (lane, g) in self.layout.lanes() {
            let expected = self.expected_color(g);
            let actual = self.colors.get(&lane).copied().unwrap_or(SignalColor::Red);
            if actual != expected {
                return Err(InvariantViolation::ColorMismatch {
                    lane,
                    expected,
                    actual,
                });
            }
        }

        let green = self.green_lanes();
        let mut groups = green.iter().filter_map(|l| self.layout.group_of(*l));
        if let Some(first) = groups.next() {
            if groups.any(|g| g != first) {
                return Err(InvariantViolation::ConflictingGreens { lanes: green });
            }
        }

        if let SignalState::Green {
            group,
            started,
            mode:
                GreenMode::Normal {
                    deadline,
                    served_before,
                },
        } = self.state
        {
            let planned = served_before + deadline.saturating_duration_since(started);
            let max = self.layout.groups()[group].max_green;
            if planned > max {
                return Err(InvariantViolation::MaxGreenExceeded {
                    group: self.layout.groups()[group].name.clone(),
                    planned_s: planned.as_secs_f64(),
                    max_s: max.as_secs_f64(),
                });
            }
        }

        Ok(())
    }

    /// Check invariants and enter fail-safe on violation.
    pub fn enforce_invariants(&mut self) -> Option<InvariantViolation> {
        if self.is_failed() {
            return None;
        }
        match self.check_invariants() {
            Ok(()) => None,
            Err(v) => {
                self.enter_fail_safe(v.to_string());
                Some(v)
            }
        }
    }

    /// All lanes red until [`reset`](Self::reset).
    pub fn enter_fail_safe(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(intersection = %self.id, reason = %reason, "entering fail-safe all-red");
        metrics::counter!("aisc_fail_safe_total", "intersection" => self.id.to_string()).increment(1);

        self.state = SignalState::FailSafeAllRed { reason };
        for color in self.colors.values_mut() {
            *color = SignalColor::Red;
        }
        self.pending = None;
    }

    /// Operator reset: back to the initial state.
    #[instrument(name = "signal_engine_reset", skip(self, counts, now), fields(intersection = %self.id))]
    pub fn reset(&mut self, counts: &LaneCounts, now: Instant) {
        for color in self.colors.values_mut() {
            *color = SignalColor::Red;
        }
        self.pending = None;
        self.cycle_count = 0;
        self.start_initial(counts, now);
    }

    // ========== Observation ==========

    /// Per-lane observable phases at `now`.
    pub fn phases(&self, now: Instant) -> BTreeMap<Lane, SignalPhase> {
        let active_remaining = match self.state {
            SignalState::Green {
                mode: GreenMode::Normal { deadline, .. },
                ..
            }
            | SignalState::Yellow { deadline, .. } => deadline.saturating_duration_since(now),
            SignalState::Green {
                mode: GreenMode::Override { until },
                ..
            } => until.saturating_duration_since(now),
            SignalState::FailSafeAllRed { .. } => Duration::ZERO,
        };

        self.layout
            .lanes()
            .map(|(lane, g)| {
                let group = &self.layout.groups()[g];
                let color = self.colors.get(&lane).copied().unwrap_or(SignalColor::Red);
                let remaining = if color == SignalColor::Red {
                    Duration::ZERO
                } else {
                    active_remaining
                };
                (
                    lane,
                    SignalPhase {
                        color,
                        remaining_time_s: remaining.as_secs_f64(),
                        min_duration_s: group.min_green.as_secs_f64(),
                        max_duration_s: group.max_green.as_secs_f64(),
                        group: group.name.clone(),
                    },
                )
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn force_color(&mut self, lane: Lane, color: SignalColor) {
        self.set_color(lane, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::tests::ns_ew;
    use contracts::empty_lane_counts;

    const YELLOW: Duration = Duration::from_secs(3);

    fn machine(now: Instant) -> SignalStateMachine {
        SignalStateMachine::new(
            "x1".into(),
            ns_ew(10, 120),
            TimingPolicy::new(30.0, 2.0),
            YELLOW,
            &empty_lane_counts(),
            now,
        )
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_initial_state() {
        let t0 = Instant::now();
        let sm = machine(t0);
        assert_eq!(sm.active_group(), Some(0));
        assert_eq!(sm.green_lanes(), vec![Lane::North, Lane::South]);
        assert_eq!(sm.next_deadline(), Some(t0 + secs(30)));
        let phases = sm.phases(t0);
        assert_eq!(phases[&Lane::North].remaining_time_s, 30.0);
        assert_eq!(phases[&Lane::East].color, SignalColor::Red);
        assert_eq!(phases[&Lane::East].remaining_time_s, 0.0);
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_normal_cycle_through_yellow() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();

        assert_eq!(sm.tick(&counts, t0 + secs(29)), None);
        assert_eq!(
            sm.tick(&counts, t0 + secs(30)),
            Some(Transition::ToYellow { from: 0, next: 1 })
        );
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Yellow);
        assert_eq!(sm.colors()[&Lane::East], SignalColor::Red);
        assert_eq!(sm.cycle_count(), 1);

        assert_eq!(sm.tick(&counts, t0 + secs(32)), None);
        assert_eq!(
            sm.tick(&counts, t0 + secs(33)),
            Some(Transition::ToGreen { group: 1, held: false })
        );
        assert_eq!(sm.green_lanes(), vec![Lane::East, Lane::West]);
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Red);
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_late_tick_does_not_shorten_yellow() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();

        // One tick far past both the green and the would-be yellow deadline
        let late = t0 + secs(100);
        assert!(matches!(sm.tick(&counts, late), Some(Transition::ToYellow { .. })));
        assert_eq!(sm.next_deadline(), Some(late + YELLOW));
        assert_eq!(sm.tick(&counts, late), None);
    }

    #[test]
    fn test_fresh_green_uses_counts_at_start() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let mut counts = empty_lane_counts();
        counts.get_mut(&Lane::East).unwrap().vehicle_count = 5;

        sm.tick(&counts, t0 + secs(30));
        sm.tick(&counts, t0 + secs(33));
        // 30 + 2 * 5
        assert_eq!(sm.next_deadline(), Some(t0 + secs(33 + 40)));
    }

    #[test]
    fn test_preemption_deferred_until_min_green() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(300),
        };

        assert_eq!(
            sm.begin_preemption(1, grant, false, t0 + secs(3)).unwrap(),
            Preemption::Deferred
        );
        assert_eq!(sm.min_green_at(), Some(t0 + secs(10)));
        assert_eq!(
            sm.begin_preemption(1, grant, false, t0 + secs(10)).unwrap(),
            Preemption::Started
        );
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Yellow);

        let counts = empty_lane_counts();
        assert_eq!(
            sm.tick(&counts, t0 + secs(13)),
            Some(Transition::ToGreen { group: 1, held: true })
        );
        assert_eq!(sm.override_until(1), Some(t0 + secs(73)));
        assert_eq!(sm.next_deadline(), None);
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_bypass_min_green() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(300),
        };
        assert_eq!(
            sm.begin_preemption(1, grant, true, t0 + secs(2)).unwrap(),
            Preemption::Started
        );
        assert!(sm.enforce_invariants().is_none());
    }

    #[test]
    fn test_override_hold_bounded_by_expiry() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(20),
        };
        assert_eq!(
            sm.begin_preemption(0, grant, false, t0 + secs(5)).unwrap(),
            Preemption::Held
        );
        assert_eq!(sm.override_until(0), Some(t0 + secs(20)));
    }

    #[test]
    fn test_override_not_timed_out_by_tick() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let grant = OverrideGrant {
            hold: secs(5),
            expires_at: t0 + secs(300),
        };
        sm.begin_preemption(0, grant, false, t0).unwrap();
        assert_eq!(sm.tick(&empty_lane_counts(), t0 + secs(500)), None);
        assert_eq!(sm.green_lanes(), vec![Lane::North, Lane::South]);
    }

    #[test]
    fn test_restore_resumes_remaining() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(600),
        };

        // ns has 30s, preempted at 12s with 18s remaining
        let point = sm.restore_point(t0 + secs(12)).unwrap();
        assert_eq!(
            point.plan,
            GreenPlan::Resume {
                remaining: secs(18),
                served: secs(12)
            }
        );
        sm.begin_preemption(1, grant, false, t0 + secs(12)).unwrap();
        sm.tick(&counts, t0 + secs(15));
        assert_eq!(sm.override_until(1), Some(t0 + secs(75)));

        let tr = sm.restore(point, &counts, t0 + secs(75)).unwrap();
        assert_eq!(tr, Some(Transition::ToYellow { from: 1, next: 0 }));
        sm.tick(&counts, t0 + secs(78));
        assert_eq!(sm.active_group(), Some(0));
        assert_eq!(sm.next_deadline(), Some(t0 + secs(78 + 18)));
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_restore_same_group_keeps_green() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(600),
        };
        let point = sm.restore_point(t0 + secs(5)).unwrap();
        sm.begin_preemption(0, grant, false, t0 + secs(5)).unwrap();

        assert_eq!(sm.restore(point, &counts, t0 + secs(65)).unwrap(), None);
        assert_eq!(sm.next_deadline(), Some(t0 + secs(65 + 25)));
        assert_eq!(sm.green_lanes(), vec![Lane::North, Lane::South]);
    }

    #[test]
    fn test_redirect_during_yellow() {
        let t0 = Instant::now();
        let layout = crate::PhaseLayout::new(vec![
            crate::PhaseGroup::new("n", vec![Lane::North], secs(5), secs(60)),
            crate::PhaseGroup::new("s", vec![Lane::South], secs(5), secs(60)),
            crate::PhaseGroup::new("ew", vec![Lane::East, Lane::West], secs(5), secs(60)),
        ])
        .unwrap();
        let counts = empty_lane_counts();
        let mut sm = SignalStateMachine::new(
            "x3".into(),
            layout,
            TimingPolicy::new(10.0, 0.0),
            YELLOW,
            &counts,
            t0,
        );
        sm.tick(&counts, t0 + secs(10));
        let grant = OverrideGrant {
            hold: secs(30),
            expires_at: t0 + secs(600),
        };
        assert_eq!(
            sm.begin_preemption(2, grant, false, t0 + secs(11)).unwrap(),
            Preemption::Redirected
        );
        assert_eq!(
            sm.tick(&counts, t0 + secs(13)),
            Some(Transition::ToGreen { group: 2, held: true })
        );
        // yellow still measured from its start, not from the redirect
        assert_eq!(sm.override_until(2), Some(t0 + secs(43)));
    }

    #[test]
    fn test_preemption_waits_for_own_yellow() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(600),
        };

        sm.tick(&counts, t0 + secs(30));
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Yellow);
        assert_eq!(
            sm.begin_preemption(0, grant, true, t0 + secs(31)).unwrap(),
            Preemption::Deferred
        );
        assert!(matches!(sm.state(), SignalState::Yellow { next: 1, plan: GreenPlan::Fresh, .. }));

        // North clears to red before it can be green again
        assert_eq!(
            sm.tick(&counts, t0 + secs(33)),
            Some(Transition::ToGreen { group: 1, held: false })
        );
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Red);
        assert_eq!(
            sm.begin_preemption(0, grant, false, t0 + secs(34)).unwrap(),
            Preemption::Deferred
        );
        assert_eq!(
            sm.begin_preemption(0, grant, false, t0 + secs(43)).unwrap(),
            Preemption::Started
        );
        assert_eq!(
            sm.tick(&counts, t0 + secs(46)),
            Some(Transition::ToGreen { group: 0, held: true })
        );
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_restore_to_clearing_group_keeps_yellow() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let counts = empty_lane_counts();
        sm.tick(&counts, t0 + secs(30));

        let point = RestorePoint {
            group: 0,
            plan: GreenPlan::Fresh,
        };
        assert_eq!(sm.restore(point, &counts, t0 + secs(31)).unwrap(), None);
        assert_eq!(sm.colors()[&Lane::North], SignalColor::Yellow);
        assert_eq!(
            sm.tick(&counts, t0 + secs(33)),
            Some(Transition::ToGreen { group: 1, held: false })
        );
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_skipped_yellow_enters_fail_safe() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        sm.force_color(Lane::North, SignalColor::Red);

        let v = sm.enforce_invariants().unwrap();
        assert_eq!(v, InvariantViolation::SkippedYellow { lane: Lane::North });
        assert!(sm.is_failed());
        assert!(sm.green_lanes().is_empty());
        assert!(sm.colors().values().all(|c| *c == SignalColor::Red));
        assert!(sm.tick(&empty_lane_counts(), t0 + secs(500)).is_none());
        assert!(sm.is_failed());
    }

    #[test]
    fn test_conflicting_green_detected() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        sm.force_color(Lane::East, SignalColor::Green);
        assert!(matches!(
            sm.check_invariants(),
            Err(InvariantViolation::ColorMismatch { lane: Lane::East, .. })
        ));
    }

    #[test]
    fn test_preemption_refused_in_fail_safe_and_reset() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        sm.enter_fail_safe("test");
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(600),
        };
        assert!(matches!(
            sm.begin_preemption(1, grant, true, t0),
            Err(EngineError::FailSafe { .. })
        ));
        assert_eq!(sm.failure(), Some("test"));

        sm.reset(&empty_lane_counts(), t0 + secs(1));
        assert!(!sm.is_failed());
        assert_eq!(sm.active_group(), Some(0));
        assert!(sm.check_invariants().is_ok());
    }

    #[test]
    fn test_unknown_group_rejected() {
        let t0 = Instant::now();
        let mut sm = machine(t0);
        let grant = OverrideGrant {
            hold: secs(60),
            expires_at: t0 + secs(600),
        };
        assert!(matches!(
            sm.begin_preemption(7, grant, false, t0),
            Err(EngineError::UnknownGroup(7))
        ));
    }
}
