//! Emergency override coordinator.
//!
//! Queues alerts by (priority desc, created_at asc, insertion asc), honors
//! them by preempting the state machine, and restores the interrupted
//! schedule once the override chain ends.
//!
//! Queue storage follows the index-separation pattern: a `BinaryHeap` of
//! lightweight keys orders the alerts, a `Slab` owns them. Keys of removed
//! alerts are skipped lazily when they reach the top of the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use contracts::{AlertOutcomeKind, EmergencyAlert, EmergencyConfig, Lane, LaneCounts, TimingConfig};
use slab::Slab;
use tracing::{debug, info, instrument, warn};

use crate::layout::{seconds, PhaseLayout};
use crate::state_machine::{OverrideGrant, Preemption, RestorePoint, SignalStateMachine};
use crate::EngineError;

/// Coordinator configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Hold of one override green
    pub override_duration: Duration,
    /// Resolved alert ids remembered for duplicate detection
    pub recent_id_window: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            override_duration: Duration::from_secs(60),
            recent_id_window: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_config(timing: &TimingConfig, emergency: &EmergencyConfig) -> Result<Self, EngineError> {
        Ok(Self {
            override_duration: seconds(timing.override_duration_s, "override_duration_s")?,
            recent_id_window: emergency.recent_id_window,
        })
    }
}

/// Immediate result of [`OverrideCoordinator::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
    Rejected(String),
}

impl SubmitOutcome {
    pub fn kind(&self) -> AlertOutcomeKind {
        match self {
            Self::Accepted => AlertOutcomeKind::Accepted,
            Self::Duplicate => AlertOutcomeKind::Duplicate,
            Self::Rejected(_) => AlertOutcomeKind::Rejected,
        }
    }
}

/// Lifecycle event produced by [`OverrideCoordinator::tick`]
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub alert: EmergencyAlert,
    pub kind: AlertOutcomeKind,
}

#[derive(Debug)]
struct QueuedAlert {
    alert: EmergencyAlert,
    group: usize,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: u8,
    created_at: DateTime<Utc>,
    seq: u64,
    slot: usize,
}

impl Ord for QueueKey {
    // Max-heap: higher priority first, then older, then earlier insertion
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct ActiveOverride {
    alert: EmergencyAlert,
    group: usize,
    expires_at: Instant,
    seq: u64,
}

/// Emergency override coordinator for one intersection
#[derive(Debug)]
pub struct OverrideCoordinator {
    config: CoordinatorConfig,
    heap: BinaryHeap<QueueKey>,
    alerts: Slab<QueuedAlert>,
    queued_ids: HashMap<String, usize>,
    active: Option<ActiveOverride>,
    restore: Option<RestorePoint>,
    recent: VecDeque<String>,
    recent_set: HashSet<String>,
    next_seq: u64,
}

impl OverrideCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            heap: BinaryHeap::new(),
            alerts: Slab::new(),
            queued_ids: HashMap::new(),
            active: None,
            restore: None,
            recent: VecDeque::new(),
            recent_set: HashSet::new(),
            next_seq: 0,
        }
    }

    // ========== Queries ==========

    pub fn queued_len(&self) -> usize {
        self.alerts.len()
    }

    pub fn active_alert(&self) -> Option<&EmergencyAlert> {
        self.active.as_ref().map(|a| &a.alert)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Alert for `lane` is queued or in effect.
    pub fn has_alert_for(&self, lane: Lane) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.alert.target_lane == lane)
            || self.alerts.iter().any(|(_, q)| q.alert.target_lane == lane)
    }

    /// Id is queued, in effect, or recently resolved.
    pub fn knows(&self, id: &str) -> bool {
        self.queued_ids.contains_key(id)
            || self.active.as_ref().is_some_and(|a| a.alert.id == id)
            || self.recent_set.contains(id)
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self, sm: &SignalStateMachine) -> Option<Instant> {
        let expiry = self.alerts.iter().map(|(_, q)| q.expires_at).min();
        let hold = self
            .active
            .as_ref()
            .and_then(|a| sm.override_until(a.group));
        let deferred = if self.active.is_none() && !self.alerts.is_empty() {
            sm.min_green_at()
        } else {
            None
        };
        [expiry, hold, deferred].into_iter().flatten().min()
    }

    // ========== Operations ==========

    /// Enqueue an alert; TTL counts from `now`.
    #[instrument(
        name = "override_submit",
        skip(self, alert, layout, now),
        fields(alert_id = %alert.id, priority = alert.priority_level, lane = %alert.target_lane)
    )]
    pub fn submit(&mut self, alert: EmergencyAlert, layout: &PhaseLayout, now: Instant) -> SubmitOutcome {
        if self.knows(&alert.id) {
            debug!("duplicate alert id");
            return SubmitOutcome::Duplicate;
        }
        let Some(group) = layout.group_of(alert.target_lane) else {
            let reason = format!("lane {} belongs to no phase group", alert.target_lane);
            warn!(reason = %reason, "alert rejected");
            return SubmitOutcome::Rejected(reason);
        };

        let Some(expires_at) = alert.ttl().and_then(|ttl| now.checked_add(ttl)) else {
            let reason = format!("ttl_s {} out of range", alert.ttl_s);
            warn!(reason = %reason, "alert rejected");
            return SubmitOutcome::Rejected(reason);
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.enqueue(QueuedAlert {
            alert,
            group,
            expires_at,
            seq,
        });
        SubmitOutcome::Accepted
    }

    /// Drive the override lifecycle for one tick.
    ///
    /// Must run before [`SignalStateMachine::tick`] in the same cycle.
    #[instrument(level = "trace", name = "override_tick", skip_all)]
    pub fn tick(
        &mut self,
        sm: &mut SignalStateMachine,
        counts: &LaneCounts,
        now: Instant,
    ) -> Result<Vec<AlertEvent>, EngineError> {
        let mut events = Vec::new();
        self.expire_queued(now, &mut events);

        if sm.is_failed() {
            self.abort_active(now, &mut events);
            return Ok(events);
        }

        // Held override ran out
        let mut chained = false;
        let held_until = self
            .active
            .as_ref()
            .and_then(|a| sm.override_until(a.group));
        if held_until.is_some_and(|until| now >= until) {
            if let Some(done) = self.active.take() {
                info!(alert_id = %done.alert.id, "override completed");
                self.remember(&done.alert.id);
                events.push(AlertEvent {
                    alert: done.alert,
                    kind: AlertOutcomeKind::Completed,
                });
            }
            if self.peek().is_none() {
                if let Some(point) = self.restore.take() {
                    sm.restore(point, counts, now)?;
                }
                return Ok(events);
            }
            chained = true;
        }

        let Some(head) = self.peek() else {
            return Ok(events);
        };

        let bypass_min = match &self.active {
            Some(active) if head.priority > active.alert.priority_level => true,
            Some(_) => return Ok(events),
            None => chained,
        };

        let (target, grant, head_id) = match self.alerts.get(head.slot) {
            Some(q) => (
                q.group,
                OverrideGrant {
                    hold: self.config.override_duration,
                    expires_at: q.expires_at,
                },
                q.alert.id.clone(),
            ),
            None => return Ok(events),
        };
        let point = sm.restore_point(now);

        if sm.begin_preemption(target, grant, bypass_min, now)? == Preemption::Deferred {
            return Ok(events);
        }

        if self.restore.is_none() {
            self.restore = point;
        }

        if let Some(prev) = self.active.take() {
            info!(alert_id = %prev.alert.id, by = %head_id, "override superseded");
            events.push(AlertEvent {
                alert: prev.alert.clone(),
                kind: AlertOutcomeKind::Superseded,
            });
            self.requeue(prev, now, &mut events);
        }

        // Its heap key goes stale and is skipped by `peek`
        let honored = self.alerts.remove(head.slot);
        self.queued_ids.remove(&honored.alert.id);
        info!(
            alert_id = %honored.alert.id,
            priority = honored.alert.priority_level,
            group = target,
            bypass_min,
            "override honored"
        );
        events.push(AlertEvent {
            alert: honored.alert.clone(),
            kind: AlertOutcomeKind::Honored,
        });
        self.active = Some(ActiveOverride {
            alert: honored.alert,
            group: honored.group,
            expires_at: honored.expires_at,
            seq: honored.seq,
        });

        Ok(events)
    }

    /// Drop the in-effect override after an operator reset.
    ///
    /// The alert goes back to the queue if its TTL remains.
    pub fn on_reset(&mut self, now: Instant) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        self.abort_active(now, &mut events);
        self.restore = None;
        events
    }

    // ========== Internals ==========

    fn enqueue(&mut self, queued: QueuedAlert) {
        let key_priority = queued.alert.priority_level;
        let key_created = queued.alert.created_at;
        let seq = queued.seq;
        let id = queued.alert.id.clone();
        let slot = self.alerts.insert(queued);
        self.queued_ids.insert(id, slot);
        self.heap.push(QueueKey {
            priority: key_priority,
            created_at: key_created,
            seq,
            slot,
        });
    }

    /// Top live key, discarding keys of removed alerts.
    fn peek(&mut self) -> Option<QueueKey> {
        while let Some(key) = self.heap.peek().copied() {
            match self.alerts.get(key.slot) {
                Some(q) if q.seq == key.seq => return Some(key),
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    fn expire_queued(&mut self, now: Instant, events: &mut Vec<AlertEvent>) {
        let expired: Vec<usize> = self
            .alerts
            .iter()
            .filter(|(_, q)| q.expires_at <= now)
            .map(|(slot, _)| slot)
            .collect();

        for slot in expired {
            let q = self.alerts.remove(slot);
            self.queued_ids.remove(&q.alert.id);
            warn!(alert_id = %q.alert.id, "alert expired before being honored");
            self.remember(&q.alert.id);
            events.push(AlertEvent {
                alert: q.alert,
                kind: AlertOutcomeKind::Expired,
            });
        }
    }

    fn abort_active(&mut self, now: Instant, events: &mut Vec<AlertEvent>) {
        if let Some(active) = self.active.take() {
            events.push(AlertEvent {
                alert: active.alert.clone(),
                kind: AlertOutcomeKind::Superseded,
            });
            self.requeue(active, now, events);
        }
        self.restore = None;
    }

    fn requeue(&mut self, active: ActiveOverride, now: Instant, events: &mut Vec<AlertEvent>) {
        if active.expires_at > now {
            self.enqueue(QueuedAlert {
                alert: active.alert,
                group: active.group,
                expires_at: active.expires_at,
                seq: active.seq,
            });
        } else {
            self.remember(&active.alert.id);
            events.push(AlertEvent {
                alert: active.alert,
                kind: AlertOutcomeKind::Expired,
            });
        }
    }

    fn remember(&mut self, id: &str) {
        if self.config.recent_id_window == 0 || self.recent_set.contains(id) {
            return;
        }
        self.recent.push_back(id.to_string());
        self.recent_set.insert(id.to_string());
        while self.recent.len() > self.config.recent_id_window {
            if let Some(old) = self.recent.pop_front() {
                self.recent_set.remove(&old);
            }
        }
    }
}
