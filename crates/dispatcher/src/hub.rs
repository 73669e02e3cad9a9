//! BroadcastHub - fan-out of snapshots and events to push subscribers
//!
//! Every intersection gets its own channel, created once when the hub is
//! built; controllers only ever touch their own channel. Publishing never
//! waits on a subscriber:
//! - intersection status goes through the channel's `watch` slot, which
//!   keeps only the newest snapshot (latest wins)
//! - discrete events go through a bounded per-subscriber queue; a full
//!   queue drops the event for that subscriber only
//!
//! A [`Subscription`] merges all channels. Subscribers whose receiving side
//! is gone are removed lazily on the next publish.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{ControllerBlueprint, IntersectionId, IntersectionSnapshot, PushMessage};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

type Status = Option<Arc<IntersectionSnapshot>>;

/// Hub-wide counters
#[derive(Debug, Default)]
pub struct HubMetrics {
    snapshots_published: AtomicU64,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    subscribers_removed: AtomicU64,
}

impl HubMetrics {
    pub fn snapshots_published(&self) -> u64 {
        self.snapshots_published.load(Ordering::Relaxed)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn subscribers_removed(&self) -> u64 {
        self.subscribers_removed.load(Ordering::Relaxed)
    }
}

struct SubscriberSlot {
    id: u64,
    name: String,
    events_tx: mpsc::Sender<PushMessage>,
    wake: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

/// Publishing side of one intersection
struct IntersectionChannel {
    status_tx: watch::Sender<Status>,
    subscribers: Mutex<Vec<SubscriberSlot>>,
}

impl IntersectionChannel {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(None);
        Self {
            status_tx,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SubscriberSlot>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publish/subscribe hub for a fixed set of intersections
pub struct BroadcastHub {
    channels: BTreeMap<IntersectionId, IntersectionChannel>,
    next_id: AtomicU64,
    event_capacity: usize,
    metrics: HubMetrics,
}

impl BroadcastHub {
    /// Create a hub with one channel per intersection; subscribers buffer up
    /// to `event_capacity` events.
    pub fn new(intersections: impl IntoIterator<Item = IntersectionId>, event_capacity: usize) -> Self {
        Self {
            channels: intersections
                .into_iter()
                .map(|id| (id, IntersectionChannel::new()))
                .collect(),
            next_id: AtomicU64::new(0),
            event_capacity: event_capacity.max(1),
            metrics: HubMetrics::default(),
        }
    }

    /// Hub for every configured intersection, sized from `[hub]`.
    pub fn from_blueprint(blueprint: &ControllerBlueprint) -> Self {
        Self::new(
            blueprint.intersections.iter().map(|i| i.id.clone()),
            blueprint.hub.event_queue_capacity,
        )
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    /// Intersections this hub carries, ordered by id
    pub fn intersections(&self) -> impl Iterator<Item = &IntersectionId> {
        self.channels.keys()
    }

    pub fn carries(&self, id: &IntersectionId) -> bool {
        self.channels.contains_key(id)
    }

    /// Distinct subscribers attached to any channel
    pub fn subscriber_count(&self) -> usize {
        let mut ids: Vec<u64> = self
            .channels
            .values()
            .flat_map(|c| c.lock().iter().map(|s| s.id).collect::<Vec<_>>())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Most recent snapshot published for `id`
    pub fn latest(&self, id: &IntersectionId) -> Option<Arc<IntersectionSnapshot>> {
        self.channels.get(id)?.status_tx.borrow().clone()
    }

    /// Most recent snapshot of every intersection, ordered by id
    pub fn latest_all(&self) -> Vec<Arc<IntersectionSnapshot>> {
        self.channels
            .values()
            .filter_map(|c| c.status_tx.borrow().clone())
            .collect()
    }

    /// Register a subscriber using the hub's default event capacity.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        self.subscribe_with_capacity(name, self.event_capacity)
    }

    /// Register a subscriber on every intersection. The latest snapshot of
    /// each intersection is delivered first.
    pub fn subscribe_with_capacity(
        &self,
        name: impl Into<String>,
        event_capacity: usize,
    ) -> Subscription {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        let wake = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicU64::new(0));

        let mut status = Vec::with_capacity(self.channels.len());
        for (intersection, channel) in &self.channels {
            status.push((intersection.clone(), channel.status_tx.subscribe()));
            channel.lock().push(SubscriberSlot {
                id,
                name: name.clone(),
                events_tx: events_tx.clone(),
                wake: Arc::clone(&wake),
                dropped: Arc::clone(&dropped),
            });
        }
        debug!(subscriber = id, intersections = status.len(), "Subscriber added");

        Subscription {
            id,
            name,
            status,
            events_rx,
            wake,
            closed: false,
            seen: BTreeMap::new(),
            ready: VecDeque::new(),
            dropped,
        }
    }

    /// Remove a subscriber; its subscription ends after draining buffered events.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut removed = false;
        for channel in self.channels.values() {
            let mut slots = channel.lock();
            let before = slots.len();
            slots.retain(|s| s.id != id);
            removed |= before != slots.len();
        }
        removed
    }

    fn channel(&self, id: &IntersectionId, kind: &'static str) -> Option<&IntersectionChannel> {
        let channel = self.channels.get(id);
        if channel.is_none() {
            warn!(intersection = %id, kind, "Message for an intersection the hub does not carry, dropped");
        }
        channel
    }

    /// Publish a new snapshot. Never blocks on subscribers.
    pub fn publish_status(&self, snapshot: Arc<IntersectionSnapshot>) {
        let Some(channel) = self.channel(&snapshot.intersection_id, "intersection_status") else {
            return;
        };
        channel.status_tx.send_replace(Some(snapshot));

        let mut slots = channel.lock();
        let before = slots.len();
        slots.retain(|slot| {
            if slot.events_tx.is_closed() {
                return false;
            }
            slot.wake.notify_one();
            true
        });
        self.note_removed(before - slots.len());
        self.metrics
            .snapshots_published
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Convenience wrapper around [`publish_status`](Self::publish_status).
    pub fn publish(&self, snapshot: IntersectionSnapshot) -> Arc<IntersectionSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.publish_status(Arc::clone(&snapshot));
        snapshot
    }

    /// Publish a discrete event (detection report, alert, outcome) on the
    /// channel of `intersection`.
    ///
    /// Status messages are routed to [`publish_status`](Self::publish_status).
    pub fn publish_event(&self, intersection: &IntersectionId, message: PushMessage) {
        if let PushMessage::IntersectionStatus(snapshot) = message {
            self.publish_status(snapshot);
            return;
        }
        let kind = message.kind();
        let Some(channel) = self.channel(intersection, kind) else {
            return;
        };

        let mut slots = channel.lock();
        let before = slots.len();
        slots.retain(|slot| match slot.events_tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                slot.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("aisc_hub_events_dropped_total", "subscriber" => slot.name.clone())
                    .increment(1);
                warn!(subscriber = %slot.name, kind, "Event queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        self.note_removed(before - slots.len());
        self.metrics.events_published.fetch_add(1, Ordering::Relaxed);
    }

    fn note_removed(&self, removed: usize) {
        if removed > 0 {
            self.metrics
                .subscribers_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Disconnected subscribers removed");
        }
    }
}

/// Receiving side of one hub subscriber
pub struct Subscription {
    id: u64,
    name: String,
    status: Vec<(IntersectionId, watch::Receiver<Status>)>,
    events_rx: mpsc::Receiver<PushMessage>,
    wake: Arc<Notify>,
    closed: bool,
    /// Last sequence delivered per intersection
    seen: BTreeMap<IntersectionId, u64>,
    ready: VecDeque<Arc<IntersectionSnapshot>>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events dropped for this subscriber because its queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, for observers that report it
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Buffered events not yet received
    pub fn pending_events(&self) -> usize {
        self.events_rx.len()
    }

    /// Next message. Queued events are delivered before status updates.
    ///
    /// Returns `None` once the subscriber was removed from the hub (or the
    /// hub dropped) and everything buffered has been received.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        loop {
            if let Ok(event) = self.events_rx.try_recv() {
                return Some(event);
            }
            self.collect_status();
            if let Some(snapshot) = self.ready.pop_front() {
                return Some(PushMessage::IntersectionStatus(snapshot));
            }
            if self.closed {
                return None;
            }

            tokio::select! {
                biased;
                event = self.events_rx.recv() => match event {
                    Some(event) => return Some(event),
                    // Every slot holding a sender is gone
                    None => self.closed = true,
                },
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Newest snapshot per intersection whose sequence was not yet delivered
    fn collect_status(&mut self) {
        for (id, rx) in &mut self.status {
            let Some(snapshot) = rx.borrow_and_update().clone() else {
                continue;
            };
            let fresh = self
                .seen
                .get(id)
                .map_or(true, |last| snapshot.sequence > *last);
            if fresh {
                self.seen.insert(id.clone(), snapshot.sequence);
                self.ready.push_back(snapshot);
            }
        }
    }
}
