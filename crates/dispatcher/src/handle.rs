//! ObserverHandle - drives one push sink from its own hub subscription

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::PushSink;

use crate::hub::Subscription;
use crate::metrics::SinkMetrics;

/// Handle to a running observer worker
pub struct ObserverHandle {
    name: String,
    subscriber_id: u64,
    stop_tx: oneshot::Sender<()>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl ObserverHandle {
    /// Spawn the worker task consuming `subscription` into `sink`
    pub fn spawn<S: PushSink + 'static>(sink: S, subscription: Subscription) -> Self {
        let name = sink.name().to_string();
        let subscriber_id = subscription.id();
        let metrics = Arc::new(SinkMetrics::with_drop_counter(subscription.drop_counter()));
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            observer_worker(sink, subscription, stop_rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            subscriber_id,
            stop_tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hub subscriber id backing this observer
    pub fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Stop the worker, then flush and close the sink
    #[instrument(name = "observer_handle_shutdown", skip(self), fields(observer = %self.name))]
    pub async fn shutdown(self) {
        // Worker may already have stopped on its own
        let _ = self.stop_tx.send(());
        if let Err(e) = self.worker_handle.await {
            error!(observer = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(observer = %self.name, "ObserverHandle shutdown complete");
    }
}

#[instrument(
    name = "observer_worker_loop",
    skip(sink, subscription, stop_rx, metrics),
    fields(observer = %name)
)]
async fn observer_worker<S: PushSink>(
    mut sink: S,
    mut subscription: Subscription,
    mut stop_rx: oneshot::Receiver<()>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(observer = %name, "Observer worker started");

    loop {
        let message = tokio::select! {
            _ = &mut stop_rx => break,
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        metrics.set_queue_len(subscription.pending_events());

        match sink.write(&message).await {
            Ok(()) => metrics.inc_write_count(),
            Err(e) => {
                metrics.inc_failure_count();
                metrics::counter!("aisc_observer_failures_total", "observer" => name.clone())
                    .increment(1);
                error!(
                    observer = %name,
                    kind = message.kind(),
                    error = %e,
                    "Write failed"
                );
                // A failing observer never affects the hub or other observers
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(observer = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(observer = %name, error = %e, "Close failed on shutdown");
    }

    debug!(observer = %name, "Observer worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use chrono::Utc;
    use contracts::{AlertOutcome, AlertOutcomeKind, ContractError, IntersectionId, Lane, PushMessage};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::{sleep, Duration};

    struct MockSink {
        name: String,
        write_count: Arc<AtomicU64>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl PushSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, _message: &PushMessage) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.write_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn mock(name: &str, should_fail: bool, delay_ms: u64) -> (MockSink, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let sink = MockSink {
            name: name.to_string(),
            write_count: Arc::clone(&count),
            should_fail,
            delay_ms,
        };
        (sink, count)
    }

    fn event(i: usize) -> PushMessage {
        PushMessage::AlertOutcome(AlertOutcome {
            intersection_id: "x1".into(),
            alert_id: format!("a{i}"),
            kind: AlertOutcomeKind::Accepted,
            target_lane: Lane::North,
            priority_level: 1,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_observer_receives_events() {
        let hub = BroadcastHub::new([IntersectionId::new("x1")], 16);
        let (sink, count) = mock("test", false, 0);
        let handle = ObserverHandle::spawn(sink, hub.subscribe("test"));

        for i in 0..5 {
            hub.publish_event(&IntersectionId::new("x1"), event(i));
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::Relaxed), 5);
        assert_eq!(handle.metrics().write_count(), 5);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_observer_drops_without_blocking_hub() {
        let hub = BroadcastHub::new([IntersectionId::new("x1")], 16);
        let (sink, _count) = mock("slow", false, 100);
        let handle = ObserverHandle::spawn(sink, hub.subscribe_with_capacity("slow", 2));

        for i in 0..10 {
            hub.publish_event(&IntersectionId::new("x1"), event(i));
        }

        assert!(handle.metrics().dropped_count() > 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let hub = BroadcastHub::new([IntersectionId::new("x1")], 16);
        let (bad, _) = mock("failing", true, 0);
        let (good, good_count) = mock("good", false, 0);
        let bad = ObserverHandle::spawn(bad, hub.subscribe("failing"));
        let good = ObserverHandle::spawn(good, hub.subscribe("good"));

        for i in 0..3 {
            hub.publish_event(&IntersectionId::new("x1"), event(i));
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(bad.metrics().failure_count(), 3);
        assert_eq!(good_count.load(Ordering::Relaxed), 3);
        bad.shutdown().await;
        good.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_stops_when_unsubscribed() {
        let hub = BroadcastHub::new([IntersectionId::new("x1")], 16);
        let (sink, _) = mock("gone", false, 0);
        let handle = ObserverHandle::spawn(sink, hub.subscribe("gone"));

        hub.unsubscribe(handle.subscriber_id());
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
