//! Controllers, hub and observers running together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AckStatus, AlertOutcomeKind, ControllerBlueprint, Detection, EmergencyRequest, EmergencyType,
    IntersectionConfig, IntersectionId, Lane, ObserverConfig, ObserverType, PushMessage,
    SignalColor,
};
use controller::IntersectionRegistry;
use dispatcher::{BroadcastHub, Dispatcher};
use tokio::time::sleep;

fn intersection(id: &str) -> IntersectionConfig {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "timing": {"yellow_s": 3.0, "base_duration_s": 20.0, "density_factor_s": 1.0},
        "phase_groups": [
            {"name": "ns", "lanes": ["north", "south"], "min_green_s": 5.0, "max_green_s": 40.0},
            {"name": "ew", "lanes": ["east", "west"], "min_green_s": 5.0, "max_green_s": 40.0}
        ]
    }))
    .unwrap()
}

fn request(id: &str, lane: Lane, priority: u8) -> EmergencyRequest {
    EmergencyRequest::new(id, EmergencyType::Ambulance, lane, priority)
}

fn cars(lane: Lane, n: usize) -> Vec<Detection> {
    (0..n).map(|_| Detection::new("car", 0.9, lane)).collect()
}

/// Alert outcomes per alert id, in arrival order
fn outcomes(messages: &[PushMessage]) -> BTreeMap<String, Vec<AlertOutcomeKind>> {
    let mut map: BTreeMap<String, Vec<AlertOutcomeKind>> = BTreeMap::new();
    for message in messages {
        if let PushMessage::AlertOutcome(outcome) = message {
            map.entry(outcome.alert_id.clone())
                .or_default()
                .push(outcome.kind);
        }
    }
    map
}

/// Observer writes every message kind to its JSON Lines file.
#[tokio::test(start_paused = true)]
async fn test_e2e_file_observer() {
    let dir = tempfile::tempdir().unwrap();
    let mut blueprint = ControllerBlueprint::with_intersections(vec![intersection("main")]);
    blueprint.observers.push(ObserverConfig {
        name: "jsonl".into(),
        observer_type: ObserverType::File,
        queue_capacity: 256,
        params: HashMap::from([
            ("base_path".to_string(), dir.path().display().to_string()),
            ("file".to_string(), "events.jsonl".to_string()),
        ]),
    });
    config_loader::ConfigLoader::validate(&blueprint).unwrap();

    let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
    let dispatcher = Dispatcher::start(&blueprint.observers, hub.clone())
        .await
        .unwrap();
    let mut registry = IntersectionRegistry::spawn(&blueprint, hub.clone(), None)
        .await
        .unwrap();

    let handle = registry.get(&IntersectionId::new("main")).unwrap().clone();
    handle
        .submit_detections(&cars(Lane::North, 4), 12.0)
        .await
        .unwrap();
    let ack = handle
        .submit_emergency(request("amb-1", Lane::East, 4))
        .await
        .unwrap();
    assert!(ack.is_accepted());

    // min green 5s, then 3s yellow
    sleep(Duration::from_secs(10)).await;
    let snapshot = handle.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.color_of(Lane::East), Some(SignalColor::Green));
    assert_eq!(snapshot.active_alert_id.as_deref(), Some("amb-1"));

    registry.shutdown().await;
    let metrics = dispatcher.metrics();
    dispatcher.shutdown().await;
    assert_eq!(metrics[0].1.failure_count, 0);

    let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<&str> = lines.iter().filter_map(|v| v["type"].as_str()).collect();

    for kind in ["intersection_status", "vehicle_detection", "emergency_alert", "alert_outcome"] {
        assert!(kinds.contains(&kind), "missing {kind} in {kinds:?}");
    }
    let honored = lines.iter().any(|v| {
        v["type"] == "alert_outcome" && v["data"]["alert_id"] == "amb-1" && v["data"]["kind"] == "honored"
    });
    assert!(honored);
}

/// Resubmitting an alert id changes nothing but the acknowledgement.
#[tokio::test(start_paused = true)]
async fn test_e2e_duplicate_alert_idempotent() {
    let blueprint = ControllerBlueprint::with_intersections(vec![intersection("main")]);
    let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
    let mut registry = IntersectionRegistry::spawn(&blueprint, hub.clone(), None)
        .await
        .unwrap();
    let mut subscription = hub.subscribe("test");
    let handle = registry.get(&IntersectionId::new("main")).unwrap().clone();

    let first = handle
        .submit_emergency(request("dup", Lane::East, 3))
        .await
        .unwrap();
    let before = handle.latest_snapshot().await.unwrap();
    let second = handle
        .submit_emergency(request("dup", Lane::West, 5))
        .await
        .unwrap();
    let after = handle.latest_snapshot().await.unwrap();

    assert_eq!(first.status, AckStatus::Accepted);
    assert_eq!(second.status, AckStatus::Duplicate);
    assert_eq!(before.queued_alerts, after.queued_alerts);
    assert_eq!(before.active_alert_id, after.active_alert_id);

    registry.shutdown().await;
    hub.unsubscribe(subscription.id());

    let mut messages = Vec::new();
    while let Some(message) = subscription.recv().await {
        messages.push(message);
    }
    let by_id = outcomes(&messages);
    let dup = &by_id["dup"];
    assert_eq!(dup[0], AlertOutcomeKind::Accepted);
    assert_eq!(
        dup.iter().filter(|k| **k == AlertOutcomeKind::Duplicate).count(),
        1
    );
    assert_eq!(
        dup.iter().filter(|k| **k == AlertOutcomeKind::Accepted).count(),
        1
    );
}

/// A slow subscriber sees the latest status per intersection and loses
/// events beyond its queue, without holding up the controllers.
#[tokio::test(start_paused = true)]
async fn test_e2e_slow_subscriber_latest_wins() {
    let blueprint =
        ControllerBlueprint::with_intersections(vec![intersection("a"), intersection("b")]);
    let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
    let mut registry = IntersectionRegistry::spawn(&blueprint, hub.clone(), None)
        .await
        .unwrap();
    let mut slow = hub.subscribe_with_capacity("slow", 1);

    let a = registry.get(&IntersectionId::new("a")).unwrap().clone();
    for n in 1..=3 {
        a.submit_detections(&cars(Lane::South, n), 5.0).await.unwrap();
    }
    assert_eq!(slow.dropped_events(), 2);

    // Dozens of periodic snapshots per intersection meanwhile
    sleep(Duration::from_secs(30)).await;

    let mut statuses = 0;
    let mut detections = 0;
    let mut latest: BTreeMap<IntersectionId, u64> = BTreeMap::new();
    while latest.len() < 2 || latest.values().any(|seq| *seq < 20) {
        match slow.recv().await.unwrap() {
            PushMessage::IntersectionStatus(snapshot) => {
                statuses += 1;
                let prev = latest.insert(snapshot.intersection_id.clone(), snapshot.sequence);
                assert!(prev.map_or(true, |p| p < snapshot.sequence));
            }
            PushMessage::VehicleDetection(_) => detections += 1,
            other => panic!("unexpected {}", other.kind()),
        }
    }
    assert_eq!(detections, 1);
    assert!(statuses <= 4, "received {statuses} status messages");

    registry.shutdown().await;
}

/// Operator reset brings a controller back to its first group.
#[tokio::test(start_paused = true)]
async fn test_e2e_reset_and_stopped_controller() {
    let blueprint = ControllerBlueprint::with_intersections(vec![intersection("main")]);
    let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
    let mut registry = IntersectionRegistry::spawn(&blueprint, hub, None)
        .await
        .unwrap();
    let handle = registry.get(&IntersectionId::new("main")).unwrap().clone();

    // 20s north/south green, 3s yellow, then east/west
    sleep(Duration::from_secs(25)).await;
    let snapshot = handle.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.color_of(Lane::East), Some(SignalColor::Green));
    assert_eq!(snapshot.cycle_count, 1);

    handle.reset().await.unwrap();
    let snapshot = handle.latest_snapshot().await.unwrap();
    assert_eq!(snapshot.color_of(Lane::North), Some(SignalColor::Green));
    assert_eq!(snapshot.cycle_count, 0);

    registry.shutdown().await;
    assert!(handle.latest_snapshot().await.is_err());
}
