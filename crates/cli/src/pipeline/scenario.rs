//! JSON-lines scenario replay.
//!
//! One step per line, ordered by `at_ms` (offset from replay start):
//!
//! ```text
//! {"at_ms": 0, "intersection": "main-st", "kind": "detections", "detections": [...]}
//! {"at_ms": 4000, "intersection": "main-st", "kind": "emergency", "request": {...}}
//! {"at_ms": 90000, "intersection": "main-st", "kind": "reset"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use contracts::{Detection, EmergencyRequest, IntersectionId};
use controller::IntersectionRegistry;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioStep {
    pub at_ms: u64,
    pub intersection: IntersectionId,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioAction {
    Detections {
        detections: Vec<Detection>,
        #[serde(default)]
        processing_time_ms: f64,
    },
    Emergency {
        request: EmergencyRequest,
    },
    Reset,
}

impl ScenarioAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Detections { .. } => "detections",
            Self::Emergency { .. } => "emergency",
            Self::Reset => "reset",
        }
    }
}

/// Replay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub steps: u64,
    pub failed: u64,
    pub alerts_accepted: u64,
}

/// Parsed scenario, sorted by offset (stable for equal offsets)
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step: ScenarioStep = serde_json::from_str(line)
                .map_err(|e| CliError::scenario(origin, idx + 1, e.to_string()))?;
            steps.push(step);
        }
        steps.sort_by_key(|s| s.at_ms);
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }

    /// Offset of the last step
    pub fn span(&self) -> Duration {
        Duration::from_millis(self.steps.last().map_or(0, |s| s.at_ms))
    }

    /// Apply every step at its offset, scaled by `speed`.
    ///
    /// A failing step is logged and counted; the replay continues.
    pub async fn replay(&self, registry: &IntersectionRegistry, speed: f64) -> ReplayStats {
        let start = Instant::now();
        let mut stats = ReplayStats::default();

        for step in &self.steps {
            let offset = Duration::from_millis(step.at_ms).div_f64(speed);
            tokio::time::sleep_until(start + offset).await;
            stats.steps += 1;

            let handle = match registry.get(&step.intersection) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(at_ms = step.at_ms, error = %e, "scenario step skipped");
                    stats.failed += 1;
                    continue;
                }
            };

            let applied = match &step.action {
                ScenarioAction::Detections {
                    detections,
                    processing_time_ms,
                } => handle
                    .submit_detections(detections, *processing_time_ms)
                    .await
                    .map(|report| {
                        info!(
                            intersection = %step.intersection,
                            vehicles = report.total_vehicles,
                            "scenario detections applied"
                        );
                    }),
                ScenarioAction::Emergency { request } => {
                    handle.submit_emergency(request.clone()).await.map(|ack| {
                        if ack.is_accepted() {
                            stats.alerts_accepted += 1;
                        }
                        info!(
                            intersection = %step.intersection,
                            alert_id = %ack.alert_id,
                            status = ?ack.status,
                            "scenario alert submitted"
                        );
                    })
                }
                ScenarioAction::Reset => handle.reset().await,
            };

            if let Err(e) = applied {
                warn!(
                    at_ms = step.at_ms,
                    kind = step.action.kind(),
                    error = %e,
                    "scenario step failed"
                );
                stats.failed += 1;
            }
        }

        stats
    }
}

/// Replay speed must be a positive finite multiplier.
pub fn check_speed(speed: f64) -> Result<f64> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(CliError::invalid_argument(
            "replay_speed",
            format!("must be a positive number, got {speed}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AckStatus, ControllerBlueprint, EmergencyType, Lane};
    use dispatcher::BroadcastHub;
    use std::sync::Arc;

    const SCENARIO: &str = r#"
# two cars, then an ambulance alert
{"at_ms": 2000, "intersection": "main", "kind": "emergency", "request": {"alert_id": "amb-1", "emergency_type": "ambulance", "detected_lane": "east", "priority_level": 4}}
{"at_ms": 0, "intersection": "main", "kind": "detections", "detections": [{"class": "car", "confidence": 0.9, "bounding_box": {"x1": 0.0, "y1": 0.0, "x2": 5.0, "y2": 5.0}, "assigned_lane": "north"}]}

{"at_ms": 3000, "intersection": "other", "kind": "reset"}
"#;

    fn blueprint() -> ControllerBlueprint {
        let intersection = serde_json::from_str(
            r#"{"id": "main", "phase_groups": [
                {"name": "ns", "lanes": ["north", "south"], "min_green_s": 5.0},
                {"name": "ew", "lanes": ["east", "west"], "min_green_s": 5.0}]}"#,
        )
        .unwrap();
        ControllerBlueprint::with_intersections(vec![intersection])
    }

    #[test]
    fn test_parse_sorts_and_skips_comments() {
        let scenario = Scenario::parse(SCENARIO, "inline").unwrap();
        assert_eq!(scenario.len(), 3);
        assert_eq!(scenario.steps()[0].at_ms, 0);
        assert!(matches!(
            scenario.steps()[1].action,
            ScenarioAction::Emergency { .. }
        ));
        assert_eq!(scenario.span(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_reports_line() {
        let err = Scenario::parse("{\"at_ms\": 0}\n", "bad.jsonl").unwrap_err();
        assert!(matches!(err, CliError::Scenario { line: 1, .. }));
    }

    #[test]
    fn test_check_speed() {
        assert!(check_speed(2.0).is_ok());
        assert!(check_speed(0.0).is_err());
        assert!(check_speed(f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_applies_steps() {
        let blueprint = blueprint();
        let hub = Arc::new(BroadcastHub::from_blueprint(&blueprint));
        let mut registry = IntersectionRegistry::spawn(&blueprint, hub, None)
            .await
            .unwrap();
        let scenario = Scenario::parse(SCENARIO, "inline").unwrap();

        let stats = scenario.replay(&registry, 2.0).await;
        assert_eq!(stats.steps, 3);
        assert_eq!(stats.alerts_accepted, 1);
        // "other" is not configured
        assert_eq!(stats.failed, 1);

        let handle = registry.get(&IntersectionId::new("main")).unwrap();
        let dup = handle
            .submit_emergency(EmergencyRequest::new(
                "amb-1",
                EmergencyType::Ambulance,
                Lane::East,
                4,
            ))
            .await
            .unwrap();
        assert_eq!(dup.status, AckStatus::Duplicate);
        registry.shutdown().await;
    }
}
