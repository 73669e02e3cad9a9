//! LogSink - logs push message summaries via tracing

use contracts::{ContractError, PushMessage, PushSink};
use tracing::{info, instrument};

/// Observer that logs one summary line per push message
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_summary(&self, message: &PushMessage) {
        match message {
            PushMessage::IntersectionStatus(s) => info!(
                sink = %self.name,
                intersection = %s.intersection_id,
                sequence = s.sequence,
                active_group = s.active_group.as_deref().unwrap_or("-"),
                vehicles = s.total_vehicles,
                efficiency = s.efficiency_score,
                emergency = s.emergency_mode,
                failed = s.is_failed(),
                "Intersection status"
            ),
            PushMessage::VehicleDetection(r) => info!(
                sink = %self.name,
                intersection = %r.intersection_id,
                vehicles = r.total_vehicles,
                emergency_lanes = r.emergency_lanes.len(),
                processing_ms = r.processing_time_ms,
                degraded = r.degraded.is_some(),
                "Vehicle detection"
            ),
            PushMessage::EmergencyAlert(a) => info!(
                sink = %self.name,
                alert_id = %a.id,
                emergency_type = %a.emergency_type,
                lane = %a.target_lane,
                priority = a.priority_level,
                "Emergency alert"
            ),
            PushMessage::AlertOutcome(o) => info!(
                sink = %self.name,
                intersection = %o.intersection_id,
                alert_id = %o.alert_id,
                outcome = %o.kind,
                "Alert outcome"
            ),
        }
    }
}

impl PushSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, message),
        fields(sink = %self.name, kind = message.kind())
    )]
    async fn write(&mut self, message: &PushMessage) -> Result<(), ContractError> {
        self.log_summary(message);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{EmergencyAlert, EmergencyType, Lane};

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let message = PushMessage::EmergencyAlert(EmergencyAlert {
            id: "a1".to_string(),
            emergency_type: EmergencyType::Police,
            target_lane: Lane::East,
            priority_level: 4,
            created_at: Utc::now(),
            ttl_s: 30.0,
        });

        assert!(sink.write(&message).await.is_ok());
        assert!(sink.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
