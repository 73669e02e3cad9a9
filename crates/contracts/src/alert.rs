//! Emergency alert data model
//!
//! `EmergencyRequest` is the wire form accepted at the ingestion endpoint;
//! `EmergencyAlert` is the validated value that lives inside the override
//! coordinator until it is honored, completed or expired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{ContractError, IntersectionId, Lane};

/// Lowest accepted priority level
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority level
pub const MAX_PRIORITY: u8 = 5;
/// Longest accepted alert lifetime (one day)
pub const MAX_TTL_S: f64 = 86_400.0;

/// Kind of emergency vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    Ambulance,
    FireTruck,
    Police,
    Rescue,
}

impl EmergencyType {
    /// Map a detector class name onto an emergency type.
    pub fn from_class(class: &str) -> Option<Self> {
        match class {
            "ambulance" => Some(Self::Ambulance),
            "fire_truck" | "firetruck" | "fire truck" => Some(Self::FireTruck),
            "police" | "police_car" => Some(Self::Police),
            "rescue" => Some(Self::Rescue),
            _ => None,
        }
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ambulance => "ambulance",
            Self::FireTruck => "fire_truck",
            Self::Police => "police",
            Self::Rescue => "rescue",
        })
    }
}

/// Validated emergency alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub id: String,
    pub emergency_type: EmergencyType,
    pub target_lane: Lane,
    /// Higher is more urgent
    pub priority_level: u8,
    pub created_at: DateTime<Utc>,
    /// Time to live in seconds, counted from ingestion
    pub ttl_s: f64,
}

impl EmergencyAlert {
    /// `None` when `ttl_s` is not representable as a [`Duration`]
    pub fn ttl(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.ttl_s).ok()
    }
}

/// Emergency request as received from the outside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub alert_id: String,
    pub emergency_type: EmergencyType,
    pub detected_lane: Lane,
    pub priority_level: u8,
    #[serde(default)]
    pub ttl_s: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl EmergencyRequest {
    pub fn new(
        alert_id: impl Into<String>,
        emergency_type: EmergencyType,
        detected_lane: Lane,
        priority_level: u8,
    ) -> Self {
        Self {
            alert_id: alert_id.into(),
            emergency_type,
            detected_lane,
            priority_level,
            ttl_s: None,
            created_at: None,
        }
    }

    pub fn with_ttl(mut self, ttl_s: f64) -> Self {
        self.ttl_s = Some(ttl_s);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Validate and convert into an [`EmergencyAlert`].
    ///
    /// `default_ttl_s` applies when the request carries no ttl; `now` fills a
    /// missing `created_at`.
    pub fn into_alert(
        self,
        default_ttl_s: f64,
        now: DateTime<Utc>,
    ) -> Result<EmergencyAlert, ContractError> {
        if self.alert_id.trim().is_empty() {
            return Err(ContractError::invalid_alert("", "alert_id must not be empty"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority_level) {
            return Err(ContractError::invalid_alert(
                self.alert_id,
                format!(
                    "priority_level must be in [{}, {}]",
                    MIN_PRIORITY, MAX_PRIORITY
                ),
            ));
        }
        let ttl_s = self.ttl_s.unwrap_or(default_ttl_s);
        if !ttl_s.is_finite() || ttl_s <= 0.0 || ttl_s > MAX_TTL_S {
            return Err(ContractError::invalid_alert(
                self.alert_id,
                format!("ttl_s must be in (0, {}]", MAX_TTL_S),
            ));
        }
        Ok(EmergencyAlert {
            id: self.alert_id,
            emergency_type: self.emergency_type,
            target_lane: self.detected_lane,
            priority_level: self.priority_level,
            created_at: self.created_at.unwrap_or(now),
            ttl_s,
        })
    }
}

/// Immediate answer to an emergency submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    Accepted,
    Duplicate,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAck {
    pub alert_id: String,
    #[serde(flatten)]
    pub status: AckStatus,
}

impl EmergencyAck {
    pub fn is_accepted(&self) -> bool {
        self.status == AckStatus::Accepted
    }
}

/// Lifecycle event of an alert after submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcomeKind {
    Accepted,
    Duplicate,
    Rejected,
    /// Override green started for the alert's group
    Honored,
    /// Preempted by a higher-priority alert
    Superseded,
    Completed,
    Expired,
}

impl AlertOutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Duplicate => "duplicate",
            Self::Rejected => "rejected",
            Self::Honored => "honored",
            Self::Superseded => "superseded",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    /// No further outcome follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Duplicate | Self::Rejected | Self::Completed | Self::Expired
        )
    }
}

impl fmt::Display for AlertOutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub intersection_id: IntersectionId,
    pub alert_id: String,
    pub kind: AlertOutcomeKind,
    pub target_lane: Lane,
    pub priority_level: u8,
    pub at: DateTime<Utc>,
}
