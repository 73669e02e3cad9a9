//! Detection data model
//!
//! Inputs from the external detection model and the report returned to the
//! caller of the image ingestion endpoint.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ContractError, IntersectionId, Lane};

/// Axis-aligned bounding box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Finite and not inverted.
    pub fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 <= self.x2
            && self.y1 <= self.y2
    }
}

/// Single object detection with its lane already resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    pub assigned_lane: Lane,
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f64, assigned_lane: Lane) -> Self {
        Self {
            class: class.into(),
            confidence,
            bounding_box: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            assigned_lane,
        }
    }

    pub fn with_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = bounding_box;
        self
    }
}

/// Accepted image content types
pub const SUPPORTED_IMAGE_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Uploaded intersection image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl ImagePayload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Reject unsupported content types and empty bodies.
    pub fn validate(&self) -> Result<(), ContractError> {
        if !SUPPORTED_IMAGE_TYPES.contains(&self.content_type.as_str()) {
            return Err(ContractError::InvalidImage {
                message: format!(
                    "content type '{}' not supported, expected one of {:?}",
                    self.content_type, SUPPORTED_IMAGE_TYPES
                ),
            });
        }
        if self.data.is_empty() {
            return Err(ContractError::InvalidImage {
                message: format!("image '{}' is empty", self.name),
            });
        }
        Ok(())
    }
}

/// Result of one detection ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub intersection_id: IntersectionId,
    pub total_vehicles: u32,
    pub lane_counts: BTreeMap<Lane, u32>,
    /// Lanes that contained an emergency-class vehicle
    #[serde(default)]
    pub emergency_lanes: Vec<Lane>,
    pub processing_time_ms: f64,
    pub confidence_threshold: f64,
    /// Set when the batch was degraded to zero counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    pub timestamp: DateTime<Utc>,
}
