//! Mock detection adapters
//!
//! Used for tests and for running the controller without a detection model.

use std::sync::Mutex;
use std::time::Duration;

use contracts::{
    BoundingBox, ContractError, Detection, DetectionAdapter, ImagePayload, Lane,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

const VEHICLE_CLASSES: [&str; 4] = ["car", "motorcycle", "bus", "truck"];
const EMERGENCY_CLASSES: [&str; 4] = ["ambulance", "fire_truck", "police", "rescue"];

/// Mock detection adapter configuration
#[derive(Debug, Clone)]
pub struct MockDetectionConfig {
    /// Adapter name
    pub name: String,

    /// Upper bound of vehicles generated per lane
    pub max_vehicles_per_lane: u32,

    /// Probability that a frame contains one emergency vehicle
    pub emergency_probability: f64,

    /// Simulated inference latency
    pub latency: Duration,

    /// RNG seed; frames are reproducible for a given seed
    pub seed: u64,
}

impl Default for MockDetectionConfig {
    fn default() -> Self {
        Self {
            name: "mock_detector".to_string(),
            max_vehicles_per_lane: 12,
            emergency_probability: 0.05,
            latency: Duration::from_millis(20),
            seed: 42,
        }
    }
}

/// Random detection generator
pub struct MockDetectionAdapter {
    config: MockDetectionConfig,
    rng: Mutex<StdRng>,
}

impl MockDetectionAdapter {
    pub fn new(config: MockDetectionConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    fn generate(&self) -> Vec<Detection> {
        let mut rng = match self.rng.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut detections = Vec::new();

        for lane in Lane::ALL {
            let n = rng.random_range(0..=self.config.max_vehicles_per_lane);
            for _ in 0..n {
                let class = VEHICLE_CLASSES[rng.random_range(0..VEHICLE_CLASSES.len())];
                detections.push(random_detection(&mut *rng, class, lane));
            }
        }

        if rng.random_bool(self.config.emergency_probability.clamp(0.0, 1.0)) {
            let class = EMERGENCY_CLASSES[rng.random_range(0..EMERGENCY_CLASSES.len())];
            let lane = Lane::ALL[rng.random_range(0..Lane::ALL.len())];
            detections.push(random_detection(&mut *rng, class, lane));
        }

        detections
    }
}

fn random_detection(rng: &mut StdRng, class: &str, lane: Lane) -> Detection {
    let x = rng.random_range(0.0..600.0);
    let y = rng.random_range(0.0..400.0);
    let w = rng.random_range(20.0..120.0);
    let h = rng.random_range(20.0..120.0);
    Detection::new(class, rng.random_range(0.3..1.0), lane)
        .with_box(BoundingBox::new(x, y, x + w, y + h))
}

impl DetectionAdapter for MockDetectionAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn detect(&self, image: &ImagePayload) -> Result<Vec<Detection>, ContractError> {
        let detections = self.generate();
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        trace!(image = %image.name, count = detections.len(), "mock detections generated");
        Ok(detections)
    }
}

/// Adapter answering every image with the same detections (or error)
pub struct StaticDetectionAdapter {
    detections: Vec<Detection>,
    error: Option<String>,
    latency: Duration,
}

impl StaticDetectionAdapter {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            error: None,
            latency: Duration::ZERO,
        }
    }

    /// Adapter that always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            detections: Vec::new(),
            error: Some(message.into()),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl DetectionAdapter for StaticDetectionAdapter {
    fn name(&self) -> &str {
        "static_detector"
    }

    async fn detect(&self, _image: &ImagePayload) -> Result<Vec<Detection>, ContractError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.error {
            Some(message) => Err(ContractError::detection(self.name(), message.clone())),
            None => Ok(self.detections.clone()),
        }
    }
}
