//! DetectionAdapter trait - boundary to the external detection model

use crate::{ContractError, Detection, ImagePayload};

/// Image-to-detections model
///
/// Implementations are invoked from the inference pool workers, never from a
/// controller event loop. Any returned value is accepted as-is; malformed
/// detections are handled by lane aggregation.
#[trait_variant::make(DetectionAdapter: Send)]
pub trait LocalDetectionAdapter {
    /// Adapter name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Run the model on one image
    ///
    /// # Errors
    /// Returns detection error with adapter context
    async fn detect(&self, image: &ImagePayload) -> Result<Vec<Detection>, ContractError>;
}
