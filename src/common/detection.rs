use serde::{Deserialize, Serialize};
use crate::common::BBox;

/// One predicted object: box in original-image pixels, class and a `[0, 1]` score.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_id: usize, label: &str, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            label: label.to_string(),
            confidence,
            bbox,
        }
    }
}

/// Detections for one image, in query order.
pub type DetectionSet = Vec<Detection>;
