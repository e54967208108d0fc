pub mod rtdetr;

use anyhow::Result;
use opencv::core::Mat;

/// COCO class id for "person".
pub const PERSON_CLASS_ID: usize = 0;

/// One object reported by a detector, in original-frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct DetectedObject {
    pub class_id: usize,
    pub class_name: Option<String>,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [i32; 4],
}

impl DetectedObject {
    pub fn is_person(&self) -> bool {
        match self.class_name.as_deref() {
            Some(name) => name == "person",
            None => self.class_id == PERSON_CLASS_ID,
        }
    }
}

/// An object detector over single BGR frames. The sampler depends only on this
/// seam, so tests can drive it with scripted detections instead of real model
/// weights.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<DetectedObject>>;
}
