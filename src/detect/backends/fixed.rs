use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that reports the same detections for every frame.
///
/// Useful for soak tests of the alert gate and for wiring checks of a new
/// deployment before a model is available.
#[derive(Clone, Debug, Default)]
pub struct StaticBackend {
    detections: Vec<Detection>,
}

impl StaticBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}
