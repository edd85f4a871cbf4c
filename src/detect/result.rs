use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A 2D point in pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in pixel space, `x1 < x2` and `y1 < y2` once validated.
///
/// Serialized as `[x1, y1, x2, y2]`, the layout detectors emit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn validate(&self) -> Result<()> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(anyhow!("bounding box has non-finite coordinates"));
        }
        if coords.iter().any(|c| *c < 0.0) {
            return Err(anyhow!("bounding box extends to negative coordinates"));
        }
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(anyhow!(
                "degenerate bounding box [{}, {}, {}, {}]",
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(())
    }

    /// Rejects boxes reaching past a `width` x `height` frame. A frame with a
    /// zero dimension has no known extent and accepts any box.
    pub fn validate_within(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if f64::from(self.x2) > f64::from(width) || f64::from(self.y2) > f64::from(height) {
            return Err(anyhow!(
                "bounding box [{}, {}, {}, {}] outside {}x{} frame",
                self.x1,
                self.y1,
                self.x2,
                self.y2,
                width,
                height
            ));
        }
        Ok(())
    }

    /// Arithmetic mean of the corners.
    pub fn center(&self) -> Point {
        Point {
            x: (f64::from(self.x1) + f64::from(self.x2)) / 2.0,
            y: (f64::from(self.y1) + f64::from(self.y2)) / 2.0,
        }
    }

    /// Inclusive containment: points on an edge are inside.
    pub fn contains(&self, p: Point) -> bool {
        f64::from(self.x1) <= p.x
            && p.x <= f64::from(self.x2)
            && f64::from(self.y1) <= p.y
            && p.y <= f64::from(self.y2)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detector output, before canonicalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(anyhow!("detection has an empty class label"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "detection confidence {} out of bounds",
                self.confidence
            ));
        }
        self.bbox.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_is_inclusive_at_edges() {
        let b = BoundingBox::new(10.0, 20.0, 110.0, 220.0);
        assert!(b.contains(Point::new(10.0, 20.0)));
        assert!(b.contains(Point::new(110.0, 220.0)));
        assert!(b.contains(Point::new(10.0, 100.0)));
        assert!(!b.contains(Point::new(9.999, 100.0)));
        assert!(!b.contains(Point::new(60.0, 220.001)));
    }

    #[test]
    fn center_is_mean_of_corners() {
        let b = BoundingBox::new(0.0, 0.0, 3.0, 5.0);
        assert_eq!(b.center(), Point::new(1.5, 2.5));
    }

    #[test]
    fn degenerate_boxes_are_rejected() {
        assert!(BoundingBox::new(5.0, 5.0, 5.0, 10.0).validate().is_err());
        assert!(BoundingBox::new(5.0, 10.0, 8.0, 2.0).validate().is_err());
        assert!(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).validate().is_err());
        assert!(BoundingBox::new(-4.0, 0.0, 1.0, 1.0).validate().is_err());
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn boxes_past_the_frame_edge_are_out_of_range() {
        let inside = BoundingBox::new(0.0, 0.0, 1920.0, 1080.0);
        assert!(inside.validate_within(1920, 1080).is_ok());
        let far = BoundingBox::new(5000.0, 4000.0, 6000.0, 9000.0);
        assert!(far.validate_within(1920, 1080).is_err());
        assert!(BoundingBox::new(10.0, 10.0, 20.0, 1081.0)
            .validate_within(1920, 1080)
            .is_err());
        assert!(far.validate_within(0, 0).is_ok());
    }

    #[test]
    fn detection_requires_label_and_confidence_bounds() {
        let b = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(Detection::new(b, "", 0.5).validate().is_err());
        assert!(Detection::new(b, "   ", 0.5).validate().is_err());
        assert!(Detection::new(b, "helmet", 1.5).validate().is_err());
        assert!(Detection::new(b, "helmet", 0.5).validate().is_ok());
    }

    #[test]
    fn bbox_uses_array_wire_layout() {
        let det: Detection = serde_json::from_str(
            r#"{"bbox": [1.0, 2.0, 3.0, 4.0], "label": "Helmet", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(det.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let json = serde_json::to_string(&det.bbox).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
    }
}
