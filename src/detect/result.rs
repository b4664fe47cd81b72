use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;

use super::labels::coco_class_name;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box coordinates must be finite"));
        }
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!(
                "bounding box is empty: ({}, {}) -> ({}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Box from a centre point and size, as YOLO heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Result<Self> {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One recognised object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(
        class_id: u32,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }

    /// Detection named from the COCO label table.
    pub fn coco(class_id: u32, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        let name = coco_class_name(class_id)
            .ok_or_else(|| anyhow!("class id {} is not a COCO class", class_id))?;
        Ok(Self::new(class_id, name, confidence, bbox))
    }

    /// Overlay text, e.g. `bottle: 0.87`.
    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.class_name, self.confidence)
    }
}

pub type DetectionSet = Vec<Detection>;

/// What a detector returns for one frame.
#[derive(Clone, Debug)]
pub struct DetectorOutput {
    pub detections: DetectionSet,
    /// Copy of the input with boxes and labels drawn.
    pub annotated: Frame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(BoundingBox::new(5.0, 5.0, 5.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f32::NAN, 1.0).is_err());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() -> Result<()> {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0)?;
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0)?;
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
        let half = BoundingBox::new(5.0, 0.0, 15.0, 10.0)?;
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn coco_detection_label() -> Result<()> {
        let det = Detection::coco(39, 0.874, BoundingBox::new(1.0, 1.0, 4.0, 4.0)?)?;
        assert_eq!(det.class_name, "bottle");
        assert_eq!(det.label(), "bottle: 0.87");
        assert!(Detection::coco(500, 0.5, det.bbox).is_err());
        Ok(())
    }
}
