use anyhow::Result;
use std::sync::Arc;

use crate::frame::{Frame, FrameLabel, Rgb};

use super::result::{Detection, DetectorOutput};

/// Object detector.
///
/// Model loading, custom-vs-pretrained selection and class-name resolution
/// all live behind this trait. The pipeline only sees detections and the
/// annotated copy of the frame.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// The input frame is never modified; annotation goes into a copy.
    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Chooses the box color for a detection.
pub type BoxPalette = Arc<dyn Fn(&Detection) -> Rgb + Send + Sync>;

/// Red for `trash`, green for `bin`, blue for people, yellow for everything else.
pub fn default_palette() -> BoxPalette {
    Arc::new(|det: &Detection| {
        let name = det.class_name.to_lowercase();
        if name.contains("trash") {
            Rgb::RED
        } else if name.contains("bin") {
            Rgb::GREEN
        } else if name.contains("person") {
            Rgb::BLUE
        } else {
            Rgb::YELLOW
        }
    })
}

/// Draw every detection onto a copy of `frame`.
pub fn annotate(frame: &Frame, detections: &[Detection], palette: &BoxPalette) -> Frame {
    let mut canvas = frame.canvas();
    for det in detections {
        let color = palette(det);
        canvas.draw_box(&det.bbox, color, 2);
        let label_y = (det.bbox.y1 - 10.0).max(0.0) as u32;
        canvas.label(FrameLabel::new(
            det.label(),
            det.bbox.x1.max(0.0) as u32,
            label_y,
            color,
        ));
    }
    canvas.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn annotate_labels_each_detection() -> Result<()> {
        let frame = Frame::blank(64, 48, 3)?;
        let dets = vec![
            Detection::new(1, "trash", 0.91, BoundingBox::new(4.0, 20.0, 30.0, 40.0)?),
            Detection::new(0, "bin", 0.5, BoundingBox::new(32.0, 4.0, 60.0, 44.0)?),
        ];
        let annotated = annotate(&frame, &dets, &default_palette());

        let labels = annotated.labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].text, "trash: 0.91");
        assert_eq!(labels[0].color, Rgb::RED);
        assert_eq!(labels[0].y, 10);
        assert_eq!(labels[1].color, Rgb::GREEN);
        let person = Detection::new(0, "person", 0.7, BoundingBox::new(0.0, 0.0, 4.0, 4.0)?);
        assert_eq!(default_palette()(&person), Rgb::BLUE);
        assert_eq!(annotated.sequence, 3);
        assert!(frame.labels().is_empty());
        Ok(())
    }
}
