#![cfg(feature = "backend-tract")]

//! YOLO object detector on tract ONNX.
//!
//! Accepts YOLOv5-style heads (`[1, N, 5 + C]`, with objectness) and
//! YOLOv8-style heads (`[1, 4 + C, N]`, no objectness). Frames are stretched
//! to the square model input; boxes are scaled back to frame pixels.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{annotate, default_palette, BoxPalette, Detector};
use crate::detect::labels::COCO_CLASSES;
use crate::detect::result::{BoundingBox, Detection, DetectionSet, DetectorOutput};
use crate::frame::Frame;

const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

pub struct TractYoloDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
    confidence_floor: f32,
    iou_threshold: f32,
    palette: BoxPalette,
}

impl TractYoloDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    ///
    /// `class_names` defaults to the 80 COCO classes when empty.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let class_names = if class_names.is_empty() {
            COCO_CLASSES.iter().map(|name| name.to_string()).collect()
        } else {
            class_names
        };
        log::info!(
            "TractYoloDetector: loaded {} ({} classes, {}px input)",
            model_path.display(),
            class_names.len(),
            input_size
        );

        Ok(Self {
            model,
            input_size,
            class_names,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            palette: default_palette(),
        })
    }

    /// Candidates scoring below this are dropped before NMS.
    pub fn with_confidence_floor(mut self, floor: f32) -> Self {
        self.confidence_floor = floor;
        self
    }

    pub fn with_palette(mut self, palette: BoxPalette) -> Self {
        self.palette = palette;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let side = self.input_size as usize;
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let sx = (x * src_w / side).min(src_w - 1);
            let sy = (y * src_h / side).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, output: &Tensor, frame: &Frame) -> Result<DetectionSet> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }

        let classes = self.class_names.len();
        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let mut candidates = Vec::new();

        let (rows, transposed, has_objectness) = if shape[2] == 5 + classes {
            (shape[1], false, true)
        } else if shape[1] == 4 + classes {
            (shape[2], true, false)
        } else {
            return Err(anyhow!(
                "YOLO output shape {:?} does not match {} classes",
                shape,
                classes
            ));
        };
        let at = |row: usize, col: usize| -> f32 {
            if transposed {
                view[[0, col, row]]
            } else {
                view[[0, row, col]]
            }
        };
        let class_offset = if has_objectness { 5 } else { 4 };

        for row in 0..rows {
            let objectness = if has_objectness { at(row, 4) } else { 1.0 };
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..classes {
                let score = at(row, class_offset + class);
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            let confidence = objectness * best_score;
            if !confidence.is_finite() || confidence < self.confidence_floor {
                continue;
            }
            let Ok(bbox) = BoundingBox::from_center(
                at(row, 0) * scale_x,
                at(row, 1) * scale_y,
                at(row, 2) * scale_x,
                at(row, 3) * scale_y,
            ) else {
                continue;
            };
            candidates.push(Detection::new(
                best_class as u32,
                self.class_names[best_class].clone(),
                confidence,
                bbox,
            ));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl Detector for TractYoloDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let detections = self.decode(output, frame)?;
        log::debug!(
            "TractYoloDetector: frame {} -> {} detections",
            frame.sequence,
            detections.len()
        );
        let annotated = annotate(frame, &detections, &self.palette);
        Ok(DetectorOutput {
            detections,
            annotated,
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::blank(side, side, 0)?;
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy per-class non-maximum suppression.
fn non_max_suppression(mut detections: DetectionSet, iou_threshold: f32) -> DetectionSet {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: DetectionSet = Vec::new();
    for det in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}
