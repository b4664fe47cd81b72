//! Deterministic detector driven by a per-frame script.
//!
//! Used by tests, demos and the default daemon build where no model is
//! available. Frames are matched on `Frame::sequence`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::detect::backend::{annotate, default_palette, BoxPalette, Detector};
use crate::detect::result::{BoundingBox, Detection, DetectionSet, DetectorOutput};
use crate::frame::Frame;

#[derive(Clone, Debug)]
enum Step {
    Report(DetectionSet),
    Fail(String),
}

pub struct ScriptedDetector {
    steps: HashMap<u64, Step>,
    periodic: Option<(u64, DetectionSet)>,
    palette: BoxPalette,
    calls: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedDetector {
    /// A detector that never reports anything.
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            periodic: None,
            palette: default_palette(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report `detections` on the frame with this sequence number.
    pub fn on_frame(mut self, sequence: u64, detections: DetectionSet) -> Self {
        self.steps.insert(sequence, Step::Report(detections));
        self
    }

    /// Fail with `message` on the frame with this sequence number.
    pub fn fail_on(mut self, sequence: u64, message: impl Into<String>) -> Self {
        self.steps.insert(sequence, Step::Fail(message.into()));
        self
    }

    /// Report `detections` on every frame whose sequence is a multiple of `period`.
    pub fn every(mut self, period: u64, detections: DetectionSet) -> Self {
        if period > 0 {
            self.periodic = Some((period, detections));
        }
        self
    }

    /// Demo script: a single `bottle` in the frame centre every `period` frames.
    pub fn periodic_litter(period: u64, width: u32, height: u32) -> Result<Self> {
        let (w, h) = (width as f32, height as f32);
        let bbox = BoundingBox::new(w * 0.4, h * 0.4, w * 0.6, h * 0.6)?;
        Ok(Self::new().every(period, vec![Detection::coco(39, 0.9, bbox)?]))
    }

    pub fn with_palette(mut self, palette: BoxPalette) -> Self {
        self.palette = palette;
        self
    }

    /// Shared log of the frame sequences this detector was invoked on.
    pub fn call_log(&self) -> Arc<Mutex<Vec<u64>>> {
        self.calls.clone()
    }

    fn step_for(&self, sequence: u64) -> Option<Step> {
        if let Some(step) = self.steps.get(&sequence) {
            return Some(step.clone());
        }
        match &self.periodic {
            Some((period, detections)) if sequence % period == 0 => {
                Some(Step::Report(detections.clone()))
            }
            _ => None,
        }
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("scripted detector call log poisoned"))?
            .push(frame.sequence);

        let detections = match self.step_for(frame.sequence) {
            Some(Step::Fail(message)) => return Err(anyhow!(message)),
            Some(Step::Report(detections)) => detections,
            None => Vec::new(),
        };
        let annotated = annotate(frame, &detections, &self.palette);
        Ok(DetectorOutput {
            detections,
            annotated,
        })
    }
}
