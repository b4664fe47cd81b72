//! Decides which frames pay for a detector call.
//!
//! A session counter increments once per acquired frame. The detector runs
//! when `counter % skip_factor == 0`, and optionally on the first frame of a
//! session. Skipped frames display the most recent annotated frame, or the raw
//! frame when nothing has been annotated yet.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDecision {
    Detect,
    Reuse,
}

#[derive(Debug)]
pub struct DetectionScheduler {
    skip_factor: u64,
    sample_first_frame: bool,
    counter: u64,
    last_annotated: Option<Frame>,
}

impl DetectionScheduler {
    pub fn new(skip_factor: u64, sample_first_frame: bool) -> Result<Self> {
        if skip_factor == 0 {
            return Err(anyhow!("skip factor must be at least 1"));
        }
        Ok(Self {
            skip_factor,
            sample_first_frame,
            counter: 0,
            last_annotated: None,
        })
    }

    pub fn skip_factor(&self) -> u64 {
        self.skip_factor
    }

    /// Frames seen in this session.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Count one acquired frame and decide whether to run the detector on it.
    pub fn next_frame(&mut self) -> FrameDecision {
        self.counter = self.counter.wrapping_add(1);
        let first = self.sample_first_frame && self.counter == 1;
        if first || self.counter % self.skip_factor == 0 {
            FrameDecision::Detect
        } else {
            FrameDecision::Reuse
        }
    }

    pub fn record_annotated(&mut self, frame: Frame) {
        self.last_annotated = Some(frame);
    }

    pub fn last_annotated(&self) -> Option<&Frame> {
        self.last_annotated.as_ref()
    }

    /// Frame to display when the detector is skipped.
    pub fn fallback_frame(&self, raw: &Frame) -> Frame {
        self.last_annotated.clone().unwrap_or_else(|| raw.clone())
    }

    /// Start a new capture session.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.last_annotated = None;
    }
}
