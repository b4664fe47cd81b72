//! Frame container and overlay primitives.
//!
//! - `Frame`: RGB24 pixels behind an `Arc`, never mutated after acquisition.
//! - `FrameCanvas`: owned copy used to draw boxes and text; `finish()` yields a new `Frame`.
//! - `FrameLabel`: text overlays, kept as metadata and burned into pixels.
//!
//! Labels drawn through a canvas are in the pixels immediately. Labels added
//! with `Frame::with_label` share the original pixels and are burned in by
//! `rendered()` (and so by JPEG encoding).

use anyhow::{anyhow, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use serde::Serialize;
use std::sync::Arc;

use crate::detect::BoundingBox;

/// Dimensions of the placeholder emitted when the camera cannot be read.
pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

/// Maximum characters of a detector error kept in the frame label.
pub const ERROR_LABEL_CHARS: usize = 30;

/// Each 8x8 glyph cell is drawn at this scale.
const GLYPH_SCALE: u32 = 2;
const GLYPH_SIZE: u32 = 8 * GLYPH_SCALE;

// ----------------------------------------------------------------------------
// Colors and labels
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const YELLOW: Rgb = Rgb(255, 255, 0);
    pub const BLUE: Rgb = Rgb(0, 0, 255);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
}

/// Text overlay; `(x, y)` is the bottom-left corner of the first glyph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameLabel {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub color: Rgb,
}

impl FrameLabel {
    pub fn new(text: impl Into<String>, x: u32, y: u32, color: Rgb) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            color,
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One acquired RGB24 image.
///
/// Cloning is cheap: pixels are shared. Any drawing goes through `FrameCanvas`,
/// which copies the pixels first.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Position of the frame in its source's stream, starting at 1.
    pub sequence: u64,
    labels: Vec<FrameLabel>,
    /// Leading labels already present in the pixels.
    burned: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            sequence,
            labels: Vec::new(),
            burned: 0,
        })
    }

    /// Solid black frame.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Result<Self> {
        let len = rgb_len(width, height)?;
        Self::new(vec![0u8; len], width, height, sequence)
    }

    /// Fixed-size black frame with "Camera Error" burned in.
    pub fn placeholder(sequence: u64) -> Self {
        let len = (PLACEHOLDER_WIDTH * PLACEHOLDER_HEIGHT * 3) as usize;
        let mut canvas = FrameCanvas {
            data: vec![0u8; len],
            width: PLACEHOLDER_WIDTH,
            height: PLACEHOLDER_HEIGHT,
            sequence,
            labels: Vec::new(),
        };
        canvas.label(FrameLabel::new("Camera Error", 50, 240, Rgb::RED));
        canvas.finish()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn labels(&self) -> &[FrameLabel] {
        &self.labels
    }

    /// Returns true when both frames share the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Same pixels with an extra overlay label, burned in on `rendered()`.
    pub fn with_label(&self, label: FrameLabel) -> Self {
        let mut out = self.clone();
        out.labels.push(label);
        out
    }

    /// Copy of this frame with a truncated detector error burned in.
    pub fn with_error_marker(&self, error: &str) -> Self {
        let snippet: String = error.chars().take(ERROR_LABEL_CHARS).collect();
        let mut canvas = self.canvas();
        canvas.label(FrameLabel::new(
            format!("Processing Error: {}", snippet),
            10,
            110,
            Rgb::RED,
        ));
        canvas.finish()
    }

    /// Start a drawable copy of this frame. Pending labels are burned in first.
    pub fn canvas(&self) -> FrameCanvas {
        let mut canvas = FrameCanvas {
            data: self.data.to_vec(),
            width: self.width,
            height: self.height,
            sequence: self.sequence,
            labels: self.labels[..self.burned].to_vec(),
        };
        for label in &self.labels[self.burned..] {
            canvas.label(label.clone());
        }
        canvas
    }

    /// This frame with every label in the pixels.
    pub fn rendered(&self) -> Frame {
        if self.burned == self.labels.len() {
            self.clone()
        } else {
            self.canvas().finish()
        }
    }

    #[cfg(feature = "jpeg")]
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        use image::codecs::jpeg::JpegEncoder;

        let frame = self.rendered();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                &frame.data,
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;
        Ok(out)
    }

    #[cfg(feature = "jpeg")]
    pub fn save_jpeg(&self, path: &std::path::Path, quality: u8) -> Result<()> {
        let bytes = self.encode_jpeg(quality)?;
        std::fs::write(path, bytes)
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))
    }
}

// ----------------------------------------------------------------------------
// FrameCanvas
// ----------------------------------------------------------------------------

/// Owned pixel copy used for annotation.
pub struct FrameCanvas {
    data: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    labels: Vec<FrameLabel>,
}

impl FrameCanvas {
    /// Draw a rectangle outline, clipped to the frame.
    pub fn draw_box(&mut self, bbox: &BoundingBox, color: Rgb, thickness: u32) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let max_x = self.width - 1;
        let max_y = self.height - 1;
        let x1 = clamp_coord(bbox.x1, max_x);
        let y1 = clamp_coord(bbox.y1, max_y);
        let x2 = clamp_coord(bbox.x2, max_x);
        let y2 = clamp_coord(bbox.y2, max_y);

        for t in 0..thickness {
            let top = (y1 + t).min(y2);
            let bottom = y2.saturating_sub(t).max(y1);
            let left = (x1 + t).min(x2);
            let right = x2.saturating_sub(t).max(x1);
            for x in x1..=x2 {
                self.put(x, top, color);
                self.put(x, bottom, color);
            }
            for y in y1..=y2 {
                self.put(left, y, color);
                self.put(right, y, color);
            }
        }
    }

    /// Burn `label` into the pixels and record it. Glyphs past the edge are clipped.
    pub fn label(&mut self, label: FrameLabel) {
        let top = label.y.saturating_sub(GLYPH_SIZE);
        let mut left = label.x;
        for ch in label.text.chars() {
            if left >= self.width {
                break;
            }
            if let Some(rows) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) {
                self.draw_glyph(&rows, left, top, label.color);
            }
            left = left.saturating_add(GLYPH_SIZE);
        }
        self.labels.push(label);
    }

    pub fn finish(self) -> Frame {
        let burned = self.labels.len();
        Frame {
            data: self.data.into(),
            width: self.width,
            height: self.height,
            sequence: self.sequence,
            labels: self.labels,
            burned,
        }
    }

    fn draw_glyph(&mut self, rows: &[u8; 8], left: u32, top: u32, color: Rgb) {
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1u8 << col) == 0 {
                    continue;
                }
                let x0 = left + col * GLYPH_SCALE;
                let y0 = top + row as u32 * GLYPH_SCALE;
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        self.put(x0 + dx, y0 + dy, color);
                    }
                }
            }
        }
    }

    fn put(&mut self, x: u32, y: u32, color: Rgb) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        if let Some(px) = self.data.get_mut(idx..idx + 3) {
            px[0] = color.0;
            px[1] = color.1;
            px[2] = color.2;
        }
    }
}

fn clamp_coord(value: f32, max: u32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value as u32).min(max)
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 1).is_ok());
    }

    #[test]
    fn drawing_never_touches_the_source_frame() -> Result<()> {
        let raw = Frame::blank(8, 8, 1)?;
        let mut canvas = raw.canvas();
        canvas.draw_box(&BoundingBox::new(1.0, 1.0, 6.0, 6.0)?, Rgb::RED, 1);
        let annotated = canvas.finish();

        assert!(raw.pixels().iter().all(|b| *b == 0));
        assert!(!annotated.shares_pixels_with(&raw));
        let corner = ((8 + 1) * 3) as usize;
        assert_eq!(&annotated.pixels()[corner..corner + 3], &[255, 0, 0]);
        Ok(())
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() -> Result<()> {
        let raw = Frame::blank(4, 4, 1)?;
        let mut canvas = raw.canvas();
        canvas.draw_box(&BoundingBox::new(2.0, 2.0, 50.0, 50.0)?, Rgb::GREEN, 2);
        let annotated = canvas.finish();
        assert_eq!(annotated.pixels().len(), 4 * 4 * 3);
        Ok(())
    }

    fn lit_bytes(frame: &Frame) -> usize {
        frame.pixels().iter().filter(|b| **b != 0).count()
    }

    #[test]
    fn placeholder_is_fixed_size_with_error_text_in_pixels() {
        let frame = Frame::placeholder(7);
        assert_eq!(frame.width, PLACEHOLDER_WIDTH);
        assert_eq!(frame.height, PLACEHOLDER_HEIGHT);
        assert_eq!(frame.labels()[0].text, "Camera Error");
        assert!(lit_bytes(&frame) > 0);

        // Text sits on the label's baseline row band, in red.
        let row = 240 - GLYPH_SIZE / 2;
        let start = (row * PLACEHOLDER_WIDTH * 3) as usize;
        let band = &frame.pixels()[start..start + (PLACEHOLDER_WIDTH * 3) as usize];
        assert!(band.chunks(3).any(|px| px == [255, 0, 0]));
        assert!(frame.rendered().shares_pixels_with(&frame));
    }

    #[test]
    fn error_marker_truncates_message_and_burns_it_in() -> Result<()> {
        let raw = Frame::blank(320, 128, 1)?;
        let marked = raw.with_error_marker(&"x".repeat(80));
        let label = &marked.labels()[0];
        assert_eq!(label.text, format!("Processing Error: {}", "x".repeat(30)));
        assert!(!marked.shares_pixels_with(&raw));
        assert!(marked.pixels().chunks(3).any(|px| px == [255, 0, 0]));
        assert_eq!(lit_bytes(&raw), 0);
        assert!(raw.labels().is_empty());
        Ok(())
    }

    #[test]
    fn with_label_defers_drawing_until_rendered() -> Result<()> {
        let raw = Frame::blank(64, 32, 1)?;
        let labelled = raw.with_label(FrameLabel::new("OK", 2, 20, Rgb::WHITE));
        assert!(labelled.shares_pixels_with(&raw));
        assert_eq!(lit_bytes(&labelled), 0);

        let rendered = labelled.rendered();
        assert!(lit_bytes(&rendered) > 0);
        assert_eq!(rendered.labels(), labelled.labels());
        assert!(rendered.rendered().shares_pixels_with(&rendered));
        Ok(())
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn saved_jpeg_carries_burned_in_status() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("status.jpg");
        let frame = Frame::blank(160, 48, 4)?.with_label(FrameLabel::new(
            "No Garbage",
            10,
            30,
            Rgb::GREEN,
        ));
        frame.save_jpeg(&path, 90)?;

        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (160, 48));
        assert!(decoded.pixels().any(|px| px[1] > 128 && px[0] < 100));
        Ok(())
    }

    #[test]
    fn text_past_the_edge_is_clipped() -> Result<()> {
        let raw = Frame::blank(10, 10, 1)?;
        let mut canvas = raw.canvas();
        canvas.label(FrameLabel::new("a long label", 4, 400, Rgb::GREEN));
        canvas.label(FrameLabel::new("Wide", 6, 9, Rgb::GREEN));
        let frame = canvas.finish();
        assert_eq!(frame.pixels().len(), 10 * 10 * 3);
        assert_eq!(frame.labels().len(), 2);
        Ok(())
    }
}
