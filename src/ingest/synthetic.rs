//! Synthetic frame source (`stub://`).
//!
//! Produces a moving gradient at the requested resolution. The scene shifts
//! every 50 frames so consecutive frames are never identical.

use crate::frame::Frame;

use super::{FrameSource, SourceConfig, SourceError, SourceStats};

pub struct SyntheticSource {
    config: SourceConfig,
    open: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            open: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(SourceError::DeviceUnavailable(format!(
                "{} has zero resolution",
                self.config.uri
            )));
        }
        if !self.open {
            log::info!("SyntheticSource: opened {}", self.config.uri);
        }
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        if !self.open {
            return Err(SourceError::ReadFailure(format!(
                "{} is not open",
                self.config.uri
            )));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
        .map_err(|e| SourceError::ReadFailure(e.to_string()))
    }

    fn close(&mut self) {
        if self.open {
            log::info!("SyntheticSource: closed {}", self.config.uri);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            uri: self.config.uri.clone(),
            frames_captured: self.frame_count,
            read_failures: 0,
            width: self.config.width,
            height: self.config.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SourceConfig {
        SourceConfig {
            uri: "stub://test".to_string(),
            width: 32,
            height: 24,
            target_fps: 10,
        }
    }

    #[test]
    fn produces_sequenced_frames_once_open() -> anyhow::Result<()> {
        let mut source = SyntheticSource::new(small_config());
        assert!(matches!(source.read(), Err(SourceError::ReadFailure(_))));

        source.open()?;
        let first = source.read()?;
        let second = source.read()?;
        assert_eq!((first.width, first.height), (32, 24));
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.pixels(), second.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> anyhow::Result<()> {
        let mut source = SyntheticSource::new(small_config());
        source.open()?;
        source.close();
        source.close();
        assert!(!source.is_open());
        Ok(())
    }
}
