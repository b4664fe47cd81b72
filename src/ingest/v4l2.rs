//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), asks for RGB24 at the
//! configured resolution and falls back to YUYV when the driver refuses.
//! The negotiated resolution is reported through `stats()`.

use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceConfig, SourceError, SourceStats};
use crate::frame::Frame;

pub struct V4l2Source {
    config: SourceConfig,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    frame_count: u64,
    read_failures: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
            frame_count: 0,
            read_failures: 0,
            last_frame_at: None,
        }
    }

    /// True when frames are arriving within the expected cadence.
    pub fn is_healthy(&self) -> bool {
        if self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn negotiate(&mut self, device: &mut v4l::Device) -> Result<(), SourceError> {
        use v4l::video::Capture;

        let unavailable = |what: &str, err: std::io::Error| {
            SourceError::DeviceUnavailable(format!("{} {}: {}", what, self.config.uri, err))
        };

        let mut format = device
            .format()
            .map_err(|e| unavailable("read format of", e))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set RGB3 on {}: {}",
                    self.config.uri,
                    err
                );
                format.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&format)
                    .or_else(|_| device.format())
                    .map_err(|e| unavailable("read format of", e))?
            }
        };

        self.pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(SourceError::DeviceUnavailable(format!(
                    "{} offers unsupported pixel format {}",
                    self.config.uri,
                    String::from_utf8_lossy(other)
                )))
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.uri,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<(), SourceError> {
        use v4l::buffer::Type;

        if self.state.is_some() {
            return Ok(());
        }

        let mut device = v4l::Device::with_path(&self.config.uri).map_err(|e| {
            SourceError::DeviceUnavailable(format!("open {}: {}", self.config.uri, e))
        })?;
        self.negotiate(&mut device)?;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| {
            SourceError::DeviceUnavailable(format!(
                "create buffer stream for {}: {}",
                self.config.uri, e
            ))
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{}, {:?})",
            self.config.uri,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            self.read_failures += 1;
            return Err(SourceError::ReadFailure(format!(
                "{} is not open",
                self.config.uri
            )));
        };
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let raw = match captured {
            Ok(raw) => raw,
            Err(err) => {
                self.read_failures += 1;
                return Err(SourceError::ReadFailure(format!(
                    "capture from {}: {}",
                    self.config.uri, err
                )));
            }
        };

        let pixels = normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.pixel_format,
        )
        .map_err(|e| {
            self.read_failures += 1;
            SourceError::ReadFailure(e.to_string())
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        )
        .map_err(|e| SourceError::ReadFailure(e.to_string()))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.uri);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            uri: self.config.uri.clone(),
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
            width: self.active_width,
            height: self.active_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_reports_unavailable() {
        let mut source = V4l2Source::new(SourceConfig {
            uri: "/dev/video-cleansight-missing".to_string(),
            ..SourceConfig::default()
        });
        assert!(matches!(
            source.open(),
            Err(SourceError::DeviceUnavailable(_))
        ));
        assert!(!source.is_open());
        assert!(matches!(source.read(), Err(SourceError::ReadFailure(_))));
        assert_eq!(source.stats().read_failures, 1);
    }
}
