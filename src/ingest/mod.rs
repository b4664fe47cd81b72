//! Frame ingestion sources.
//!
//! This module provides the camera side of the pipeline:
//! - Synthetic source (`stub://name`) for tests and demos
//! - USB/V4L2 devices (feature: ingest-v4l2), addressed as `/dev/videoN` or a bare index
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! Sources are built closed. The pipeline calls `open()` when capture starts,
//! and on a read failure it closes, reopens and backs off before reading again.
//! Network streams are not supported.

use serde::Serialize;
use std::fmt;

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file::FileSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A camera-like producer of frames.
pub trait FrameSource: Send {
    /// Acquire the device. Calling `open` on an open source is a no-op.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Read the next frame. Reading a closed source is a `ReadFailure`.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Failures surfaced by a `FrameSource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceError {
    DeviceUnavailable(String),
    ReadFailure(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::DeviceUnavailable(msg) => write!(f, "device unavailable: {}", msg),
            SourceError::ReadFailure(msg) => write!(f, "frame read failed: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SourceStats {
    pub uri: String,
    pub frames_captured: u64,
    pub read_failures: u64,
    /// Resolution actually negotiated; may differ from the requested one.
    pub width: u32,
    pub height: u32,
}

/// Requested source parameters.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://camera1".to_string(),
            width: 1280,
            height: 720,
            target_fps: 10,
        }
    }
}

/// What a source URI points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Synthetic(String),
    Device(String),
    File(String),
}

impl SourceSpec {
    pub fn parse(uri: &str) -> anyhow::Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            anyhow::bail!("source uri is empty");
        }
        if let Some(name) = uri.strip_prefix("stub://") {
            return Ok(SourceSpec::Synthetic(name.to_string()));
        }
        if uri.chars().all(|c| c.is_ascii_digit()) {
            return Ok(SourceSpec::Device(format!("/dev/video{}", uri)));
        }
        if uri.starts_with("/dev/video") {
            return Ok(SourceSpec::Device(uri.to_string()));
        }
        if uri.contains("://") {
            anyhow::bail!("network sources are not supported: {}", uri);
        }
        Ok(SourceSpec::File(uri.to_string()))
    }
}

/// Build a closed source for the configured URI.
pub fn build_source(config: &SourceConfig) -> anyhow::Result<Box<dyn FrameSource>> {
    match SourceSpec::parse(&config.uri)? {
        SourceSpec::Synthetic(_) => Ok(Box::new(SyntheticSource::new(config.clone()))),
        SourceSpec::Device(device) => device_source(config, device),
        SourceSpec::File(path) => file_source(config, path),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn device_source(config: &SourceConfig, device: String) -> anyhow::Result<Box<dyn FrameSource>> {
    let mut config = config.clone();
    config.uri = device;
    Ok(Box::new(V4l2Source::new(config)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_source(_config: &SourceConfig, device: String) -> anyhow::Result<Box<dyn FrameSource>> {
    anyhow::bail!("camera {} requires the ingest-v4l2 feature", device)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn file_source(config: &SourceConfig, path: String) -> anyhow::Result<Box<dyn FrameSource>> {
    let mut config = config.clone();
    config.uri = path;
    Ok(Box::new(FileSource::new(config)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn file_source(_config: &SourceConfig, path: String) -> anyhow::Result<Box<dyn FrameSource>> {
    anyhow::bail!("file source {} requires the ingest-file-ffmpeg feature", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_uris() -> anyhow::Result<()> {
        assert_eq!(
            SourceSpec::parse("stub://cam")?,
            SourceSpec::Synthetic("cam".to_string())
        );
        assert_eq!(
            SourceSpec::parse("0")?,
            SourceSpec::Device("/dev/video0".to_string())
        );
        assert_eq!(
            SourceSpec::parse("/dev/video2")?,
            SourceSpec::Device("/dev/video2".to_string())
        );
        assert_eq!(
            SourceSpec::parse("clips/street.mp4")?,
            SourceSpec::File("clips/street.mp4".to_string())
        );
        assert!(SourceSpec::parse("rtsp://camera/stream").is_err());
        assert!(SourceSpec::parse("  ").is_err());
        Ok(())
    }

    #[test]
    fn builds_synthetic_source_closed() -> anyhow::Result<()> {
        let source = build_source(&SourceConfig::default())?;
        assert!(!source.is_open());
        Ok(())
    }
}
