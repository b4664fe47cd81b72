mod backend;
mod backends;
mod labels;
mod registry;
mod result;

use anyhow::Result;
use std::path::PathBuf;

pub use backend::{annotate, default_palette, BoxPalette, Detector};
pub use backends::ScriptedDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloDetector;
pub use labels::{coco_class_name, COCO_CLASSES};
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, Detection, DetectionSet, DetectorOutput};

/// Detector selection and model parameters.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    /// Registered detector name (`scripted`, `tract`).
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    /// Model class names; empty means COCO.
    pub class_names: Vec<String>,
    /// Minimum score a model candidate needs to survive decoding.
    pub confidence_floor: f32,
    /// Period of the scripted demo detection; 0 disables it.
    pub scripted_period: u64,
    /// Frame size used to place the scripted demo detection.
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "scripted".to_string(),
            model_path: None,
            input_size: 640,
            class_names: Vec::new(),
            confidence_floor: 0.25,
            scripted_period: 0,
            frame_width: 1280,
            frame_height: 720,
        }
    }
}

/// Register every available detector, select the configured one and warm it up.
///
/// Failure here is fatal to startup: an unknown backend name or an unloadable
/// model never degrades to a different detector.
pub fn build_detector(settings: &DetectorSettings, palette: BoxPalette) -> Result<Box<dyn Detector>> {
    let mut registry = DetectorRegistry::new();

    let scripted = if settings.scripted_period > 0 {
        ScriptedDetector::periodic_litter(
            settings.scripted_period,
            settings.frame_width,
            settings.frame_height,
        )?
    } else {
        ScriptedDetector::new()
    };
    registry.register(scripted.with_palette(palette.clone()));

    #[cfg(feature = "backend-tract")]
    if settings.backend == "tract" {
        let model_path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tract detector requires a model path"))?;
        let detector =
            TractYoloDetector::new(model_path, settings.input_size, settings.class_names.clone())?
                .with_confidence_floor(settings.confidence_floor)
                .with_palette(palette);
        registry.register(detector);
    }

    registry.set_default(&settings.backend)?;
    let mut detector = registry.take_default()?;
    detector.warm_up()?;
    log::info!("detector '{}' ready", detector.name());
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_scripted_by_default() -> Result<()> {
        let detector = build_detector(&DetectorSettings::default(), default_palette())?;
        assert_eq!(detector.name(), "scripted");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let settings = DetectorSettings {
            backend: "mystery".to_string(),
            ..DetectorSettings::default()
        };
        assert!(build_detector(&settings, default_palette()).is_err());
    }
}
