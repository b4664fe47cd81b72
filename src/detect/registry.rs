use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::Detector;

/// Named detectors with a default selection.
///
/// The pipeline owns exactly one detector, so selection hands the boxed
/// detector out of the registry instead of sharing it.
pub struct DetectorRegistry {
    detectors: HashMap<String, Box<dyn Detector>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a detector. The first registered detector becomes the default.
    pub fn register<D: Detector + 'static>(&mut self, detector: D) {
        self.register_boxed(Box::new(detector));
    }

    pub fn register_boxed(&mut self, detector: Box<dyn Detector>) {
        let name = detector.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.detectors.insert(name, detector);
    }

    /// Set default detector by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.detectors.contains_key(name) {
            return Err(anyhow!(
                "detector '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove and return a detector by name.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn Detector>> {
        self.detectors.remove(name)
    }

    /// Remove and return the default detector.
    pub fn take_default(&mut self) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no detector registered"))?;
        self.take(&name)
            .ok_or_else(|| anyhow!("detector '{}' already taken", name))
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorOutput, ScriptedDetector};
    use crate::frame::Frame;

    struct NamedDetector(&'static str);

    impl Detector for NamedDetector {
        fn name(&self) -> &'static str {
            self.0
        }

        fn detect(&mut self, frame: &Frame) -> Result<DetectorOutput> {
            Ok(DetectorOutput {
                detections: Vec::new(),
                annotated: frame.clone(),
            })
        }
    }

    #[test]
    fn first_registered_is_default() -> Result<()> {
        let mut registry = DetectorRegistry::new();
        registry.register(ScriptedDetector::new());
        registry.register(NamedDetector("other"));
        assert_eq!(registry.default_name(), Some("scripted"));
        assert_eq!(registry.list(), vec!["other", "scripted"]);

        registry.set_default("other")?;
        assert_eq!(registry.take_default()?.name(), "other");
        assert!(registry.take_default().is_err());
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = DetectorRegistry::new();
        registry.register(ScriptedDetector::new());
        let err = registry.set_default("yolo").unwrap_err();
        assert!(err.to_string().contains("scripted"));
    }
}
