use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{validate_location, DEFAULT_ALERT_MESSAGE, DEFAULT_LOCATION};
use crate::bridge::MqttBridgeConfig;
use crate::classify::{
    ClassClassifier, ClassMapping, DomainCategory, DEFAULT_FALLBACK_NAMES, DEFAULT_TARGET_LABEL,
};
use crate::detect::DetectorSettings;
use crate::ingest::SourceConfig;
use crate::pipeline::PipelineSettings;

const DEFAULT_SOURCE_URI: &str = "stub://camera1";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 10;
const DEFAULT_REOPEN_BACKOFF_MS: u64 = 1000;
const DEFAULT_SKIP_FACTOR: u64 = 5;
const DEFAULT_CONFIDENCE: f32 = 0.35;
const DEFAULT_BACKEND: &str = "scripted";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.25;
const DEFAULT_SLOW_INFERENCE_MS: u64 = 1000;
const DEFAULT_COOLDOWN_SECS: u64 = 15;
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MQTT_CLIENT_ID: &str = "cleansightd";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "cleansight";

#[derive(Debug, Deserialize, Default)]
struct CleansightConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    classes: Option<ClassesConfigFile>,
    alerts: Option<AlertsConfigFile>,
    api: Option<ApiConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    location: Option<String>,
    reopen_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    skip_factor: Option<u64>,
    sample_first_frame: Option<bool>,
    confidence_threshold: Option<f32>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    confidence_floor: Option<f32>,
    slow_inference_ms: Option<u64>,
    scripted_period: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassesConfigFile {
    target_label: Option<String>,
    trash_ids: Option<Vec<u32>>,
    bin_ids: Option<Vec<u32>>,
    fallback_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<u64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    topic_prefix: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CleansightConfig {
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub classes: ClassSettings,
    pub alerts: AlertSettings,
    pub api_addr: String,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub location: String,
    pub reopen_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub skip_factor: u64,
    pub sample_first_frame: bool,
    pub confidence_threshold: f32,
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub confidence_floor: f32,
    pub slow_inference: Duration,
    pub scripted_period: u64,
}

#[derive(Debug, Clone)]
pub struct ClassSettings {
    pub target_label: String,
    /// Replaces the built-in COCO table when either id list is given.
    pub mapping: ClassMapping,
    pub fallback_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct MqttSettings {
    /// `host[:port]`; the bridge is disabled when unset.
    pub broker: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CleansightConfig {
    /// Load from the file named by `CLEANSIGHT_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLEANSIGHT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Defaults, then `path`, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CleansightConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let classes = file.classes.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();

        let mapping = if classes.trash_ids.is_some() || classes.bin_ids.is_some() {
            let trash = classes
                .trash_ids
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, DomainCategory::Trash));
            let bins = classes
                .bin_ids
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, DomainCategory::Bin));
            bins.chain(trash).collect()
        } else {
            ClassMapping::coco_default()
        };

        Self {
            source: SourceSettings {
                uri: source
                    .uri
                    .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_FPS),
                location: source
                    .location
                    .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                reopen_backoff: Duration::from_millis(
                    source.reopen_backoff_ms.unwrap_or(DEFAULT_REOPEN_BACKOFF_MS),
                ),
            },
            detection: DetectionSettings {
                skip_factor: detection.skip_factor.unwrap_or(DEFAULT_SKIP_FACTOR),
                sample_first_frame: detection.sample_first_frame.unwrap_or(false),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                backend: detection
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detection.model_path,
                input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                class_names: detection.class_names.unwrap_or_default(),
                confidence_floor: detection
                    .confidence_floor
                    .unwrap_or(DEFAULT_CONFIDENCE_FLOOR),
                slow_inference: Duration::from_millis(
                    detection
                        .slow_inference_ms
                        .unwrap_or(DEFAULT_SLOW_INFERENCE_MS),
                ),
                scripted_period: detection.scripted_period.unwrap_or(0),
            },
            classes: ClassSettings {
                target_label: classes
                    .target_label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                mapping,
                fallback_names: classes.fallback_names.unwrap_or_else(|| {
                    DEFAULT_FALLBACK_NAMES.iter().map(|s| s.to_string()).collect()
                }),
            },
            alerts: AlertSettings {
                cooldown: Duration::from_secs(
                    alerts.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
                message: alerts
                    .message
                    .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string()),
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            mqtt: MqttSettings {
                broker: mqtt.broker,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                username: mqtt.username,
                password: mqtt.password,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(uri) = env_nonempty("CLEANSIGHT_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(fps) = env_nonempty("CLEANSIGHT_FPS") {
            self.source.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("CLEANSIGHT_FPS must be a positive integer"))?;
        }
        if let Some(location) = env_nonempty("CLEANSIGHT_LOCATION") {
            self.source.location = location;
        }
        if let Some(skip) = env_nonempty("CLEANSIGHT_SKIP_FACTOR") {
            self.detection.skip_factor = skip
                .parse()
                .map_err(|_| anyhow!("CLEANSIGHT_SKIP_FACTOR must be a positive integer"))?;
        }
        if let Some(confidence) = env_nonempty("CLEANSIGHT_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .parse()
                .map_err(|_| anyhow!("CLEANSIGHT_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(backend) = env_nonempty("CLEANSIGHT_DETECTOR") {
            self.detection.backend = backend;
        }
        if let Some(path) = env_nonempty("CLEANSIGHT_MODEL_PATH") {
            self.detection.model_path = Some(PathBuf::from(path));
        }
        if let Some(names) = env_nonempty("CLEANSIGHT_FALLBACK_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.classes.fallback_names = parsed;
            }
        }
        if let Some(cooldown) = env_nonempty("CLEANSIGHT_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("CLEANSIGHT_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Some(addr) = env_nonempty("CLEANSIGHT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(broker) = env_nonempty("CLEANSIGHT_MQTT_BROKER") {
            self.mqtt.broker = Some(broker);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detection.skip_factor == 0 {
            return Err(anyhow!("detection.skip_factor must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow!(
                "detection.confidence_threshold must be within [0, 1]"
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        validate_location(&self.source.location).map_err(|e| anyhow!("{}", e))?;
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("api address '{}' is not host:port", self.api_addr))?;
        self.classes.target_label = self.classes.target_label.trim().to_string();
        if self.classes.target_label.is_empty() {
            return Err(anyhow!("classes.target_label must not be empty"));
        }
        if let Some(broker) = &self.mqtt.broker {
            if broker.trim().is_empty() {
                self.mqtt.broker = None;
            }
        }
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            uri: self.source.uri.clone(),
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            backend: self.detection.backend.clone(),
            model_path: self.detection.model_path.clone(),
            input_size: self.detection.input_size,
            class_names: self.detection.class_names.clone(),
            confidence_floor: self.detection.confidence_floor,
            scripted_period: self.detection.scripted_period,
            frame_width: self.source.width,
            frame_height: self.source.height,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            skip_factor: self.detection.skip_factor,
            sample_first_frame: self.detection.sample_first_frame,
            confidence_threshold: self.detection.confidence_threshold,
            alert_cooldown: self.alerts.cooldown,
            location: self.source.location.clone(),
            alert_message: self.alerts.message.clone(),
            reopen_backoff: self.source.reopen_backoff,
            target_fps: self.source.target_fps,
            slow_inference: self.detection.slow_inference,
        }
    }

    pub fn classifier(&self) -> ClassClassifier {
        ClassClassifier::new(
            self.classes.target_label.clone(),
            self.classes.mapping.clone(),
            self.classes.fallback_names.clone(),
        )
    }

    /// Bridge settings, or `None` when no broker is configured.
    pub fn mqtt_bridge(&self) -> Option<MqttBridgeConfig> {
        self.mqtt.broker.as_ref().map(|broker| MqttBridgeConfig {
            broker: broker.clone(),
            client_id: self.mqtt.client_id.clone(),
            topic_prefix: self.mqtt.topic_prefix.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
        })
    }
}

fn read_config_file(path: &Path) -> Result<CleansightConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
