use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use cleansight::config::CleansightConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CLEANSIGHT_CONFIG",
        "CLEANSIGHT_SOURCE",
        "CLEANSIGHT_FPS",
        "CLEANSIGHT_LOCATION",
        "CLEANSIGHT_SKIP_FACTOR",
        "CLEANSIGHT_CONFIDENCE",
        "CLEANSIGHT_DETECTOR",
        "CLEANSIGHT_MODEL_PATH",
        "CLEANSIGHT_FALLBACK_NAMES",
        "CLEANSIGHT_ALERT_COOLDOWN_SECS",
        "CLEANSIGHT_API_ADDR",
        "CLEANSIGHT_MQTT_BROKER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CleansightConfig::load().expect("load defaults");
    assert_eq!(cfg.source.uri, "stub://camera1");
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    assert_eq!(cfg.source.location, "Camera 1");
    assert_eq!(cfg.detection.skip_factor, 5);
    assert!(!cfg.detection.sample_first_frame);
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(15));
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert!(cfg.mqtt_bridge().is_none());

    let classifier = cfg.classifier();
    assert!(classifier.is_target_object(39, "bottle"));
    assert!(classifier.is_target_object(999, "trash"));
    assert!(!classifier.is_target_object(5, "dog"));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "uri": "/dev/video2",
            "width": 640,
            "height": 480,
            "target_fps": 15,
            "location": "Dock 4",
            "reopen_backoff_ms": 250
        },
        "detection": {
            "skip_factor": 3,
            "sample_first_frame": true,
            "confidence_threshold": 0.5,
            "slow_inference_ms": 400
        },
        "alerts": {
            "cooldown_secs": 5,
            "message": "Litter spotted"
        },
        "mqtt": {
            "broker": "localhost:1884",
            "topic_prefix": "site/dock4"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CLEANSIGHT_CONFIG", file.path());
    std::env::set_var("CLEANSIGHT_SKIP_FACTOR", "4");
    std::env::set_var("CLEANSIGHT_ALERT_COOLDOWN_SECS", "30");

    let cfg = CleansightConfig::load().expect("load config");
    assert_eq!(cfg.source.uri, "/dev/video2");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.reopen_backoff, Duration::from_millis(250));
    assert_eq!(cfg.detection.skip_factor, 4);
    assert!(cfg.detection.sample_first_frame);
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(30));

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.location, "Dock 4");
    assert_eq!(settings.alert_message, "Litter spotted");
    assert_eq!(settings.confidence_threshold, 0.5);
    assert_eq!(settings.slow_inference, Duration::from_millis(400));

    let source = cfg.source_config();
    assert_eq!((source.width, source.height), (640, 480));

    let bridge = cfg.mqtt_bridge().expect("bridge enabled");
    assert_eq!(bridge.broker, "localhost:1884");
    assert_eq!(bridge.topic_prefix, "site/dock4");
    assert_eq!(bridge.client_id, "cleansightd");

    clear_env();
}

#[test]
fn loads_toml_with_custom_class_table() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[detection]
backend = "scripted"
class_names = ["bin", "trash"]

[classes]
target_label = "Trash"
trash_ids = [1]
bin_ids = [0]
fallback_names = []
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("CLEANSIGHT_CONFIG", file.path());

    let cfg = CleansightConfig::load().expect("load config");
    assert_eq!(cfg.classes.target_label, "Trash");
    assert_eq!(cfg.classes.mapping.len(), 2);
    assert_eq!(cfg.detector_settings().class_names, vec!["bin", "trash"]);

    let classifier = cfg.classifier();
    assert!(classifier.is_target_object(1, "trash"));
    assert!(!classifier.is_target_object(0, "bin"));
    // The label match is exact; an unmapped id only matches the label as written.
    assert!(classifier.is_target_object(5, "Trash"));
    assert!(!classifier.is_target_object(5, "trash"));
    // The COCO table and allow-list are gone.
    assert!(!classifier.is_target_object(39, "bottle"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CLEANSIGHT_SKIP_FACTOR", "0");
    assert!(CleansightConfig::load().is_err());
    clear_env();

    std::env::set_var("CLEANSIGHT_CONFIDENCE", "1.5");
    assert!(CleansightConfig::load().is_err());
    clear_env();

    std::env::set_var("CLEANSIGHT_LOCATION", "<script>");
    assert!(CleansightConfig::load().is_err());
    clear_env();

    std::env::set_var("CLEANSIGHT_API_ADDR", "not-an-address");
    assert!(CleansightConfig::load().is_err());
    clear_env();

    std::env::set_var("CLEANSIGHT_FPS", "fast");
    assert!(CleansightConfig::load().is_err());
    clear_env();
}
