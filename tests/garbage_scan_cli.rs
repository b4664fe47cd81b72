#![cfg(feature = "jpeg")]

use std::process::Command;

const ENV_KEYS: &[&str] = &[
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
];

#[test]
fn output_directory_receives_sampled_frames() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out_dir = dir.path().join("annotated");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_garbage_scan"));
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    let output = cmd
        .args(["--source", "stub://cli", "--frames", "6", "--skip-factor", "3"])
        .arg("--output")
        .arg(&out_dir)
        .output()
        .expect("run garbage_scan");
    assert!(
        output.status.success(),
        "garbage_scan failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let mut names: Vec<String> = std::fs::read_dir(&out_dir)
        .expect("output dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["frame_000001.jpg", "frame_000003.jpg", "frame_000006.jpg"]
    );

    let bytes = std::fs::read(out_dir.join("frame_000003.jpg")).expect("read jpeg");
    let image = image::load_from_memory(&bytes).expect("decode jpeg");
    assert_eq!((image.width(), image.height()), (1280, 720));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("frames written:    3"));
}
