//! cleansightd - live garbage detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by CLEANSIGHT_CONFIG, then env overrides)
//! 2. Builds the detector and the frame source; either failing aborts startup
//! 3. Serves the loopback control API and, optionally, the MQTT bridge
//! 4. Runs the acquisition loop until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cleansight::{
    api::{ApiConfig, ApiServer},
    bridge::MqttBridge,
    build_detector, build_source, CleansightConfig, PipelineBuilder,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "CLEANSIGHT_CONFIG")]
    config: Option<PathBuf>,
    /// Do not open the camera until POST /api/start_video.
    #[arg(long)]
    idle: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = CleansightConfig::load_from(args.config.as_deref())?;
    let classifier = cfg.classifier();
    let detector = build_detector(&cfg.detector_settings(), classifier.palette())?;
    let source = build_source(&cfg.source_config())?;

    let ctx = PipelineBuilder::new(cfg.pipeline_settings())
        .source(source)
        .detector(detector)
        .classifier(classifier)
        .build()?;

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        ctx.clone(),
    )
    .spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let bridge = match cfg.mqtt_bridge() {
        Some(bridge_cfg) => Some(MqttBridge::spawn(bridge_cfg, ctx.bus().subscribe())?),
        None => {
            log::info!("mqtt bridge disabled (set CLEANSIGHT_MQTT_BROKER to enable)");
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    })?;

    log::info!(
        "cleansightd running. source={} location={} skip_factor={} cooldown={}s",
        cfg.source.uri,
        cfg.source.location,
        cfg.detection.skip_factor,
        cfg.alerts.cooldown.as_secs()
    );
    if !args.idle {
        ctx.start_capture();
    }

    ctx.run(&shutdown);

    if let Some(bridge) = bridge {
        bridge.stop();
    }
    api_handle.stop()?;
    log::info!("cleansightd stopped after {} alerts", ctx.alerts().len());
    Ok(())
}
