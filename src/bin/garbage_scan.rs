//! garbage_scan - run the detection loop against one source and summarize
//!
//! Samples the first frame and every Nth frame after it, then prints how many
//! frames showed garbage, how often the detector ran and the achieved FPS.
//! With `--output DIR` (feature `jpeg`) every sampled frame is written there
//! as `frame_NNNNNN.jpg`, annotated and with its status overlay.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cleansight::{
    build_detector, build_source, CleansightConfig, FrameOutput, OutputKind, PipelineBuilder,
    PipelineSettings,
};

#[cfg(feature = "jpeg")]
const JPEG_QUALITY: u8 = 90;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera index, /dev/videoN, video file or stub://name.
    #[arg(long, env = "CLEANSIGHT_SOURCE", default_value = "stub://scan")]
    source: String,
    /// Frames to process before stopping.
    #[arg(long, default_value_t = 100)]
    frames: u64,
    /// Run the detector on every Nth frame.
    #[arg(long, default_value_t = 3)]
    skip_factor: u64,
    /// Minimum detection confidence.
    #[arg(long, default_value_t = 0.35)]
    confidence: f32,
    /// Directory for annotated JPEGs of the sampled frames.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print one line per frame.
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames == 0 {
        return Err(anyhow!("--frames must be at least 1"));
    }
    if let Some(dir) = &args.output {
        if !cfg!(feature = "jpeg") {
            return Err(anyhow!("--output requires the jpeg feature"));
        }
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow!("failed to create {}: {}", dir.display(), e))?;
    }

    let mut cfg = CleansightConfig::load()?;
    cfg.source.uri = args.source.clone();
    let classifier = cfg.classifier();
    let detector = build_detector(&cfg.detector_settings(), classifier.palette())?;
    let source = build_source(&cfg.source_config())?;

    let settings = PipelineSettings {
        skip_factor: args.skip_factor,
        sample_first_frame: true,
        confidence_threshold: args.confidence,
        reopen_backoff: Duration::from_millis(200),
        ..cfg.pipeline_settings()
    };
    let ctx = PipelineBuilder::new(settings)
        .source(source)
        .detector(detector)
        .classifier(classifier)
        .build()?;

    ctx.start_capture();
    let started = Instant::now();
    let mut garbage_frames = 0u64;
    let mut processed = 0u64;
    let mut written = 0u64;
    while processed < args.frames {
        let Some(output) = ctx.process_next_frame() else {
            break;
        };
        processed += 1;
        if output.garbage_detected {
            garbage_frames += 1;
        }
        if let Some(dir) = &args.output {
            if output.detection_ran {
                save_frame(dir, &output)?;
                written += 1;
            }
        }
        if args.verbose {
            println!(
                "frame {:>6} {:<14} {}",
                output.frame.sequence,
                kind_label(output.kind),
                output.status_text
            );
        }
    }
    ctx.stop_capture();

    let elapsed = started.elapsed().as_secs_f64();
    let stats = ctx.stats();
    println!("source:            {}", args.source);
    println!("frames processed:  {}", processed);
    println!("garbage frames:    {}", garbage_frames);
    println!("detector runs:     {}", stats.detector_runs);
    println!("detector failures: {}", stats.detector_failures);
    println!("read failures:     {}", stats.read_failures);
    println!("alerts:            {}", ctx.alerts().len());
    if let Some(dir) = &args.output {
        println!("frames written:    {} ({})", written, dir.display());
    }
    if elapsed > 0.0 {
        println!("average fps:       {:.1}", processed as f64 / elapsed);
    }
    Ok(())
}

#[cfg(feature = "jpeg")]
fn save_frame(dir: &Path, output: &FrameOutput) -> Result<()> {
    let path = dir.join(format!("frame_{:06}.jpg", output.frame.sequence));
    output.frame.save_jpeg(&path, JPEG_QUALITY)?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(not(feature = "jpeg"))]
fn save_frame(_dir: &Path, _output: &FrameOutput) -> Result<()> {
    Err(anyhow!("--output requires the jpeg feature"))
}

fn kind_label(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Live => "detected",
        OutputKind::Reused => "reused",
        OutputKind::DetectorError => "detector-error",
        OutputKind::SourceError => "source-error",
    }
}
