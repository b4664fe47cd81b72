//! The acquisition and detection loop.
//!
//! `PipelineContext` owns everything the loop touches: the frame source, the
//! detector, the scheduler, the presence state machine and the alert store.
//! Request handlers reach it through an `Arc` and only call the control and
//! query methods; the loop itself is the only caller of `process_frame`.
//!
//! Lock order: source, then loop state, then alert store. The detector lock
//! is taken alone, so status queries never wait on inference.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crate::alert::{
    AlertDecision, AlertError, AlertRecord, AlertRef, AlertStateMachine, AlertStore, AlertUpdate,
    NewAlert, DEFAULT_ALERT_MESSAGE, DEFAULT_LOCATION,
};
use crate::broadcast::{LiveUpdateBus, Subscription};
use crate::classify::ClassClassifier;
use crate::clock::{Clock, SystemClock};
use crate::detect::{Detection, Detector};
use crate::frame::{Frame, FrameLabel, Rgb};
use crate::ingest::{FrameSource, SourceStats};
use crate::scheduler::{DetectionScheduler, FrameDecision};

pub const STATUS_GARBAGE: &str = "Garbage Detected";
pub const STATUS_CLEAR: &str = "No Garbage";

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Run the detector on every Nth frame.
    pub skip_factor: u64,
    /// Also run it on the first frame of each capture session.
    pub sample_first_frame: bool,
    /// Detections below this confidence are ignored.
    pub confidence_threshold: f32,
    pub alert_cooldown: Duration,
    pub location: String,
    pub alert_message: String,
    /// Pause after a failed read before reading again.
    pub reopen_backoff: Duration,
    pub target_fps: u32,
    /// Detector calls slower than this are logged and counted.
    pub slow_inference: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            skip_factor: 5,
            sample_first_frame: false,
            confidence_threshold: 0.35,
            alert_cooldown: Duration::from_secs(15),
            location: DEFAULT_LOCATION.to_string(),
            alert_message: DEFAULT_ALERT_MESSAGE.to_string(),
            reopen_backoff: Duration::from_secs(1),
            target_fps: 10,
            slow_inference: Duration::from_secs(1),
        }
    }
}

// ----------------------------------------------------------------------------
// Outputs
// ----------------------------------------------------------------------------

/// How the displayed frame was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Freshly annotated by the detector.
    Live,
    /// Detector skipped; last annotated (or raw) frame shown.
    Reused,
    /// Detector failed on this frame.
    DetectorError,
    /// Source read failed; placeholder shown.
    SourceError,
}

/// Per-frame hand-off to display collaborators.
#[derive(Clone, Debug)]
pub struct FrameOutput {
    pub frame: Frame,
    pub status_text: String,
    pub status_color: Rgb,
    pub garbage_detected: bool,
    pub detection_ran: bool,
    pub kind: OutputKind,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_read: u64,
    pub read_failures: u64,
    pub reopen_attempts: u64,
    pub detector_runs: u64,
    pub detector_failures: u64,
    pub slow_inferences: u64,
    pub alerts_emitted: u64,
    /// Sampled frames where a target object was present.
    pub target_frames: u64,
    /// Processed frames per second since capture started.
    pub fps: f64,
    pub source: SourceStats,
}

/// Answer to "what is the camera seeing right now".
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub capturing: bool,
    pub garbage_detected: bool,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub status_text: String,
    pub frames_processed: u64,
    pub alerts: usize,
}

struct LoopState {
    scheduler: DetectionScheduler,
    machine: AlertStateMachine,
    stats: PipelineStats,
    session_started: Option<Instant>,
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

pub struct PipelineBuilder {
    settings: PipelineSettings,
    source: Option<Box<dyn FrameSource>>,
    detector: Option<Box<dyn Detector>>,
    classifier: ClassClassifier,
    clock: Arc<dyn Clock>,
    bus: LiveUpdateBus,
}

impl PipelineBuilder {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            source: None,
            detector: None,
            classifier: ClassClassifier::default(),
            clock: Arc::new(SystemClock),
            bus: LiveUpdateBus::new(),
        }
    }

    pub fn source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn classifier(mut self, classifier: ClassClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn bus(mut self, bus: LiveUpdateBus) -> Self {
        self.bus = bus;
        self
    }

    /// Validate settings and assemble the context. Capture is not started.
    pub fn build(self) -> Result<Arc<PipelineContext>> {
        let detector = self
            .detector
            .ok_or_else(|| anyhow!("pipeline requires a detector"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow!("pipeline requires a frame source"))?;
        let threshold = self.settings.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold {} must be within [0, 1]",
                threshold
            ));
        }
        let scheduler =
            DetectionScheduler::new(self.settings.skip_factor, self.settings.sample_first_frame)?;
        let machine = AlertStateMachine::new(self.settings.alert_cooldown)?;
        let alerts = AlertStore::new(self.bus.clone(), self.clock.clone());

        log::info!(
            "pipeline: detector={} skip_factor={} cooldown={}s location={}",
            detector.name(),
            self.settings.skip_factor,
            self.settings.alert_cooldown.as_secs_f64(),
            self.settings.location
        );

        Ok(Arc::new(PipelineContext {
            settings: self.settings,
            source: Mutex::new(source),
            detector: Mutex::new(detector),
            classifier: self.classifier,
            alerts,
            bus: self.bus,
            clock: self.clock,
            state: Mutex::new(LoopState {
                scheduler,
                machine,
                stats: PipelineStats::default(),
                session_started: None,
            }),
            latest: RwLock::new(None),
            capturing: AtomicBool::new(false),
        }))
    }
}

// ----------------------------------------------------------------------------
// Context
// ----------------------------------------------------------------------------

pub struct PipelineContext {
    settings: PipelineSettings,
    source: Mutex<Box<dyn FrameSource>>,
    detector: Mutex<Box<dyn Detector>>,
    classifier: ClassClassifier,
    alerts: AlertStore,
    bus: LiveUpdateBus,
    clock: Arc<dyn Clock>,
    state: Mutex<LoopState>,
    latest: RwLock<Option<FrameOutput>>,
    capturing: AtomicBool,
}

impl PipelineContext {
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn bus(&self) -> &LiveUpdateBus {
        &self.bus
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Open the source and begin a capture session.
    ///
    /// Returns false when capture was already running. A source that cannot
    /// be opened yet does not fail the call: the loop keeps retrying it and
    /// shows placeholder frames meanwhile.
    pub fn start_capture(&self) -> bool {
        let mut source = self.lock_source();
        if self.capturing.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut state = self.lock_state();
            state.scheduler.reset();
            state.session_started = Some(Instant::now());
        }
        match source.open() {
            Ok(()) => log::info!("capture started: {}", source.stats().uri),
            Err(e) => log::warn!("capture started without a usable source: {}", e),
        }
        self.capturing.store(true, Ordering::SeqCst);
        true
    }

    /// Close the source. Returns false when capture was not running.
    pub fn stop_capture(&self) -> bool {
        let mut source = self.lock_source();
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return false;
        }
        source.close();
        log::info!("capture stopped");
        true
    }

    /// Acquire one frame and run it through the loop.
    ///
    /// Returns `None` while capture is stopped. A failed read yields the
    /// placeholder frame after a close, reopen and backoff.
    pub fn process_next_frame(&self) -> Option<FrameOutput> {
        if !self.is_capturing() {
            return None;
        }
        let read = self.lock_source().read();
        match read {
            Ok(frame) => {
                self.lock_state().stats.frames_read += 1;
                Some(self.process_frame(frame))
            }
            Err(e) => {
                let output = self.recover_source(&e.to_string());
                self.store_latest(&output);
                Some(output)
            }
        }
    }

    fn recover_source(&self, error: &str) -> FrameOutput {
        log::warn!("frame read failed: {}; reopening source", error);
        let sequence = {
            let mut state = self.lock_state();
            state.stats.read_failures += 1;
            state.stats.frames_read
        };
        {
            let mut source = self.lock_source();
            if self.capturing.load(Ordering::SeqCst) {
                source.close();
                self.lock_state().stats.reopen_attempts += 1;
                if let Err(e) = source.open() {
                    log::warn!("source reopen failed: {}", e);
                }
            }
        }
        std::thread::sleep(self.settings.reopen_backoff);

        let garbage_detected = self.lock_state().machine.garbage_detected();
        let (status_text, status_color) = status_for(garbage_detected);
        FrameOutput {
            frame: Frame::placeholder(sequence),
            status_text: status_text.to_string(),
            status_color,
            garbage_detected,
            detection_ran: false,
            kind: OutputKind::SourceError,
        }
    }

    /// Run one acquired frame through scheduling, detection and alerting.
    pub fn process_frame(&self, frame: Frame) -> FrameOutput {
        let now = self.clock.now();
        let decision = {
            let mut state = self.lock_state();
            state.stats.frames_processed += 1;
            match state.scheduler.next_frame() {
                FrameDecision::Reuse => Some(state.scheduler.fallback_frame(&frame)),
                FrameDecision::Detect => None,
            }
        };

        let (display, kind) = match decision {
            Some(reused) => (reused, OutputKind::Reused),
            None => self.run_detection(&frame, now),
        };
        let garbage_detected = self.lock_state().machine.garbage_detected();

        let (status_text, status_color) = status_for(garbage_detected);
        let frame = display
            .with_label(FrameLabel::new(
                now.format("%Y-%m-%d %H:%M:%S").to_string(),
                10,
                30,
                Rgb::WHITE,
            ))
            .with_label(FrameLabel::new(status_text, 10, 70, status_color));
        let output = FrameOutput {
            frame,
            status_text: status_text.to_string(),
            status_color,
            garbage_detected,
            detection_ran: kind != OutputKind::Reused,
            kind,
        };
        self.store_latest(&output);
        output
    }

    fn run_detection(&self, frame: &Frame, now: DateTime<Utc>) -> (Frame, OutputKind) {
        let started = Instant::now();
        let result = self.lock_detector().detect(frame);
        let elapsed = started.elapsed();

        let mut state = self.lock_state();
        state.stats.detector_runs += 1;
        if elapsed > self.settings.slow_inference {
            state.stats.slow_inferences += 1;
            log::warn!(
                "detector took {} ms on frame {} (budget {} ms)",
                elapsed.as_millis(),
                frame.sequence,
                self.settings.slow_inference.as_millis()
            );
        }

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                state.stats.detector_failures += 1;
                log::warn!("detector failed on frame {}: {}", frame.sequence, e);
                return (
                    frame.with_error_marker(&e.to_string()),
                    OutputKind::DetectorError,
                );
            }
        };

        let confident: Vec<Detection> = output
            .detections
            .into_iter()
            .filter(|d| d.confidence >= self.settings.confidence_threshold)
            .collect();
        let present = self.classifier.any_target(&confident);
        if present {
            state.stats.target_frames += 1;
        }
        log::debug!(
            "frame {}: {} detections, target present={}",
            frame.sequence,
            confident.len(),
            present
        );

        match state.machine.observe(present, now) {
            AlertDecision::Emit => {
                match self.alerts.create_alert(
                    &self.settings.alert_message,
                    &self.settings.location,
                    now,
                ) {
                    Ok(record) => {
                        state.stats.alerts_emitted += 1;
                        log::info!(
                            "alert #{} raised at {} ({})",
                            record.id,
                            record.location,
                            record.uid
                        );
                    }
                    Err(e) => log::error!("failed to record alert: {}", e),
                }
            }
            AlertDecision::Suppressed => {
                log::debug!("garbage reappeared inside cooldown; alert suppressed")
            }
            AlertDecision::None => {}
        }

        state.scheduler.record_annotated(output.annotated.clone());
        (output.annotated, OutputKind::Live)
    }

    /// Drive the loop until `shutdown` is set, pacing to the target FPS.
    pub fn run(&self, shutdown: &AtomicBool) {
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.settings.target_fps.max(1)));
        let mut last_health_log = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let processed = self.process_next_frame().is_some();

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.stats();
                log::info!(
                    "pipeline health capturing={} frames={} detector_runs={} alerts={} garbage={} fps={:.1}",
                    self.is_capturing(),
                    stats.frames_processed,
                    stats.detector_runs,
                    stats.alerts_emitted,
                    self.status().garbage_detected,
                    stats.fps
                );
                last_health_log = Instant::now();
            }

            if !processed {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.stop_capture();
        log::info!("pipeline loop exited");
    }

    pub fn latest_frame(&self) -> Option<FrameOutput> {
        self.latest
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn status(&self) -> PipelineStatus {
        let (garbage_detected, last_detection_time, last_alert_time, frames_processed) = {
            let state = self.lock_state();
            (
                state.machine.garbage_detected(),
                state.machine.last_detection_time(),
                state.machine.last_alert_time(),
                state.stats.frames_processed,
            )
        };
        PipelineStatus {
            capturing: self.is_capturing(),
            garbage_detected,
            last_detection_time,
            last_alert_time,
            status_text: status_for(garbage_detected).0.to_string(),
            frames_processed,
            alerts: self.alerts.len(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = {
            let state = self.lock_state();
            let mut stats = state.stats.clone();
            if let Some(started) = state.session_started {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    stats.fps = stats.frames_processed as f64 / secs;
                }
            }
            stats
        };
        stats.source = self.lock_source().stats();
        stats
    }

    pub fn list_alerts(&self) -> Vec<AlertRecord> {
        self.alerts.list()
    }

    pub fn create_manual_alert(&self, new: NewAlert) -> Result<AlertRecord, AlertError> {
        let record = self.alerts.create_manual_alert(new)?;
        log::info!("manual alert #{} reported at {}", record.id, record.location);
        Ok(record)
    }

    pub fn update_alert(
        &self,
        alert: &AlertRef,
        update: AlertUpdate,
    ) -> Result<AlertRecord, AlertError> {
        let record = self.alerts.update_status(alert, update)?;
        log::info!("alert #{} is now {}", record.id, record.status.as_str());
        Ok(record)
    }

    /// Live events, starting with the full alert list.
    pub fn subscribe(&self) -> Subscription {
        self.alerts.subscribe()
    }

    fn store_latest(&self, output: &FrameOutput) {
        *self.latest.write().unwrap_or_else(|p| p.into_inner()) = Some(output.clone());
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn FrameSource>> {
        self.source.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_detector(&self) -> MutexGuard<'_, Box<dyn Detector>> {
        self.detector.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn status_for(garbage_detected: bool) -> (&'static str, Rgb) {
    if garbage_detected {
        (STATUS_GARBAGE, Rgb::RED)
    } else {
        (STATUS_CLEAR, Rgb::GREEN)
    }
}
