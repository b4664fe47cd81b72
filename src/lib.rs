//! CleanSight detection kernel
//!
//! This crate implements the real-time garbage detection and alerting loop.
//!
//! # Architecture
//!
//! Frames flow through one long-lived pipeline:
//!
//! 1. **Acquire**: a `FrameSource` yields frames; read failures become a
//!    placeholder frame, a reopen and a short backoff.
//! 2. **Throttle**: the `DetectionScheduler` runs the detector on every Nth frame
//!    and replays the last annotated frame in between.
//! 3. **Classify**: the `ClassClassifier` maps detector classes onto the garbage
//!    domain through a replaceable class table and a name allow-list.
//! 4. **Debounce**: the `AlertStateMachine` turns per-frame presence into alerts,
//!    only on an absent-to-present edge and never inside the cooldown.
//! 5. **Record**: the `AlertStore` assigns ids and fans events out over the
//!    `LiveUpdateBus` to the HTTP event stream and the MQTT bridge.
//!
//! # Module Structure
//!
//! - `frame`: Immutable RGB frames, overlay labels, box drawing
//! - `ingest`: Frame sources (synthetic, V4L2, local files)
//! - `detect`: Detector trait, registry and backends
//! - `classify`, `scheduler`, `alert`, `broadcast`: the detection-to-alert path
//! - `pipeline`: The context object shared by the loop and request handlers
//! - `api`, `bridge`, `config`: Daemon plumbing

pub mod alert;
pub mod api;
pub mod bridge;
pub mod broadcast;
pub mod classify;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;

pub use alert::{
    AlertDecision, AlertError, AlertOrigin, AlertRecord, AlertRef, AlertStateMachine,
    AlertStatus, AlertStore, AlertUpdate, NewAlert, PresenceState,
};
pub use broadcast::{LiveEvent, LiveUpdateBus, Subscription};
pub use classify::{ClassClassifier, ClassMapping, DomainCategory};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CleansightConfig;
pub use detect::{
    build_detector, BoundingBox, Detection, DetectionSet, Detector, DetectorOutput,
    DetectorRegistry, DetectorSettings, ScriptedDetector,
};
pub use frame::{Frame, FrameLabel, Rgb};
pub use ingest::{build_source, FrameSource, SourceConfig, SourceError, SourceStats, SyntheticSource};
pub use pipeline::{
    FrameOutput, OutputKind, PipelineBuilder, PipelineContext, PipelineSettings, PipelineStats,
    PipelineStatus,
};
pub use scheduler::{DetectionScheduler, FrameDecision};
