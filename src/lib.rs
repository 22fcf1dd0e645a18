//! PPE Guard
//!
//! Personal-protective-equipment compliance monitoring for camera frames.
//!
//! # Architecture
//!
//! Every frame flows through the same stages:
//!
//! 1. **Inference**: an [`InferenceBackend`] turns a letterboxed image into raw output.
//! 2. **Decoding**: [`DetectionDecoder`] thresholds, de-duplicates and rescales boxes.
//! 3. **Tracking**: [`ObjectTracker`] assigns stable ids across frames.
//! 4. **Safety**: [`SafetyClassifier`] computes frame-level compliance.
//! 5. **Zones**: [`ZoneEngine`] flags people inside danger areas without required PPE.
//!
//! [`Pipeline`] chains stages 2 to 5 and records Prometheus metrics. [`ServiceContext`]
//! owns the backend and pipeline and is shared by the HTTP ([`api`]) and gRPC ([`rpc`])
//! surfaces.
//!
//! # Module Structure
//!
//! - `detect`: backends, preprocessing, raw output decoding
//! - `tracker`, `safety`, `zones`: per-frame analysis
//! - `pipeline`, `metrics`: orchestration and instrumentation
//! - `config`, `service`, `error`: process wiring
//! - `api`, `rpc`: network surfaces

pub mod api;
pub mod classes;
pub mod config;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod metrics;
pub mod pipeline;
pub mod rpc;
pub mod safety;
pub mod service;
pub mod tracker;
pub mod zones;

pub use classes::ClassTaxonomy;
pub use config::{ModelSettings, ServiceConfig, ZoneSettings};
pub use detect::{
    BackendCapability, BackendRegistry, Detection, DetectionDecoder, InferenceBackend, RawOutput,
};
pub use error::{ServiceError, ServiceResult};
pub use geometry::{BBox, FrameSize, Point};
pub use metrics::PipelineMetrics;
pub use pipeline::{FrameContext, FrameReport, Pipeline};
pub use safety::{SafetyCheck, SafetyClassifier};
pub use service::{DetectOptions, HealthStatus, ServiceContext};
pub use tracker::{ObjectTracker, Track, TrackState, TrackerConfig};
pub use zones::{Severity, Zone, ZoneEngine, ZoneViolation};
