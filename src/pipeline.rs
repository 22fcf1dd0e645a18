//! Per-frame transaction: decode, track, classify, zone checks, metrics.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::detect::{Detection, DetectionDecoder, RawOutput};
use crate::geometry::FrameSize;
use crate::metrics::PipelineMetrics;
use crate::safety::{SafetyCheck, SafetyClassifier};
use crate::tracker::ObjectTracker;
use crate::zones::{ZoneEngine, ZoneViolation};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// What the pipeline needs to know about the frame behind a backend output.
#[derive(Clone, Debug)]
pub struct FrameContext {
    pub frame: FrameSize,
    /// Letterbox scale used when the frame was preprocessed.
    pub scale: f32,
    pub timestamp_ms: u64,
    /// When request handling began; latency is measured from here.
    pub started: Instant,
    /// One-off confidence threshold replacing the configured one.
    pub confidence_threshold: Option<f32>,
}

impl FrameContext {
    pub fn new(frame: FrameSize, scale: f32) -> Self {
        Self {
            frame,
            scale,
            timestamp_ms: unix_millis(),
            started: Instant::now(),
            confidence_threshold: None,
        }
    }

    pub fn with_started(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: Option<f32>) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub detections: Vec<Detection>,
    pub safety_check: SafetyCheck,
    pub zone_violations: Vec<ZoneViolation>,
    /// Rounded to two decimals.
    pub processing_time_ms: f64,
    #[serde(skip)]
    pub timestamp_ms: u64,
}

/// Owns the stateful stages. Callers serialize access (one lock per frame).
pub struct Pipeline {
    decoder: DetectionDecoder,
    tracker: ObjectTracker,
    classifier: SafetyClassifier,
    zones: ZoneEngine,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(config: &ServiceConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            decoder: DetectionDecoder::new(
                &config.classes,
                config.model.confidence_threshold,
                config.model.nms_threshold,
            ),
            tracker: ObjectTracker::new(config.tracking.clone()),
            classifier: SafetyClassifier::new(config.classes.clone()),
            zones: ZoneEngine::new(&config.zones, config.classes.clone()),
            metrics,
        }
    }

    pub fn set_backend_nms(&mut self, backend_applies_nms: bool) {
        self.decoder.set_backend_nms(backend_applies_nms);
    }

    pub fn process(&mut self, raw: &RawOutput, ctx: &FrameContext) -> FrameReport {
        let threshold = ctx
            .confidence_threshold
            .unwrap_or_else(|| self.decoder.confidence_threshold());
        let detections = self
            .decoder
            .decode_with_threshold(raw, ctx.frame, ctx.scale, threshold);
        let detections = self.tracker.update(detections);
        let safety_check = self.classifier.classify(&detections);
        let evaluation = self.zones.evaluate(&detections, ctx.timestamp_ms);

        for violation in &evaluation.violations {
            let Ok(track_id) = u64::try_from(violation.person_track_id) else {
                continue;
            };
            for label in &violation.missing_ppe {
                self.tracker.add_violation(track_id, label);
            }
        }

        let elapsed = ctx.started.elapsed();
        self.metrics.observe_frame(
            &detections,
            &safety_check,
            &evaluation,
            self.tracker.active_tracks(),
            elapsed,
        );

        FrameReport {
            detections,
            safety_check,
            zone_violations: evaluation.violations,
            processing_time_ms: (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
            timestamp_ms: ctx.timestamp_ms,
        }
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn reset_tracks(&mut self) {
        self.tracker.reset();
        self.metrics.set_active_tracks(0);
    }

    pub fn zones(&self) -> &ZoneEngine {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut ZoneEngine {
        &mut self.zones
    }
}
