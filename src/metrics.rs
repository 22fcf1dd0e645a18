use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

use crate::detect::Detection;
use crate::safety::SafetyCheck;
use crate::zones::ZoneEvaluation;

const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
const CONFIDENCE_BUCKETS: [f64; 10] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Prometheus collectors for the detection pipeline, on a registry owned by the service.
pub struct PipelineMetrics {
    registry: Registry,
    frames_processed: IntCounter,
    detections: IntCounterVec,
    violations: IntCounterVec,
    inference_duration: Histogram,
    confidence: Histogram,
    active_tracks: IntGauge,
    people_in_zones: IntGaugeVec,
    compliance_rate: Gauge,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let frames_processed = IntCounter::with_opts(Opts::new(
            "ppe_frames_processed_total",
            "Frames run through the detection pipeline",
        ))?;
        let detections = IntCounterVec::new(
            Opts::new("ppe_detections_total", "Detections emitted, by class"),
            &["class_name"],
        )?;
        let violations = IntCounterVec::new(
            Opts::new(
                "ppe_violations_total",
                "Missing-equipment findings inside zones",
            ),
            &["violation_type", "zone_id"],
        )?;
        let inference_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ppe_inference_duration_seconds",
                "Time from request decode to finished frame report",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let confidence = Histogram::with_opts(
            HistogramOpts::new("ppe_model_confidence", "Confidence of emitted detections")
                .buckets(CONFIDENCE_BUCKETS.to_vec()),
        )?;
        let active_tracks = IntGauge::with_opts(Opts::new(
            "ppe_active_tracks",
            "Live tracks held by the tracker",
        ))?;
        let people_in_zones = IntGaugeVec::new(
            Opts::new("ppe_people_in_zones", "People standing in each zone"),
            &["zone_id"],
        )?;
        let compliance_rate = Gauge::with_opts(Opts::new(
            "ppe_compliance_rate_percent",
            "Compliance rate of the last processed frame",
        ))?;

        registry.register(Box::new(frames_processed.clone()))?;
        registry.register(Box::new(detections.clone()))?;
        registry.register(Box::new(violations.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(confidence.clone()))?;
        registry.register(Box::new(active_tracks.clone()))?;
        registry.register(Box::new(people_in_zones.clone()))?;
        registry.register(Box::new(compliance_rate.clone()))?;

        Ok(Self {
            registry,
            frames_processed,
            detections,
            violations,
            inference_duration,
            confidence,
            active_tracks,
            people_in_zones,
            compliance_rate,
        })
    }

    pub fn observe_frame(
        &self,
        detections: &[Detection],
        safety: &SafetyCheck,
        zones: &ZoneEvaluation,
        active_tracks: usize,
        elapsed: Duration,
    ) {
        self.frames_processed.inc();
        self.inference_duration.observe(elapsed.as_secs_f64());
        for detection in detections {
            self.detections
                .with_label_values(&[detection.class_name.as_str()])
                .inc();
            self.confidence.observe(detection.confidence as f64);
        }
        for violation in &zones.violations {
            for missing in &violation.missing_ppe {
                self.violations
                    .with_label_values(&[missing.as_str(), violation.zone_id.as_str()])
                    .inc();
            }
        }
        for (zone_id, people) in &zones.occupancy {
            self.people_in_zones
                .with_label_values(&[zone_id.as_str()])
                .set(*people as i64);
        }
        self.active_tracks.set(active_tracks as i64);
        self.compliance_rate.set(safety.compliance_rate);
    }

    pub fn set_active_tracks(&self, active_tracks: usize) {
        self.active_tracks.set(active_tracks as i64);
    }

    /// Drops the occupancy series of a deleted zone.
    pub fn forget_zone(&self, zone_id: &str) {
        if self.people_in_zones.remove_label_values(&[zone_id]).is_err() {
            log::debug!("no occupancy series for zone {}", zone_id);
        }
    }

    /// Prometheus text exposition of every collector.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("encode metrics")?;
        String::from_utf8(buffer).context("metrics are not utf-8")
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.get()
    }
}
