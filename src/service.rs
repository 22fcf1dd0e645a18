//! Service context shared by the HTTP and RPC surfaces.
//!
//! Built once at startup and handed to every request handler behind an `Arc`.
//! The pipeline (tracker and zones) sits behind one mutex so each frame's
//! track/zone update is a single transaction; zone CRUD takes the same lock.
//! Inference runs under the backend's own lock, outside the pipeline lock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::detect::{
    decode_image, letterbox, BackendCapability, BackendRegistry, SharedBackend,
};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{FrameContext, FrameReport, Pipeline};
use crate::tracker::Track;
use crate::zones::{Zone, ZoneUpdate, ZoneViolation};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub model_type: String,
    pub device: String,
}

/// Per-request knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectOptions {
    /// Replaces the configured confidence threshold for this request only.
    pub confidence_threshold: Option<f32>,
}

struct LoadedBackend {
    handle: SharedBackend,
    name: &'static str,
    input_size: u32,
}

pub struct ServiceContext {
    config: ServiceConfig,
    backend: Option<LoadedBackend>,
    pipeline: Mutex<Pipeline>,
    metrics: Arc<PipelineMetrics>,
}

impl ServiceContext {
    /// Loads the configured backend and zone file. A backend that fails to load
    /// leaves the context unhealthy rather than failing startup.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let registry = BackendRegistry::from_settings(&config.model, config.classes.names.len());
        let backend = registry
            .backend_for_capability(BackendCapability::ObjectDetection)
            .ok();
        if let Some(backend) = &backend {
            match backend.lock() {
                Ok(mut guard) => {
                    if let Err(err) = guard.warm_up() {
                        log::warn!("backend {} warm-up failed: {:#}", guard.name(), err);
                    }
                }
                Err(_) => log::warn!("backend lock poisoned during warm-up"),
            }
        }
        Self::new(config, backend)
    }

    pub fn new(config: ServiceConfig, backend: Option<SharedBackend>) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new()?);
        let mut pipeline = Pipeline::new(&config, metrics.clone());

        let backend = match backend {
            Some(handle) => {
                let (name, input_size, applies_nms) = {
                    let guard = handle
                        .lock()
                        .map_err(|_| anyhow::anyhow!("backend lock poisoned"))?;
                    (
                        guard.name(),
                        guard.input_size(),
                        guard.supports(BackendCapability::NonMaxSuppression),
                    )
                };
                pipeline.set_backend_nms(applies_nms);
                log::info!("inference backend: {} (input {})", name, input_size);
                Some(LoadedBackend {
                    handle,
                    name,
                    input_size,
                })
            }
            None => {
                log::warn!("no inference backend available; detection requests will be refused");
                None
            }
        };

        if config.zones.enabled {
            if let Some(path) = &config.zones.config_path {
                if let Err(err) = pipeline.zones_mut().load_file(path) {
                    log::warn!("zone config ignored: {:#}", err);
                }
            }
        }
        log::info!(
            "tracking {}, zones {} ({} configured)",
            if config.tracking.enabled { "on" } else { "off" },
            if config.zones.enabled { "on" } else { "off" },
            pipeline.zones().zone_count()
        );

        Ok(Self {
            config,
            backend,
            pipeline: Mutex::new(pipeline),
            metrics,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: if self.is_ready() { "healthy" } else { "unhealthy" }.to_string(),
            model_loaded: self.is_ready(),
            model_type: self
                .backend
                .as_ref()
                .map(|backend| backend.name)
                .unwrap_or("none")
                .to_string(),
            device: self.config.model.device.clone(),
        }
    }

    /// Runs one encoded image (JPEG/PNG) through inference and the pipeline.
    pub fn detect_image(
        &self,
        bytes: &[u8],
        options: DetectOptions,
    ) -> ServiceResult<FrameReport> {
        let started = Instant::now();
        let backend = self.backend.as_ref().ok_or(ServiceError::NotReady)?;
        if let Some(threshold) = options.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ServiceError::InvalidRequest(format!(
                    "confidence_threshold must be within [0, 1], got {}",
                    threshold
                )));
            }
        }

        let image =
            decode_image(bytes).map_err(|err| ServiceError::InvalidImage(format!("{:#}", err)))?;
        let boxed = letterbox(&image, backend.input_size)
            .map_err(|err| ServiceError::InvalidImage(format!("{:#}", err)))?;

        let raw = {
            let mut guard = backend
                .handle
                .lock()
                .map_err(|_| ServiceError::Internal("backend lock poisoned".to_string()))?;
            guard.infer(&boxed.tensor).map_err(ServiceError::internal)?
        };

        let report = {
            let mut pipeline = self.pipeline()?;
            // Built under the lock so zone history stays in timestamp order.
            let ctx = FrameContext::new(boxed.frame, boxed.scale)
                .with_started(started)
                .with_confidence_threshold(options.confidence_threshold);
            pipeline.process(&raw, &ctx)
        };
        log::debug!(
            "frame {}x{}: {} detections, {} zone violations in {:.1} ms",
            boxed.frame.width,
            boxed.frame.height,
            report.detections.len(),
            report.zone_violations.len(),
            report.processing_time_ms
        );
        Ok(report)
    }

    /// Same as [`detect_image`](Self::detect_image) for a base64 payload.
    /// A `data:image/...;base64,` prefix is accepted.
    pub fn detect_base64(
        &self,
        encoded: &str,
        options: DetectOptions,
    ) -> ServiceResult<FrameReport> {
        if !self.is_ready() {
            return Err(ServiceError::NotReady);
        }
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => encoded,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| ServiceError::InvalidImage(format!("invalid base64: {}", err)))?;
        self.detect_image(&bytes, options)
    }

    pub fn list_zones(&self) -> ServiceResult<Vec<Zone>> {
        Ok(self.pipeline()?.zones().get_all_zones())
    }

    pub fn get_zone(&self, zone_id: &str) -> ServiceResult<Zone> {
        self.pipeline()?
            .zones()
            .get_zone(zone_id)
            .ok_or_else(|| ServiceError::ZoneNotFound(zone_id.to_string()))
    }

    /// Inserts or replaces a zone; returns its id.
    pub fn upsert_zone(&self, zone: Zone) -> ServiceResult<String> {
        let zone_id = zone.id.clone();
        self.pipeline()?.zones_mut().add_zone(zone);
        Ok(zone_id)
    }

    pub fn update_zone(&self, zone_id: &str, update: ZoneUpdate) -> ServiceResult<Zone> {
        let mut pipeline = self.pipeline()?;
        if !pipeline.zones_mut().update_zone(zone_id, update)? {
            return Err(ServiceError::ZoneNotFound(zone_id.to_string()));
        }
        pipeline
            .zones()
            .get_zone(zone_id)
            .ok_or_else(|| ServiceError::ZoneNotFound(zone_id.to_string()))
    }

    pub fn delete_zone(&self, zone_id: &str) -> ServiceResult<()> {
        if !self.pipeline()?.zones_mut().remove_zone(zone_id) {
            return Err(ServiceError::ZoneNotFound(zone_id.to_string()));
        }
        self.metrics.forget_zone(zone_id);
        Ok(())
    }

    pub fn zone_violations(&self, zone_id: &str) -> ServiceResult<Vec<ZoneViolation>> {
        let pipeline = self.pipeline()?;
        if pipeline.zones().get_zone(zone_id).is_none() {
            return Err(ServiceError::ZoneNotFound(zone_id.to_string()));
        }
        Ok(pipeline.zones().violation_history(zone_id))
    }

    pub fn tracks(&self) -> ServiceResult<Vec<Track>> {
        Ok(self.pipeline()?.tracker().tracks())
    }

    pub fn track(&self, track_id: u64) -> ServiceResult<Track> {
        self.pipeline()?
            .tracker()
            .get_track_info(track_id)
            .ok_or(ServiceError::TrackNotFound(track_id))
    }

    pub fn reset_tracks(&self) -> ServiceResult<()> {
        self.pipeline()?.reset_tracks();
        log::info!("tracker reset");
        Ok(())
    }

    pub fn metrics_enabled(&self) -> bool {
        self.config.metrics_enabled
    }

    pub fn metrics_text(&self) -> ServiceResult<String> {
        self.metrics.render().map_err(ServiceError::internal)
    }

    fn pipeline(&self) -> ServiceResult<MutexGuard<'_, Pipeline>> {
        self.pipeline
            .lock()
            .map_err(|_| ServiceError::Internal("pipeline lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneSettings;
    use crate::detect::StubBackend;
    use crate::geometry::Point;

    fn config() -> ServiceConfig {
        ServiceConfig {
            zones: ZoneSettings {
                config_path: None,
                ..ZoneSettings::default()
            },
            ..ServiceConfig::default()
        }
    }

    fn ready() -> ServiceContext {
        let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::new().with_input_size(32)));
        ServiceContext::new(config(), Some(backend)).unwrap()
    }

    fn zone(id: &str) -> Zone {
        Zone::new(
            id,
            "Dock",
            vec![Point::new(0., 0.), Point::new(10., 0.), Point::new(10., 10.)],
        )
        .unwrap()
    }

    #[test]
    fn missing_backend_is_unhealthy_and_refuses_detection() {
        let ctx = ServiceContext::new(config(), None).unwrap();
        let health = ctx.health();
        assert_eq!(health.status, "unhealthy");
        assert!(!health.model_loaded);
        assert_eq!(health.model_type, "none");
        assert!(matches!(
            ctx.detect_image(b"whatever", DetectOptions::default()),
            Err(ServiceError::NotReady)
        ));
        assert!(matches!(
            ctx.detect_base64("!!", DetectOptions::default()),
            Err(ServiceError::NotReady)
        ));
    }

    #[test]
    fn bad_payloads_are_rejected_before_the_pipeline() {
        let ctx = ready();
        assert_eq!(ctx.health().model_type, "stub");
        assert!(matches!(
            ctx.detect_image(b"not an image", DetectOptions::default()),
            Err(ServiceError::InvalidImage(_))
        ));
        assert!(matches!(
            ctx.detect_base64("%%%", DetectOptions::default()),
            Err(ServiceError::InvalidImage(_))
        ));
        let options = DetectOptions {
            confidence_threshold: Some(1.5),
        };
        assert!(matches!(
            ctx.detect_image(b"", options),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn zone_crud_maps_missing_ids_to_not_found() {
        let ctx = ready();
        assert_eq!(ctx.upsert_zone(zone("dock")).unwrap(), "dock");
        assert_eq!(ctx.list_zones().unwrap().len(), 1);
        assert!(ctx.zone_violations("dock").unwrap().is_empty());

        let renamed = ctx
            .update_zone(
                "dock",
                ZoneUpdate {
                    name: Some("Loading dock".into()),
                    ..ZoneUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Loading dock");

        assert!(matches!(
            ctx.update_zone("nope", ZoneUpdate::default()),
            Err(ServiceError::ZoneNotFound(_))
        ));
        ctx.delete_zone("dock").unwrap();
        assert!(matches!(ctx.delete_zone("dock"), Err(ServiceError::ZoneNotFound(_))));
        assert!(matches!(ctx.get_zone("dock"), Err(ServiceError::ZoneNotFound(_))));
        assert!(matches!(ctx.track(1), Err(ServiceError::TrackNotFound(1))));
    }
}
