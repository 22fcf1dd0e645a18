use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::classes::ClassTaxonomy;
use crate::tracker::{
    TrackerConfig, DEFAULT_HIT_COUNTER_MAX, DEFAULT_INITIALIZATION_DELAY, DEFAULT_MAX_DISTANCE,
};

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_RPC_ADDR: &str = "127.0.0.1:50051";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_BACKEND: &str = "auto";
const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_ZONES_CONFIG_PATH: &str = "config/zones.yaml";
const DEFAULT_PPE_OVERLAP_THRESHOLD: f32 = 0.3;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const KNOWN_BACKENDS: [&str; 3] = ["auto", "tract", "stub"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    server: Option<ServerConfigFile>,
    model: Option<ModelConfigFile>,
    classes: Option<ClassesConfigFile>,
    tracking: Option<TrackingConfigFile>,
    zones: Option<ZonesConfigFile>,
    metrics: Option<MetricsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    http_addr: Option<String>,
    rpc_addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    backend: Option<String>,
    device: Option<String>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassesConfigFile {
    names: Option<Vec<String>>,
    person: Option<String>,
    violations: Option<Vec<String>>,
    non_ppe: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    enabled: Option<bool>,
    max_distance: Option<f32>,
    hit_counter_max: Option<u32>,
    initialization_delay: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ZonesConfigFile {
    enabled: Option<bool>,
    config_path: Option<PathBuf>,
    ppe_overlap_threshold: Option<f32>,
    history_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MetricsConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub http_addr: String,
    pub rpc_addr: String,
    pub max_body_bytes: usize,
    pub model: ModelSettings,
    pub classes: ClassTaxonomy,
    pub tracking: TrackerConfig,
    pub zones: ZoneSettings,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    /// `auto`, `tract` or `stub`.
    pub backend: String,
    /// Reported by health checks.
    pub device: String,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            backend: DEFAULT_BACKEND.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub enabled: bool,
    pub config_path: Option<PathBuf>,
    /// Share of a PPE box that must lie inside a person box for the person to own it.
    pub ppe_overlap_threshold: f32,
    /// Per-zone violation history cap; unbounded when `None`.
    pub history_limit: Option<usize>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config_path: Some(PathBuf::from(DEFAULT_ZONES_CONFIG_PATH)),
            ppe_overlap_threshold: DEFAULT_PPE_OVERLAP_THRESHOLD,
            history_limit: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            rpc_addr: DEFAULT_RPC_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            model: ModelSettings::default(),
            classes: ClassTaxonomy::default(),
            tracking: TrackerConfig::default(),
            zones: ZoneSettings::default(),
            metrics_enabled: true,
        }
    }
}

impl ServiceConfig {
    /// Loads the file named by `PPE_CONFIG` (if any), then `PPE_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let classes = file.classes.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let zones = file.zones.unwrap_or_default();

        let mut taxonomy = defaults.classes;
        if let Some(names) = classes.names {
            taxonomy.names = names;
        }
        if let Some(person) = classes.person {
            taxonomy.person = person;
        }
        if let Some(violations) = classes.violations {
            taxonomy.violations = violations.into_iter().collect();
        }
        if let Some(non_ppe) = classes.non_ppe {
            taxonomy.non_ppe = non_ppe.into_iter().collect();
        }

        Self {
            http_addr: server.http_addr.unwrap_or(defaults.http_addr),
            rpc_addr: server.rpc_addr.unwrap_or(defaults.rpc_addr),
            max_body_bytes: server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            model: ModelSettings {
                path: model.path.unwrap_or(defaults.model.path),
                backend: model.backend.unwrap_or(defaults.model.backend),
                device: model.device.unwrap_or(defaults.model.device),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_threshold: model
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                nms_threshold: model.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            },
            classes: taxonomy,
            tracking: TrackerConfig {
                enabled: tracking.enabled.unwrap_or(true),
                max_distance: tracking.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE),
                hit_counter_max: tracking.hit_counter_max.unwrap_or(DEFAULT_HIT_COUNTER_MAX),
                initialization_delay: tracking
                    .initialization_delay
                    .unwrap_or(DEFAULT_INITIALIZATION_DELAY),
            },
            zones: ZoneSettings {
                enabled: zones.enabled.unwrap_or(true),
                config_path: zones.config_path.or(defaults.zones.config_path),
                ppe_overlap_threshold: zones
                    .ppe_overlap_threshold
                    .unwrap_or(DEFAULT_PPE_OVERLAP_THRESHOLD),
                history_limit: zones.history_limit,
            },
            metrics_enabled: file.metrics.and_then(|m| m.enabled).unwrap_or(true),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("PPE_HTTP_ADDR") {
            self.http_addr = addr;
        }
        if let Some(addr) = env_string("PPE_RPC_ADDR") {
            self.rpc_addr = addr;
        }
        if let Some(path) = env_string("PPE_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = env_string("PPE_BACKEND") {
            self.model.backend = backend.to_lowercase();
        }
        if let Some(device) = env_string("PPE_DEVICE") {
            self.model.device = device;
        }
        if let Some(value) = env_parse("PPE_CONFIDENCE_THRESHOLD")? {
            self.model.confidence_threshold = value;
        }
        if let Some(value) = env_parse("PPE_NMS_THRESHOLD")? {
            self.model.nms_threshold = value;
        }
        if let Some(enabled) = env_bool("PPE_ENABLE_TRACKING")? {
            self.tracking.enabled = enabled;
        }
        if let Some(value) = env_parse("PPE_TRACKER_MAX_DISTANCE")? {
            self.tracking.max_distance = value;
        }
        if let Some(value) = env_parse("PPE_TRACKER_HIT_COUNTER_MAX")? {
            self.tracking.hit_counter_max = value;
        }
        if let Some(enabled) = env_bool("PPE_ENABLE_ZONES")? {
            self.zones.enabled = enabled;
        }
        if let Some(path) = env_string("PPE_ZONES_CONFIG_PATH") {
            self.zones.config_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_parse("PPE_OVERLAP_THRESHOLD")? {
            self.zones.ppe_overlap_threshold = value;
        }
        if let Some(value) = env_parse("PPE_ZONE_HISTORY_LIMIT")? {
            self.zones.history_limit = Some(value);
        }
        if let Some(enabled) = env_bool("PPE_METRICS_ENABLED")? {
            self.metrics_enabled = enabled;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.http_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("http address '{}' is not host:port", self.http_addr))?;
        self.rpc_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("rpc address '{}' is not host:port", self.rpc_addr))?;
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }

        self.model.backend = self.model.backend.to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown backend '{}' (expected one of {})",
                self.model.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        check_unit("confidence_threshold", self.model.confidence_threshold)?;
        check_unit("nms_threshold", self.model.nms_threshold)?;
        check_unit("ppe_overlap_threshold", self.zones.ppe_overlap_threshold)?;

        if self.classes.names.is_empty() {
            return Err(anyhow!("class list must not be empty"));
        }
        if !self.classes.names.contains(&self.classes.person) {
            return Err(anyhow!(
                "person class '{}' is not among the model classes",
                self.classes.person
            ));
        }

        if !(self.tracking.max_distance.is_finite() && self.tracking.max_distance > 0.) {
            return Err(anyhow!("tracker max_distance must be a positive number"));
        }
        if self.tracking.hit_counter_max == 0 {
            return Err(anyhow!("tracker hit_counter_max must be greater than zero"));
        }
        if self.tracking.initialization_delay == 0 {
            return Err(anyhow!(
                "tracker initialization_delay must be greater than zero"
            ));
        }
        if self.zones.history_limit == Some(0) {
            return Err(anyhow!("zone history_limit must be greater than zero"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value)),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match env_string(key).map(|value| value.to_lowercase()).as_deref() {
        None => Ok(None),
        Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some("0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(other) => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}
