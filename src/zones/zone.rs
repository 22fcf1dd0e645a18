use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{BBox, Point};

use super::polygon::{Polygon, PolygonError};

const ZONE_ID_PATTERN: &str = r"^[A-Za-z0-9_.:-]{1,64}$";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZoneError {
    #[error("zone id {0:?} must be 1 to 64 characters of [A-Za-z0-9_.:-]")]
    InvalidId(String),
    #[error("zone name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Polygon(#[from] PolygonError),
}

pub fn validate_zone_id(zone_id: &str) -> Result<(), ZoneError> {
    static ZONE_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| Regex::new(ZONE_ID_PATTERN).ok());
    match re {
        Some(re) if re.is_match(zone_id) => Ok(()),
        _ => Err(ZoneError::InvalidId(zone_id.to_string())),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// A named danger area and the equipment required inside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ZoneDraft")]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub polygon: Polygon,
    pub required_ppe: Vec<String>,
    pub enabled: bool,
}

impl Zone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        polygon: Vec<Point>,
    ) -> Result<Self, ZoneError> {
        let id = id.into();
        validate_zone_id(&id)?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ZoneError::EmptyName);
        }
        Ok(Self {
            id,
            name,
            severity: Severity::default(),
            polygon: Polygon::new(polygon)?,
            required_ppe: Vec::new(),
            enabled: true,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_required_ppe<I, S>(mut self, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_ppe = required.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Applies a partial update, leaving `self` untouched when the result is invalid.
    pub fn apply(&mut self, update: ZoneUpdate) -> Result<(), ZoneError> {
        let name = match update.name {
            Some(name) if name.trim().is_empty() => return Err(ZoneError::EmptyName),
            Some(name) => Some(name),
            None => None,
        };
        let polygon = update.polygon.map(Polygon::new).transpose()?;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(polygon) = polygon {
            self.polygon = polygon;
        }
        if let Some(severity) = update.severity {
            self.severity = severity;
        }
        if let Some(required_ppe) = update.required_ppe {
            self.required_ppe = required_ppe;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        Ok(())
    }
}

/// Unvalidated zone as written in config files and API requests.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneDraft {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    pub polygon: Vec<Point>,
    #[serde(default)]
    pub required_ppe: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl TryFrom<ZoneDraft> for Zone {
    type Error = ZoneError;

    fn try_from(record: ZoneDraft) -> Result<Self, Self::Error> {
        Ok(Zone::new(record.id, record.name, record.polygon)?
            .with_severity(record.severity)
            .with_required_ppe(record.required_ppe)
            .with_enabled(record.enabled))
    }
}

/// Partial zone update; absent fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneUpdate {
    pub name: Option<String>,
    pub severity: Option<Severity>,
    pub polygon: Option<Vec<Point>>,
    pub required_ppe: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

/// Sentinel track id for violations by untracked people.
pub const UNTRACKED_PERSON: i64 = -1;

/// A person found inside a zone without the equipment it requires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneViolation {
    pub zone_id: String,
    pub zone_name: String,
    pub severity: Severity,
    pub person_track_id: i64,
    pub missing_ppe: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub bbox: BBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0., 0.),
            Point::new(10., 0.),
            Point::new(10., 10.),
            Point::new(0., 10.),
        ]
    }

    #[test]
    fn zone_ids_are_allowlisted() {
        assert!(validate_zone_id("loading-dock.1").is_ok());
        assert!(validate_zone_id("zone:crane_area").is_ok());
        assert!(validate_zone_id("").is_err());
        assert!(validate_zone_id("has space").is_err());
        assert!(validate_zone_id("zones/../etc").is_err());
        assert!(validate_zone_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn zone_record_fills_defaults() {
        let zone: Zone = serde_json::from_str(
            r#"{"id": "dock", "name": "Dock", "polygon": [{"x":0,"y":0},{"x":5,"y":0},{"x":5,"y":5}]}"#,
        )
        .unwrap();
        assert_eq!(zone.severity, Severity::Warning);
        assert!(zone.enabled);
        assert!(zone.required_ppe.is_empty());

        let bad: Result<Zone, _> = serde_json::from_str(
            r#"{"id": "dock", "name": "Dock", "polygon": [{"x":0,"y":0},{"x":5,"y":0}]}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn closed_ring_polygon_is_accepted() {
        let mut ring = square();
        ring.push(Point::new(0., 0.));
        let zone = Zone::new("dock", "Dock", ring).unwrap();
        assert_eq!(zone.polygon.vertices(), square().as_slice());
        assert!(zone.polygon.contains(Point::new(5., 5.)));
    }

    #[test]
    fn invalid_update_leaves_zone_unchanged() {
        let mut zone = Zone::new("dock", "Dock", square()).unwrap();
        let before = zone.clone();
        let update = ZoneUpdate {
            name: Some("Renamed".into()),
            polygon: Some(vec![Point::new(0., 0.), Point::new(1., 1.)]),
            ..ZoneUpdate::default()
        };
        assert!(zone.apply(update).is_err());
        assert_eq!(zone, before);

        let update = ZoneUpdate {
            severity: Some(Severity::Critical),
            required_ppe: Some(vec!["Hardhat".into()]),
            ..ZoneUpdate::default()
        };
        zone.apply(update).unwrap();
        assert_eq!(zone.severity, Severity::Critical);
        assert_eq!(zone.name, "Dock");
    }
}
