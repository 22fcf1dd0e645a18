use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::classes::ClassTaxonomy;
use crate::config::ZoneSettings;
use crate::detect::Detection;

use super::zone::{Zone, ZoneError, ZoneUpdate, ZoneViolation, UNTRACKED_PERSON};

/// Violations found in one frame, in detection order, plus how many people stood
/// in each zone. Disabled zones report zero occupancy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoneEvaluation {
    pub violations: Vec<ZoneViolation>,
    pub occupancy: BTreeMap<String, usize>,
}

#[derive(Deserialize)]
struct ZoneFile {
    #[serde(default)]
    zones: Vec<serde_json::Value>,
}

pub struct ZoneEngine {
    enabled: bool,
    overlap_threshold: f32,
    history_limit: Option<usize>,
    classes: ClassTaxonomy,
    zones: BTreeMap<String, Zone>,
    history: HashMap<String, VecDeque<ZoneViolation>>,
}

impl ZoneEngine {
    pub fn new(settings: &ZoneSettings, classes: ClassTaxonomy) -> Self {
        if !settings.enabled {
            log::info!("zone checking disabled");
        }
        Self {
            enabled: settings.enabled,
            overlap_threshold: settings.ppe_overlap_threshold,
            history_limit: settings.history_limit,
            classes,
            zones: BTreeMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Loads zones from a JSON, TOML or YAML file shaped as `{ "zones": [...] }`.
    ///
    /// A missing file is not an error. Zones that fail validation are skipped.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            log::info!("no zone config at {}", path.display());
            return Ok(0);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read zone config {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let file: ZoneFile = match extension.as_deref() {
            Some("toml") => toml::from_str(&raw).map_err(|e| anyhow!("{}", e)),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&raw).map_err(|e| anyhow!("{}", e))
            }
            _ => serde_json::from_str(&raw).map_err(|e| anyhow!("{}", e)),
        }
        .with_context(|| format!("invalid zone config {}", path.display()))?;

        let mut loaded = 0;
        for (index, value) in file.zones.into_iter().enumerate() {
            match serde_json::from_value::<Zone>(value) {
                Ok(zone) => {
                    self.zones.insert(zone.id.clone(), zone);
                    loaded += 1;
                }
                Err(err) => log::warn!(
                    "skipping zone #{} in {}: {}",
                    index,
                    path.display(),
                    err
                ),
            }
        }
        log::info!("loaded {} zones from {}", loaded, path.display());
        Ok(loaded)
    }

    pub fn check_violations(
        &mut self,
        detections: &[Detection],
        timestamp_ms: u64,
    ) -> Vec<ZoneViolation> {
        self.evaluate(detections, timestamp_ms).violations
    }

    /// Evaluates every person against every enabled zone containing their feet.
    pub fn evaluate(&mut self, detections: &[Detection], timestamp_ms: u64) -> ZoneEvaluation {
        let mut evaluation = ZoneEvaluation::default();
        if !self.enabled || self.zones.is_empty() {
            return evaluation;
        }

        let persons: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.classes.is_person(&d.class_name))
            .collect();
        let ppe: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.classes.is_ppe_candidate(&d.class_name))
            .collect();

        for zone in self.zones.values() {
            evaluation.occupancy.insert(zone.id.clone(), 0);
        }
        for person in &persons {
            let feet = person.bbox.bottom_center();
            for zone in self.zones.values().filter(|zone| zone.enabled) {
                if !zone.polygon.contains(feet) {
                    continue;
                }
                if let Some(count) = evaluation.occupancy.get_mut(&zone.id) {
                    *count += 1;
                }

                let missing = self.missing_ppe(zone, person, &ppe);
                if missing.is_empty() {
                    continue;
                }
                evaluation.violations.push(ZoneViolation {
                    zone_id: zone.id.clone(),
                    zone_name: zone.name.clone(),
                    severity: zone.severity,
                    person_track_id: person
                        .track_id
                        .and_then(|id| i64::try_from(id).ok())
                        .unwrap_or(UNTRACKED_PERSON),
                    missing_ppe: missing,
                    timestamp: timestamp_ms,
                    bbox: person.bbox,
                });
            }
        }

        for violation in &evaluation.violations {
            log::debug!(
                "zone {} violation by track {}: missing {:?}",
                violation.zone_id,
                violation.person_track_id,
                violation.missing_ppe
            );
            let history = self.history.entry(violation.zone_id.clone()).or_default();
            if let Some(limit) = self.history_limit {
                while history.len() >= limit.max(1) {
                    history.pop_front();
                }
            }
            history.push_back(violation.clone());
        }
        evaluation
    }

    /// Required items the person lacks, followed by missing-equipment markers they carry.
    fn missing_ppe(&self, zone: &Zone, person: &Detection, ppe: &[&Detection]) -> Vec<String> {
        let owned: Vec<&str> = ppe
            .iter()
            .filter(|item| person.bbox.coverage_of(&item.bbox) > self.overlap_threshold)
            .map(|item| item.class_name.as_str())
            .collect();

        let mut missing: Vec<String> = Vec::new();
        let worn = |class: &str| {
            owned
                .iter()
                .any(|o| *o == class && !self.classes.is_violation(o))
        };
        for required in &zone.required_ppe {
            if !worn(required.as_str()) && !missing.contains(required) {
                missing.push(required.clone());
            }
        }
        for class in owned.iter().filter(|o| self.classes.is_violation(o)) {
            if !missing.iter().any(|m| m == class) {
                missing.push(class.to_string());
            }
        }
        missing
    }

    /// Inserts or replaces a zone by id.
    pub fn add_zone(&mut self, zone: Zone) {
        log::info!("zone {} ({}) added", zone.id, zone.name);
        self.zones.insert(zone.id.clone(), zone);
    }

    /// Drops the zone and its violation history; a zone re-added under the same id
    /// starts with an empty history.
    pub fn remove_zone(&mut self, zone_id: &str) -> bool {
        let removed = self.zones.remove(zone_id).is_some();
        if removed {
            self.history.remove(zone_id);
            log::info!("zone {} removed", zone_id);
        }
        removed
    }

    /// Returns `Ok(false)` for unknown ids; an invalid update leaves the zone as it was.
    pub fn update_zone(&mut self, zone_id: &str, update: ZoneUpdate) -> Result<bool, ZoneError> {
        let Some(zone) = self.zones.get_mut(zone_id) else {
            return Ok(false);
        };
        zone.apply(update)?;
        log::info!("zone {} updated", zone_id);
        Ok(true)
    }

    pub fn get_zone(&self, zone_id: &str) -> Option<Zone> {
        self.zones.get(zone_id).cloned()
    }

    /// Snapshot of every zone, ordered by id.
    pub fn get_all_zones(&self) -> Vec<Zone> {
        self.zones.values().cloned().collect()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Recorded violations for a zone, oldest first.
    pub fn violation_history(&self, zone_id: &str) -> Vec<ZoneViolation> {
        self.history
            .get(zone_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Point};
    use crate::zones::Severity;
    use std::io::Write;

    fn settings() -> ZoneSettings {
        ZoneSettings {
            enabled: true,
            ..ZoneSettings::default()
        }
    }

    fn engine() -> ZoneEngine {
        let mut engine = ZoneEngine::new(&settings(), ClassTaxonomy::default());
        engine.add_zone(site_zone(&["Hardhat"]));
        engine
    }

    fn site_zone(required: &[&str]) -> Zone {
        Zone::new(
            "site",
            "Construction site",
            vec![
                Point::new(0., 0.),
                Point::new(1000., 0.),
                Point::new(1000., 1000.),
                Point::new(0., 1000.),
            ],
        )
        .unwrap()
        .with_severity(Severity::Critical)
        .with_required_ppe(required.iter().copied())
    }

    fn det(class: &str, bbox: BBox, track_id: Option<u64>) -> Detection {
        let mut det = Detection::new(0, class, 0.9, bbox);
        det.track_id = track_id;
        det
    }

    fn person(track_id: Option<u64>) -> Detection {
        det("Person", BBox::new(100., 100., 200., 400.), track_id)
    }

    #[test]
    fn person_without_required_ppe_violates() {
        let mut engine = engine();
        let violations = engine.check_violations(&[person(Some(7))], 1234);
        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.zone_id, "site");
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.person_track_id, 7);
        assert_eq!(v.missing_ppe, vec!["Hardhat".to_string()]);
        assert_eq!(v.timestamp, 1234);
        assert_eq!(v.bbox, BBox::new(100., 100., 200., 400.));
    }

    #[test]
    fn owned_ppe_satisfies_requirement() {
        let mut engine = engine();
        let hardhat = det("Hardhat", BBox::new(130., 100., 170., 140.), None);
        assert!(engine.check_violations(&[person(Some(1)), hardhat], 0).is_empty());

        // A helmet far from the person is not theirs.
        let stray = det("Hardhat", BBox::new(600., 600., 640., 640.), None);
        assert_eq!(engine.check_violations(&[person(Some(1)), stray], 0).len(), 1);
    }

    #[test]
    fn violation_markers_are_appended_once() {
        let mut engine = engine();
        let frame = [
            person(None),
            det("NO-Hardhat", BBox::new(130., 100., 170., 140.), None),
            det("NO-Mask", BBox::new(140., 120., 160., 140.), None),
            det("NO-Mask", BBox::new(141., 121., 161., 141.), None),
        ];
        let violations = engine.check_violations(&frame, 0);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].person_track_id, UNTRACKED_PERSON);
        assert_eq!(
            violations[0].missing_ppe,
            vec!["Hardhat".to_string(), "NO-Hardhat".to_string(), "NO-Mask".to_string()]
        );
    }

    #[test]
    fn persons_outside_or_on_the_edge_are_ignored() {
        let mut engine = engine();
        let outside = det("Person", BBox::new(1100., 100., 1200., 400.), Some(1));
        // Feet exactly on the bottom edge of the zone.
        let on_edge = det("Person", BBox::new(100., 700., 200., 1000.), Some(2));
        let evaluation = engine.evaluate(&[outside, on_edge], 0);
        assert!(evaluation.violations.is_empty());
        assert_eq!(evaluation.occupancy.get("site"), Some(&0));
    }

    #[test]
    fn disabled_zones_and_engine_yield_nothing() {
        let mut engine = engine();
        engine
            .update_zone(
                "site",
                ZoneUpdate {
                    enabled: Some(false),
                    ..ZoneUpdate::default()
                },
            )
            .unwrap();
        let evaluation = engine.evaluate(&[person(None)], 0);
        assert!(evaluation.violations.is_empty());
        assert_eq!(evaluation.occupancy.get("site"), Some(&0));

        let mut off = ZoneEngine::new(
            &ZoneSettings {
                enabled: false,
                ..ZoneSettings::default()
            },
            ClassTaxonomy::default(),
        );
        off.add_zone(site_zone(&["Hardhat"]));
        assert!(off.check_violations(&[person(None)], 0).is_empty());
    }

    #[test]
    fn violations_follow_detection_order_across_zones() {
        let mut engine = engine();
        let yard = Zone::new(
            "yard",
            "Yard",
            vec![
                Point::new(0., 0.),
                Point::new(1000., 0.),
                Point::new(1000., 1000.),
                Point::new(0., 1000.),
            ],
        )
        .unwrap()
        .with_required_ppe(["Safety Vest"]);
        engine.add_zone(yard);

        let second = det("Person", BBox::new(500., 100., 600., 400.), Some(2));
        let evaluation = engine.evaluate(&[person(Some(1)), second], 0);
        let order: Vec<(i64, &str)> = evaluation
            .violations
            .iter()
            .map(|v| (v.person_track_id, v.zone_id.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "site"), (1, "yard"), (2, "site"), (2, "yard")]);
        assert_eq!(evaluation.occupancy.get("site"), Some(&2));
        assert_eq!(evaluation.occupancy.get("yard"), Some(&2));
    }

    #[test]
    fn removed_zone_history_does_not_carry_over() {
        let mut engine = engine();
        engine.check_violations(&[person(Some(1))], 10);
        assert_eq!(engine.violation_history("site").len(), 1);

        assert!(engine.remove_zone("site"));
        assert!(engine.violation_history("site").is_empty());
        engine.add_zone(site_zone(&["Hardhat"]));
        assert!(engine.violation_history("site").is_empty());
    }

    #[test]
    fn history_is_appended_and_optionally_bounded() {
        let mut engine = engine();
        for ts in 0..5 {
            engine.check_violations(&[person(Some(1))], ts);
        }
        let history = engine.violation_history("site");
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].timestamp, 0);

        let mut bounded = ZoneEngine::new(
            &ZoneSettings {
                history_limit: Some(2),
                ..settings()
            },
            ClassTaxonomy::default(),
        );
        bounded.add_zone(site_zone(&["Hardhat"]));
        for ts in 0..5 {
            bounded.check_violations(&[person(Some(1))], ts);
        }
        let stamps: Vec<u64> = bounded
            .violation_history("site")
            .iter()
            .map(|v| v.timestamp)
            .collect();
        assert_eq!(stamps, vec![3, 4]);
    }

    #[test]
    fn crud_round_trip() {
        let mut engine = engine();
        assert_eq!(engine.get_all_zones().len(), 1);
        assert!(!engine.update_zone("missing", ZoneUpdate::default()).unwrap());

        let bad = ZoneUpdate {
            polygon: Some(vec![Point::new(0., 0.), Point::new(1., 0.)]),
            ..ZoneUpdate::default()
        };
        assert!(engine.update_zone("site", bad).is_err());
        assert_eq!(engine.get_zone("site").unwrap(), site_zone(&["Hardhat"]));

        assert!(engine.remove_zone("site"));
        assert!(!engine.remove_zone("site"));
        assert!(engine.get_zone("site").is_none());
    }

    #[test]
    fn loads_yaml_and_skips_invalid_zones() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
zones:
  - id: crane
    name: Crane area
    severity: critical
    required_ppe: [Hardhat, Safety Vest]
    polygon:
      - {{x: 0, y: 0}}
      - {{x: 50, y: 0}}
      - {{x: 50, y: 50}}
  - id: broken
    name: Too small
    polygon:
      - {{x: 0, y: 0}}
      - {{x: 1, y: 1}}
"#
        )
        .unwrap();

        let mut engine = ZoneEngine::new(&settings(), ClassTaxonomy::default());
        assert_eq!(engine.load_file(file.path()).unwrap(), 1);
        let crane = engine.get_zone("crane").unwrap();
        assert_eq!(crane.severity, Severity::Critical);
        assert_eq!(crane.required_ppe.len(), 2);
        assert!(engine.get_zone("broken").is_none());
    }

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ZoneEngine::new(&settings(), ClassTaxonomy::default());
        assert_eq!(engine.load_file(&dir.path().join("zones.json")).unwrap(), 0);

        let garbage = dir.path().join("zones.toml");
        std::fs::write(&garbage, "zones = [ not toml").unwrap();
        assert!(engine.load_file(&garbage).is_err());
    }
}
