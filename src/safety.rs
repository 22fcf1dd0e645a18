use serde::{Deserialize, Serialize};

use crate::classes::ClassTaxonomy;
use crate::detect::Detection;

/// Frame-level compliance summary.
///
/// Counts are global to the frame: a `NO-*` detection counts as one violation
/// whether or not it overlaps a person.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub has_violations: bool,
    pub violations: Vec<String>,
    pub people_count: usize,
    pub violation_count: usize,
    pub compliant_count: usize,
    pub compliance_rate: f64,
}

impl Default for SafetyCheck {
    fn default() -> Self {
        Self {
            has_violations: false,
            violations: Vec::new(),
            people_count: 0,
            violation_count: 0,
            compliant_count: 0,
            compliance_rate: 100.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SafetyClassifier {
    classes: ClassTaxonomy,
}

impl SafetyClassifier {
    pub fn new(classes: ClassTaxonomy) -> Self {
        Self { classes }
    }

    pub fn classify(&self, detections: &[Detection]) -> SafetyCheck {
        let people_count = detections
            .iter()
            .filter(|d| self.classes.is_person(&d.class_name))
            .count();
        let violations: Vec<String> = detections
            .iter()
            .filter(|d| self.classes.is_violation(&d.class_name))
            .map(|d| d.class_name.clone())
            .collect();
        let violation_count = violations.len();
        let compliant_count = people_count.saturating_sub(violation_count);

        SafetyCheck {
            has_violations: violation_count > 0,
            violations,
            people_count,
            violation_count,
            compliant_count,
            compliance_rate: compliance_rate(compliant_count, people_count),
        }
    }
}

/// Percentage of compliant people, rounded to one decimal. An empty frame is fully compliant.
pub fn compliance_rate(compliant: usize, people: usize) -> f64 {
    if people == 0 {
        return 100.0;
    }
    let rate = compliant as f64 / people as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}
