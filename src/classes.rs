use std::collections::BTreeSet;

/// Classes emitted by the stock PPE model, in output-index order.
pub const DEFAULT_CLASS_NAMES: [&str; 10] = [
    "Hardhat",
    "Mask",
    "NO-Hardhat",
    "NO-Mask",
    "NO-Safety Vest",
    "Person",
    "Safety Cone",
    "Safety Vest",
    "machinery",
    "vehicle",
];

pub const DEFAULT_PERSON_CLASS: &str = "Person";
pub const DEFAULT_VIOLATION_CLASSES: [&str; 3] = ["NO-Hardhat", "NO-Mask", "NO-Safety Vest"];
pub const DEFAULT_NON_PPE_CLASSES: [&str; 3] = ["machinery", "vehicle", "Safety Cone"];

/// Class vocabulary and the roles each class plays in compliance checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTaxonomy {
    /// Class names indexed by model class id.
    pub names: Vec<String>,
    pub person: String,
    /// Missing-equipment classes (e.g. `NO-Hardhat`).
    pub violations: BTreeSet<String>,
    /// Classes that are never worn equipment (vehicles, cones, ...).
    pub non_ppe: BTreeSet<String>,
}

impl Default for ClassTaxonomy {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            person: DEFAULT_PERSON_CLASS.to_string(),
            violations: DEFAULT_VIOLATION_CLASSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            non_ppe: DEFAULT_NON_PPE_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassTaxonomy {
    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn is_person(&self, class_name: &str) -> bool {
        self.person == class_name
    }

    pub fn is_violation(&self, class_name: &str) -> bool {
        self.violations.contains(class_name)
    }

    /// Anything that could be attributed to a person: worn PPE or a missing-PPE marker.
    pub fn is_ppe_candidate(&self, class_name: &str) -> bool {
        !self.is_person(class_name) && !self.non_ppe.contains(class_name)
    }
}
