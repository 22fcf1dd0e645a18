//! Danger zones: polygon membership, PPE ownership and violation history.

mod engine;
mod polygon;
mod zone;

pub use engine::{ZoneEngine, ZoneEvaluation};
pub use polygon::{Polygon, PolygonError};
pub use zone::{
    validate_zone_id, Severity, Zone, ZoneDraft, ZoneError, ZoneUpdate, ZoneViolation,
    UNTRACKED_PERSON,
};
