//! Conversions between pipeline types and the generated protobuf messages.

use tonic::Status;

use crate::detect::Detection;
use crate::error::ServiceError;
use crate::geometry::BBox;
use crate::pipeline::FrameReport;
use crate::safety::SafetyCheck;
use crate::service::HealthStatus;
use crate::zones::ZoneViolation;

use super::pb;

/// Track id sent for detections the tracker did not match.
pub const UNTRACKED: i64 = -1;

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        Status::new(err.rpc_code(), err.to_string())
    }
}

/// Zero selects the configured threshold.
pub fn threshold_override(threshold: f32) -> Option<f32> {
    (threshold != 0.0).then_some(threshold)
}

pub fn detect_response(report: &FrameReport, camera_id: String) -> pb::DetectResponse {
    pb::DetectResponse {
        detections: report.detections.iter().map(detection).collect(),
        safety_check: Some(safety_check(&report.safety_check)),
        zone_violations: report.zone_violations.iter().map(zone_violation).collect(),
        processing_time_ms: report.processing_time_ms,
        timestamp: report.timestamp_ms as i64,
        camera_id,
    }
}

pub fn health_response(health: HealthStatus) -> pb::HealthResponse {
    pb::HealthResponse {
        status: health.status,
        model_loaded: health.model_loaded,
        model_type: health.model_type,
        device: health.device,
    }
}

fn bounding_box(bbox: &BBox) -> pb::BoundingBox {
    pb::BoundingBox {
        x1: bbox.x1,
        y1: bbox.y1,
        x2: bbox.x2,
        y2: bbox.y2,
    }
}

fn detection(detection: &Detection) -> pb::Detection {
    pb::Detection {
        class_id: detection.class_id as i32,
        class_name: detection.class_name.clone(),
        confidence: detection.confidence,
        bbox: Some(bounding_box(&detection.bbox)),
        track_id: detection.track_id.map_or(UNTRACKED, |id| id as i64),
    }
}

fn safety_check(check: &SafetyCheck) -> pb::SafetyCheck {
    pb::SafetyCheck {
        has_violations: check.has_violations,
        violations: check.violations.clone(),
        people_count: check.people_count as i32,
        violation_count: check.violation_count as i32,
        compliant_count: check.compliant_count as i32,
        compliance_rate: check.compliance_rate,
    }
}

fn zone_violation(violation: &ZoneViolation) -> pb::ZoneViolation {
    pb::ZoneViolation {
        zone_id: violation.zone_id.clone(),
        zone_name: violation.zone_name.clone(),
        severity: violation.severity.as_str().to_string(),
        person_track_id: violation.person_track_id,
        missing_ppe: violation.missing_ppe.clone(),
        timestamp: violation.timestamp as i64,
        bbox: Some(bounding_box(&violation.bbox)),
    }
}
