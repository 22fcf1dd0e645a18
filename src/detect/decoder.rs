use crate::classes::ClassTaxonomy;
use crate::detect::result::{BoxedResult, Detection, RawOutput, RawTensor};
use crate::geometry::{BBox, FrameSize};

/// Turns backend output into detections in original-frame pixel space.
#[derive(Clone, Debug)]
pub struct DetectionDecoder {
    class_names: Vec<String>,
    confidence_threshold: f32,
    nms_threshold: f32,
    apply_nms: bool,
}

impl DetectionDecoder {
    pub fn new(classes: &ClassTaxonomy, confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            class_names: classes.names.clone(),
            confidence_threshold,
            nms_threshold,
            apply_nms: true,
        }
    }

    /// Skip the decoder's own NMS when the backend already de-duplicates.
    pub fn with_backend_nms(mut self, backend_applies_nms: bool) -> Self {
        self.apply_nms = !backend_applies_nms;
        self
    }

    pub fn set_backend_nms(&mut self, backend_applies_nms: bool) {
        self.apply_nms = !backend_applies_nms;
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn decode(&self, raw: &RawOutput, frame: FrameSize, scale: f32) -> Vec<Detection> {
        self.decode_with_threshold(raw, frame, scale, self.confidence_threshold)
    }

    /// Decode with a one-off confidence threshold (per-request override).
    pub fn decode_with_threshold(
        &self,
        raw: &RawOutput,
        frame: FrameSize,
        scale: f32,
        threshold: f32,
    ) -> Vec<Detection> {
        if !(scale.is_finite() && scale > 0.) {
            log::warn!("discarding backend output with invalid letterbox scale {}", scale);
            return Vec::new();
        }

        let mut detections = match raw {
            RawOutput::Tensor(tensor) => self.decode_tensor(tensor, frame, scale, threshold),
            RawOutput::Boxed(results) => self.decode_boxed(results, frame, scale, threshold),
        };

        if self.apply_nms {
            non_max_suppression(&mut detections, self.nms_threshold);
        }
        detections
    }

    fn decode_tensor(
        &self,
        tensor: &RawTensor,
        frame: FrameSize,
        scale: f32,
        threshold: f32,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();
        for index in 0..tensor.rows() {
            let row = tensor.row(index);
            let Some((class_id, confidence)) = best_class(&row[4..]) else {
                continue;
            };
            if confidence <= threshold {
                continue;
            }
            let bbox = BBox::from_cxcywh(row[0], row[1], row[2], row[3]);
            if let Some(detection) = self.finish(class_id, confidence, bbox, frame, scale) {
                detections.push(detection);
            }
        }
        detections
    }

    fn decode_boxed(
        &self,
        results: &[BoxedResult],
        frame: FrameSize,
        scale: f32,
        threshold: f32,
    ) -> Vec<Detection> {
        results
            .iter()
            .filter(|result| result.confidence.is_finite() && result.confidence > threshold)
            .filter_map(|result| {
                self.finish(result.class_id, result.confidence, result.bbox, frame, scale)
            })
            .collect()
    }

    fn finish(
        &self,
        class_id: usize,
        confidence: f32,
        bbox: BBox,
        frame: FrameSize,
        scale: f32,
    ) -> Option<Detection> {
        let Some(class_name) = self.class_names.get(class_id) else {
            log::debug!("dropping candidate with unknown class id {}", class_id);
            return None;
        };
        if !bbox.is_finite() {
            return None;
        }
        let bbox = bbox.scaled(1. / scale).clipped(frame);
        Some(Detection::new(
            class_id,
            class_name.clone(),
            confidence.clamp(0., 1.),
            bbox,
        ))
    }
}

/// Index and value of the highest score; the first index wins ties.
fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, value)) if value >= score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Class-aware greedy NMS. Keeps the highest-confidence box of each overlapping group,
/// leaving detections sorted by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..detections.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let prev = &detections[prev_index];
            let candidate = &detections[index];
            if prev.class_id == candidate.class_id && prev.bbox.iou(&candidate.bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            detections.swap(current_index, index);
            current_index += 1;
        }
    }
    detections.truncate(current_index);
}
