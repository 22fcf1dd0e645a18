use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// A single object found in one frame, in original-image pixel space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn new(class_id: usize, class_name: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            bbox,
            track_id: None,
        }
    }
}

/// Dense `[N, 4 + C]` backend output: per candidate `cx, cy, w, h` followed by C class scores.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl RawTensor {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("raw tensor dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "raw tensor expected {} values for [{}, {}], received {}",
                expected,
                rows,
                cols,
                data.len()
            ));
        }
        if rows > 0 && cols < 5 {
            return Err(anyhow!(
                "raw tensor needs 4 box values plus at least one class score, got {} columns",
                cols
            ));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_classes(&self) -> usize {
        self.cols.saturating_sub(4)
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// Candidate already boxed and classified by the backend (preprocessed space, corner form).
#[derive(Clone, Debug, PartialEq)]
pub struct BoxedResult {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// What a backend hands to the decoder.
#[derive(Clone, Debug, PartialEq)]
pub enum RawOutput {
    Boxed(Vec<BoxedResult>),
    Tensor(RawTensor),
}

impl Default for RawOutput {
    fn default() -> Self {
        RawOutput::Boxed(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tensor_validates_shape() {
        assert!(RawTensor::new(2, 6, vec![0.0; 12]).is_ok());
        assert!(RawTensor::new(2, 6, vec![0.0; 11]).is_err());
        assert!(RawTensor::new(1, 4, vec![0.0; 4]).is_err());
        assert!(RawTensor::new(0, 0, Vec::new()).is_ok());
    }

    #[test]
    fn untracked_detection_omits_track_id() {
        let det = Detection::new(5, "Person", 0.9, BBox::new(0., 0., 1., 1.));
        let json = serde_json::to_value(&det).unwrap();
        assert!(json.get("track_id").is_none());
        assert_eq!(json["class_name"], "Person");
    }
}
