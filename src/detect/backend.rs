use anyhow::Result;

use crate::detect::preprocess::InputTensor;
use crate::detect::result::RawOutput;

/// Capabilities a backend may advertise.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendCapability {
    /// Produces boxes and class scores for a letterboxed frame.
    ObjectDetection,
    /// Output is already free of overlapping duplicates.
    NonMaxSuppression,
}

/// Inference backend trait.
///
/// A backend receives a letterboxed `[1, 3, S, S]` tensor and returns either a raw
/// `[N, 4 + C]` tensor or pre-boxed candidates, both in letterboxed pixel space.
/// Mapping back to the original frame is the decoder's job.
pub trait InferenceBackend: Send {
    /// Backend identifier, reported by health checks as the model type.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: BackendCapability) -> bool;

    /// Side length of the square input the backend expects.
    fn input_size(&self) -> u32;

    /// Run inference on one preprocessed frame.
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput>;

    /// Optional warm-up hook, called once at startup.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
