use anyhow::{anyhow, Result};

use crate::detect::backend::{BackendCapability, InferenceBackend};
use crate::detect::preprocess::InputTensor;
use crate::detect::result::RawOutput;

const DEFAULT_INPUT_SIZE: u32 = 640;

/// Scripted backend for testing and dry runs.
///
/// Returns the same configured output for every frame (no detections by default).
pub struct StubBackend {
    output: RawOutput,
    input_size: u32,
    applies_nms: bool,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            output: RawOutput::default(),
            input_size: DEFAULT_INPUT_SIZE,
            applies_nms: false,
        }
    }

    pub fn with_output(mut self, output: RawOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    /// Advertise that the scripted output is already de-duplicated.
    pub fn with_nms(mut self, applies_nms: bool) -> Self {
        self.applies_nms = applies_nms;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        match capability {
            BackendCapability::ObjectDetection => true,
            BackendCapability::NonMaxSuppression => self.applies_nms,
        }
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput> {
        if input.size() != self.input_size {
            return Err(anyhow!(
                "input tensor is {}x{}, backend expects {}x{}",
                input.size(),
                input.size(),
                self.input_size,
                self.input_size
            ));
        }
        Ok(self.output.clone())
    }
}
