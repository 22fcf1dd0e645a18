#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendCapability, InferenceBackend};
use crate::detect::preprocess::InputTensor;
use crate::detect::result::{RawOutput, RawTensor};

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// The model must take a `[1, 3, S, S]` f32 input and produce `[1, 4 + C, N]`
/// (or `[1, N, 4 + C]`) raw predictions without built-in NMS.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    num_classes: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, num_classes: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract backend loaded {} (input {}x{}, {} classes)",
            model_path.display(),
            input_size,
            input_size,
            num_classes
        );

        Ok(Self {
            model,
            input_size,
            num_classes,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.size() != self.input_size {
            return Err(anyhow!(
                "input tensor is {}x{}, model expects {}x{}",
                input.size(),
                input.size(),
                self.input_size,
                self.input_size
            ));
        }
        let side = self.input_size as usize;
        let array = tract_ndarray::Array4::from_shape_vec((1, 3, side, side), input.data().to_vec())
            .context("input tensor does not match [1, 3, S, S]")?;
        Ok(array.into_tensor())
    }

    fn extract_predictions(&self, outputs: TVec<TValue>) -> Result<RawTensor> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        let attributes = 4 + self.num_classes;
        let (_, dim1, dim2) = view.dim();
        let mut data = Vec::with_capacity(dim1 * dim2);
        if dim1 == attributes {
            // [1, 4 + C, N]: transpose to one row per candidate.
            for candidate in 0..dim2 {
                for attribute in 0..dim1 {
                    data.push(view[[0, attribute, candidate]]);
                }
            }
            RawTensor::new(dim2, dim1, data)
        } else if dim2 == attributes {
            data.extend(view.iter().copied());
            RawTensor::new(dim1, dim2, data)
        } else {
            Err(anyhow!(
                "model output [1, {}, {}] does not carry {} attributes per candidate",
                dim1,
                dim2,
                attributes
            ))
        }
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        matches!(capability, BackendCapability::ObjectDetection)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        Ok(RawOutput::Tensor(self.extract_predictions(outputs)?))
    }

    fn warm_up(&mut self) -> Result<()> {
        let input = InputTensor::zeros(self.input_size);
        self.infer(&input).map(|_| ())
    }
}
