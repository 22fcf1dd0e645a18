mod backend;
pub mod backends;
mod decoder;
mod preprocess;
mod registry;
mod result;

pub use backend::{BackendCapability, InferenceBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use decoder::{non_max_suppression, DetectionDecoder};
pub use preprocess::{
    decode_image, letterbox, letterbox_scale, InputTensor, Letterbox, LETTERBOX_FILL,
};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoxedResult, Detection, RawOutput, RawTensor};
