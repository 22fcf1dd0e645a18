use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

use super::backend::{BackendCapability, InferenceBackend};
use super::backends::StubBackend;

/// Shared handle to a loaded backend. Backends take `&mut self`, hence the `Mutex`.
pub type SharedBackend = Arc<Mutex<dyn InferenceBackend>>;

/// Inference backends in registration order.
pub struct BackendRegistry {
    backends: Vec<SharedBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Loads the backends named by the model settings.
    ///
    /// A backend that fails to load is logged and skipped; the caller decides what an
    /// empty registry means (the service reports itself unhealthy).
    pub fn from_settings(settings: &ModelSettings, num_classes: usize) -> Self {
        let mut registry = Self::new();
        let wants = |name: &str| settings.backend == name || settings.backend == "auto";

        if wants("tract") {
            registry.try_register_tract(settings, num_classes);
        }
        if settings.backend == "stub" {
            registry.register(StubBackend::new().with_input_size(settings.input_size));
        }
        if registry.is_empty() {
            log::warn!(
                "no inference backend loaded (backend={}, model={})",
                settings.backend,
                settings.path.display()
            );
        }
        registry
    }

    #[cfg(feature = "backend-tract")]
    fn try_register_tract(&mut self, settings: &ModelSettings, num_classes: usize) {
        let is_onnx = settings
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            log::warn!(
                "tract backend needs an .onnx model, got {}",
                settings.path.display()
            );
            return;
        }
        match super::backends::TractBackend::new(&settings.path, settings.input_size, num_classes)
        {
            Ok(backend) => self.register(backend),
            Err(err) => log::warn!("failed to load tract backend: {:#}", err),
        }
    }

    #[cfg(not(feature = "backend-tract"))]
    fn try_register_tract(&mut self, settings: &ModelSettings, _num_classes: usize) {
        log::warn!(
            "tract backend requested for {} but the crate was built without `backend-tract`",
            settings.path.display()
        );
    }

    pub fn register<B: InferenceBackend + 'static>(&mut self, backend: B) {
        log::info!("registered inference backend {}", backend.name());
        self.backends.push(Arc::new(Mutex::new(backend)));
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// The earliest registered backend that supports `capability`.
    pub fn backend_for_capability(&self, capability: BackendCapability) -> Result<SharedBackend> {
        for backend in &self.backends {
            let supports = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?
                .supports(capability);
            if supports {
                return Ok(backend.clone());
            }
        }
        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
