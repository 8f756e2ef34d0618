/// The process-wide model instance
///
/// Loading happens on the first `get_or_load` call, never before. The lock
/// is held for the whole load so concurrent first callers wait for the one
/// load instead of starting their own.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{Device, ModelLoader, ReconstructionModel};
use crate::config::PretrainedSpec;
use crate::error::ModelError;

/// A ready model and the device it was moved to
#[derive(Clone)]
pub struct LoadedModel {
    pub model: Arc<dyn ReconstructionModel>,
    pub device: Device,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

pub struct ModelSlot {
    loader: Box<dyn ModelLoader>,
    spec: PretrainedSpec,
    chunk_size: usize,
    loaded: Mutex<Option<LoadedModel>>,
}

impl ModelSlot {
    pub fn new(loader: Box<dyn ModelLoader>, spec: PretrainedSpec, chunk_size: usize) -> Self {
        Self {
            loader,
            spec,
            chunk_size,
            loaded: Mutex::new(None),
        }
    }

    /// Return the model, loading it first if this is the first call
    ///
    /// A failed load leaves the slot empty so the next run tries again.
    pub fn get_or_load(&self) -> Result<LoadedModel, ModelError> {
        let mut loaded = self.loaded.lock();
        if let Some(model) = loaded.as_ref() {
            return Ok(model.clone());
        }

        let device = self.loader.preferred_device();
        tracing::info!("Loading {} on {}", self.spec.identifier, device);

        let mut model = self.loader.from_pretrained(&self.spec)?;
        model.set_chunk_size(self.chunk_size);
        model.to_device(device)?;

        let model = LoadedModel {
            model: Arc::from(model),
            device,
        };
        *loaded = Some(model.clone());

        tracing::info!("Model ready");
        Ok(model)
    }

    /// Whether the model has been loaded already
    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }
}

impl std::fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("spec", &self.spec)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
