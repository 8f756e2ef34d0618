/// Reconstruction model collaborators
///
/// The network and the isosurface extraction are black boxes behind two
/// traits:
/// - `ModelLoader` - finds and opens a pretrained model
/// - `ReconstructionModel` - image to scene code, scene code to mesh
///
/// Architecture:
/// - `slot.rs` - the single lazily loaded model instance
/// - `onnx.rs` - ONNX Runtime implementation of both traits

pub mod onnx;
pub mod slot;

use std::fmt;

use crate::config::PretrainedSpec;
use crate::error::ModelError;
use crate::mesh::Mesh;
use crate::preprocess::ProcessedImage;

pub use slot::{LoadedModel, ModelSlot};

/// Where inference runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda(usize),
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda(id) => write!(f, "cuda:{}", id),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Opaque latent produced by the model, one code per input image
///
/// Only the model that produced it knows what the numbers mean.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCodes {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl SceneCodes {
    /// The first dimension of `shape` is the batch
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(ModelError::UnexpectedOutput(format!(
                "scene codes of shape {:?} cannot hold {} values",
                shape,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Number of codes in the batch
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of a single code, batch dimension kept at 1
    pub fn code_shape(&self) -> Vec<usize> {
        let mut shape = self.shape.clone();
        shape[0] = 1;
        shape
    }

    /// Values of the code at `index`
    pub fn code(&self, index: usize) -> Option<&[f32]> {
        let stride = self.data.len().checked_div(self.len())?;
        self.data.get(index * stride..(index + 1) * stride)
    }
}

/// Opens a pretrained model by identifier, config name and weight name
pub trait ModelLoader: Send + Sync {
    /// The accelerator when one is usable, otherwise the CPU
    fn preferred_device(&self) -> Device;

    fn from_pretrained(&self, spec: &PretrainedSpec)
        -> Result<Box<dyn ReconstructionModel>, ModelError>;
}

/// A loaded single-image reconstruction model
///
/// Inference is forward-only; implementations keep no training state.
pub trait ReconstructionModel: Send + Sync {
    /// Points per decoder query, trades memory for throughput
    fn set_chunk_size(&mut self, chunk_size: usize);

    /// Move the weights to `device`
    fn to_device(&mut self, device: Device) -> Result<(), ModelError>;

    /// Encode images into scene codes
    fn infer(&self, images: &[ProcessedImage], device: Device) -> Result<SceneCodes, ModelError>;

    /// Extract one mesh per scene code on a `resolution`³ grid
    fn extract_mesh(
        &self,
        codes: &SceneCodes,
        has_vertex_color: bool,
        resolution: u32,
    ) -> Result<Vec<Mesh>, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(Device::Cuda(0).to_string(), "cuda:0");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_scene_codes_split_per_item() {
        let codes = SceneCodes::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        assert_eq!(codes.len(), 2);
        assert_eq!(codes.code_shape(), vec![1, 3]);
        assert_eq!(codes.code(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(codes.code(2), None);
    }

    #[test]
    fn test_scene_codes_reject_mismatched_shape() {
        assert!(SceneCodes::new(vec![1, 4], vec![0.0; 3]).is_err());
        assert!(SceneCodes::new(vec![], vec![]).is_err());
    }
}
