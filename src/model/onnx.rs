/// ONNX Runtime backend for the reconstruction model
///
/// A model directory `<models_dir>/<identifier>/` holds:
/// - the JSON model config (`config_name`)
/// - the encoder graph (`weight_name`): image [1, 3, S, S] -> scene codes
/// - the decoder graph named in the config: (scene code, points [N, 3])
///   -> (density [N], color [N, 3])
///
/// Mesh extraction queries the decoder on a regular grid in chunks and
/// hands the density field to `fast-surface-nets`.

use fast_surface_nets::ndshape::{RuntimeShape, Shape};
use fast_surface_nets::{surface_nets, SurfaceNetsBuffer};
use ndarray::{Array2, Array4, ArrayViewD, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{Device, ModelLoader, ReconstructionModel, SceneCodes};
use crate::config::PretrainedSpec;
use crate::error::ModelError;
use crate::mesh::Mesh;
use crate::preprocess::ProcessedImage;

/// Model config stored next to the weights
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TripoConfig {
    /// Square input size of the encoder
    pub cond_image_size: u32,
    /// Half extent of the queried bounding cube
    pub radius: f32,
    /// Density value of the extracted surface
    pub density_threshold: f32,
    /// Decoder graph inside the model directory
    pub decoder_name: String,
    pub encoder_input: String,
    pub decoder_code_input: String,
    pub decoder_points_input: String,
    pub density_output: String,
    pub color_output: String,
}

impl Default for TripoConfig {
    fn default() -> Self {
        Self {
            cond_image_size: 512,
            radius: 0.87,
            density_threshold: 25.0,
            decoder_name: "decoder.onnx".to_string(),
            encoder_input: "image".to_string(),
            decoder_code_input: "scene_code".to_string(),
            decoder_points_input: "points".to_string(),
            density_output: "density".to_string(),
            color_output: "color".to_string(),
        }
    }
}

impl Device {
    /// Pick CUDA when ONNX Runtime can use it
    pub fn detect() -> Self {
        if CUDAExecutionProvider::default().is_available().unwrap_or(false) {
            Device::Cuda(0)
        } else {
            Device::Cpu
        }
    }
}

/// Open an ONNX session on `device`
pub(crate) fn open_session(path: &Path, device: Device) -> Result<Session, ModelError> {
    if !path.exists() {
        return Err(ModelError::MissingFile(path.to_path_buf()));
    }

    let builder = Session::builder().map_err(ModelError::runtime)?;
    let builder = match device {
        Device::Cuda(id) => builder
            .with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(id as i32)
                .build()])
            .map_err(ModelError::runtime)?,
        Device::Cpu => builder,
    };

    let session = builder.commit_from_file(path).map_err(ModelError::runtime)?;
    tracing::debug!("Opened {} on {}", path.display(), device);
    Ok(session)
}

/// Loads models from a local directory tree
pub struct OnnxModelLoader {
    models_dir: PathBuf,
}

impl OnnxModelLoader {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn preferred_device(&self) -> Device {
        Device::detect()
    }

    fn from_pretrained(
        &self,
        spec: &PretrainedSpec,
    ) -> Result<Box<dyn ReconstructionModel>, ModelError> {
        let dir = self.models_dir.join(&spec.identifier);
        let config_path = dir.join(&spec.config_name);
        if !config_path.exists() {
            return Err(ModelError::MissingFile(config_path));
        }

        let config: TripoConfig = serde_json::from_reader(BufReader::new(File::open(&config_path)?))?;
        let encoder_path = dir.join(&spec.weight_name);
        let decoder_path = dir.join(&config.decoder_name);

        Ok(Box::new(OnnxReconstructor {
            config,
            encoder_path,
            decoder_path,
            chunk_size: 8192,
            sessions: None,
        }))
    }
}

struct Sessions {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
}

pub struct OnnxReconstructor {
    config: TripoConfig,
    encoder_path: PathBuf,
    decoder_path: PathBuf,
    chunk_size: usize,
    /// Opened by `to_device`
    sessions: Option<Sessions>,
}

impl OnnxReconstructor {
    fn sessions(&self) -> Result<&Sessions, ModelError> {
        self.sessions
            .as_ref()
            .ok_or_else(|| ModelError::Runtime("model was not moved to a device".to_string()))
    }

    /// Query the decoder at `points`, `chunk_size` points per call
    ///
    /// `on_chunk` receives each chunk's densities and colors in order.
    fn query(
        &self,
        code: &ArrayViewD<'_, f32>,
        points: &[[f32; 3]],
        mut on_chunk: impl FnMut(&[f32], &[f32]),
    ) -> Result<(), ModelError> {
        let sessions = self.sessions()?;
        let mut decoder = sessions.decoder.lock();

        for chunk in points.chunks(self.chunk_size.max(1)) {
            let flat: Vec<f32> = chunk.iter().flatten().copied().collect();
            let chunk_points = Array2::from_shape_vec((chunk.len(), 3), flat)
                .map_err(|e| ModelError::UnexpectedOutput(e.to_string()))?;

            let code_tensor = TensorRef::from_array_view(code.view()).map_err(ModelError::runtime)?;
            let points_tensor = TensorRef::from_array_view(&chunk_points).map_err(ModelError::runtime)?;

            let outputs = decoder
                .run(ort::inputs![
                    self.config.decoder_code_input.as_str() => code_tensor,
                    self.config.decoder_points_input.as_str() => points_tensor
                ])
                .map_err(ModelError::runtime)?;

            let (_, density) = outputs[self.config.density_output.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(ModelError::runtime)?;
            let (_, color) = outputs[self.config.color_output.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(ModelError::runtime)?;

            if density.len() != chunk.len() || color.len() != chunk.len() * 3 {
                return Err(ModelError::UnexpectedOutput(format!(
                    "decoder returned {} densities and {} colors for {} points",
                    density.len(),
                    color.len(),
                    chunk.len()
                )));
            }

            on_chunk(density, color);
        }

        Ok(())
    }
}

/// Map a grid coordinate in `[0, resolution - 1]` to `[-radius, radius]`
fn grid_to_world(c: f32, resolution: u32, radius: f32) -> f32 {
    let span = (resolution.max(2) - 1) as f32;
    -radius + 2.0 * radius * c / span
}

/// Sample `threshold - density` on a `resolution`³ grid over `[-radius, radius]³`
///
/// `density` is called with at most `chunk_size` points at a time and must
/// return one value per point. The result is negative inside the surface,
/// as surface nets expects.
fn sample_sdf(
    resolution: u32,
    radius: f32,
    threshold: f32,
    chunk_size: usize,
    mut density: impl FnMut(&[[f32; 3]]) -> Result<Vec<f32>, ModelError>,
) -> Result<Vec<f32>, ModelError> {
    let shape = RuntimeShape::<u32, 3>::new([resolution; 3]);
    let total = shape.usize();
    let step = chunk_size.max(1);
    let mut sdf = Vec::with_capacity(total);

    let mut start = 0;
    while start < total {
        let end = (start + step).min(total);
        let points: Vec<[f32; 3]> = (start..end)
            .map(|i| shape.delinearize(i as u32).map(|c| grid_to_world(c as f32, resolution, radius)))
            .collect();

        let values = density(&points)?;
        if values.len() != points.len() {
            return Err(ModelError::UnexpectedOutput(format!(
                "{} densities for {} grid points",
                values.len(),
                points.len()
            )));
        }
        sdf.extend(values.iter().map(|d| threshold - d));
        start = end;
    }

    Ok(sdf)
}

/// Surface nets over a sampled grid, positions mapped back to world space
fn isosurface(sdf: &[f32], resolution: u32, radius: f32) -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
    let shape = RuntimeShape::<u32, 3>::new([resolution; 3]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(sdf, &shape, [0; 3], [resolution - 1; 3], &mut buffer);

    let vertices = buffer
        .positions
        .iter()
        .map(|p| p.map(|c| grid_to_world(c, resolution, radius)))
        .collect();
    let faces = buffer
        .indices
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect();

    (vertices, faces)
}

impl ReconstructionModel for OnnxReconstructor {
    fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    fn to_device(&mut self, device: Device) -> Result<(), ModelError> {
        let encoder = open_session(&self.encoder_path, device)?;
        let decoder = open_session(&self.decoder_path, device)?;
        self.sessions = Some(Sessions {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
        });
        Ok(())
    }

    fn infer(&self, images: &[ProcessedImage], device: Device) -> Result<SceneCodes, ModelError> {
        let sessions = self.sessions()?;
        let size = self.config.cond_image_size as usize;
        tracing::debug!("Encoding {} image(s) on {}", images.len(), device);

        let mut shape = Vec::new();
        let mut data = Vec::new();

        for image in images {
            if image.size() as usize != size {
                return Err(ModelError::UnexpectedOutput(format!(
                    "encoder expects {}x{} input, got {}x{}",
                    size,
                    size,
                    image.size(),
                    image.size()
                )));
            }

            let mut input = Array4::<f32>::zeros((1, 3, size, size));
            for (x, y, pixel) in image.pixels().enumerate_pixels() {
                for c in 0..3 {
                    input[[0, c, y as usize, x as usize]] = pixel[c];
                }
            }

            let tensor = TensorRef::from_array_view(&input).map_err(ModelError::runtime)?;
            let mut encoder = sessions.encoder.lock();
            let outputs = encoder
                .run(ort::inputs![self.config.encoder_input.as_str() => tensor])
                .map_err(ModelError::runtime)?;
            let (code_shape, code) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(ModelError::runtime)?;

            shape = code_shape.iter().map(|&d| d.max(0) as usize).collect();
            data.extend_from_slice(code);
        }

        if shape.is_empty() {
            return Err(ModelError::EmptyOutput);
        }
        shape[0] = images.len();
        SceneCodes::new(shape, data)
    }

    fn extract_mesh(
        &self,
        codes: &SceneCodes,
        has_vertex_color: bool,
        resolution: u32,
    ) -> Result<Vec<Mesh>, ModelError> {
        let resolution = resolution.max(2);
        let code_shape = codes.code_shape();
        let mut meshes = Vec::with_capacity(codes.len());

        for index in 0..codes.len() {
            let values = codes.code(index).ok_or(ModelError::EmptyOutput)?;
            let code = ArrayViewD::from_shape(IxDyn(&code_shape), values)
                .map_err(|e| ModelError::UnexpectedOutput(e.to_string()))?;

            let sdf = sample_sdf(
                resolution,
                self.config.radius,
                self.config.density_threshold,
                self.chunk_size,
                |points| {
                    let mut densities = Vec::with_capacity(points.len());
                    self.query(&code, points, |density, _| densities.extend_from_slice(density))?;
                    Ok(densities)
                },
            )?;

            let (vertices, faces) = isosurface(&sdf, resolution, self.config.radius);
            tracing::info!("Extracted {} vertices, {} triangles", vertices.len(), faces.len());

            let colors = if has_vertex_color && !vertices.is_empty() {
                let mut colors = Vec::with_capacity(vertices.len());
                self.query(&code, &vertices, |_, color| {
                    colors.extend(color.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));
                })?;
                Some(colors)
            } else {
                None
            };

            meshes.push(Mesh::new(vertices, faces, colors));
        }

        Ok(meshes)
    }
}
