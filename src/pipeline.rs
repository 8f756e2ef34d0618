/// End-to-end reconstruction run
///
/// A run is: load the model (first time only), preprocess the source
/// image, infer scene codes, extract the mesh and commit both artifacts
/// to the run slot. Each step reports a `RunStage` before it starts.
///
/// The desktop app hands a run to a named worker thread with `spawn`; the
/// worker talks back through an unbounded channel that the event loop
/// drains as a stream.

use iced::futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::config::AppConfig;
use crate::error::{ModelError, PipelineError};
use crate::mesh::Mesh;
use crate::model::onnx::OnnxModelLoader;
use crate::model::ModelSlot;
use crate::output::{RunArtifacts, RunDirectory};
use crate::preprocess::background::U2NetRemover;
use crate::preprocess::{load_source, Preprocessor, ProcessedImage};
use crate::state::data::{RunEvent, RunStage};

const WORKER_NAME: &str = "triposr-worker";

pub struct Pipeline {
    preprocessor: Preprocessor,
    models: ModelSlot,
    run_dir: RunDirectory,
    has_vertex_color: bool,
    mc_resolution: u32,
}

impl Pipeline {
    pub fn new(preprocessor: Preprocessor, models: ModelSlot, run_dir: RunDirectory, config: &AppConfig) -> Self {
        Self {
            preprocessor,
            models,
            run_dir,
            has_vertex_color: config.has_vertex_color,
            mc_resolution: config.mc_resolution,
        }
    }

    /// The production pipeline: ONNX models from `models_dir`
    ///
    /// Nothing is loaded here.
    pub fn from_config(config: &AppConfig) -> Self {
        let remover = U2NetRemover::new(config.background_model_path());
        let loader = OnnxModelLoader::new(&config.models_dir);

        Self::new(
            Preprocessor::new(Box::new(remover), config),
            ModelSlot::new(Box::new(loader), config.model.clone(), config.chunk_size),
            RunDirectory::new(config.run_dir()),
            config,
        )
    }

    pub fn run_dir(&self) -> &RunDirectory {
        &self.run_dir
    }

    pub fn models(&self) -> &ModelSlot {
        &self.models
    }

    /// Decode and preprocess one image
    pub fn preprocess(&self, source: &Path) -> Result<ProcessedImage, PipelineError> {
        let image = load_source(source)?;
        self.preprocessor.run(&image)
    }

    /// Run the model on a processed image and return the first mesh
    pub fn reconstruct(&self, image: &ProcessedImage, report: impl Fn(RunEvent)) -> Result<Mesh, PipelineError> {
        if !self.models.is_loaded() {
            report(RunEvent::Stage(RunStage::LoadingModel));
        }
        let loaded = self.models.get_or_load()?;

        report(RunEvent::Stage(RunStage::Generating));
        let codes = loaded.model.infer(std::slice::from_ref(image), loaded.device)?;

        report(RunEvent::Stage(RunStage::ExtractingMesh));
        let mesh = loaded
            .model
            .extract_mesh(&codes, self.has_vertex_color, self.mc_resolution)?
            .into_iter()
            .next()
            .ok_or(ModelError::EmptyOutput)?;

        tracing::info!(
            "Extracted mesh with {} vertices and {} faces",
            mesh.vertices.len(),
            mesh.faces.len()
        );
        Ok(mesh)
    }

    /// The full run for a source image on disk
    ///
    /// The model is loaded before the image is touched, so the status shows
    /// the long first load up front.
    pub fn run(&self, source: &Path, report: impl Fn(RunEvent)) -> Result<RunArtifacts, PipelineError> {
        if !self.models.is_loaded() {
            report(RunEvent::Stage(RunStage::LoadingModel));
            self.models.get_or_load()?;
        }

        report(RunEvent::Stage(RunStage::Preprocessing));
        let image = Arc::new(self.preprocess(source)?);
        report(RunEvent::Preprocessed(image.clone()));

        self.finish(&image, report)
    }

    /// Reconstruct and commit an already processed image
    pub fn finish(&self, image: &ProcessedImage, report: impl Fn(RunEvent)) -> Result<RunArtifacts, PipelineError> {
        let mesh = self.reconstruct(image, &report)?;

        report(RunEvent::Stage(RunStage::Saving));
        self.run_dir.commit(image, &mesh)
    }

    /// Start a full run on a worker thread
    pub fn spawn(self: Arc<Self>, source: PathBuf) -> UnboundedReceiver<RunEvent> {
        tracing::info!("Processing {}", source.display());
        self.spawn_worker(move |pipeline, report| pipeline.run(&source, report))
    }

    /// Start reconstruction of an image preprocessed earlier
    pub fn spawn_finish(self: Arc<Self>, image: Arc<ProcessedImage>) -> UnboundedReceiver<RunEvent> {
        self.spawn_worker(move |pipeline, report| pipeline.finish(&image, report))
    }

    /// The worker is detached; the channel closes when it returns
    fn spawn_worker<F>(self: Arc<Self>, job: F) -> UnboundedReceiver<RunEvent>
    where
        F: FnOnce(&Pipeline, &dyn Fn(RunEvent)) -> Result<RunArtifacts, PipelineError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded();
        let failed = sender.clone();

        let spawned = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let report = |event: RunEvent| send(&sender, event);
                match job(&self, &report) {
                    Ok(artifacts) => {
                        tracing::info!("Run finished: {}", artifacts.mesh_path.display());
                        report(RunEvent::Succeeded(artifacts));
                    }
                    Err(e) => {
                        tracing::error!("Run failed: {}", e);
                        report(RunEvent::Failed(e.to_string()));
                    }
                }
            });

        if let Err(e) = spawned {
            tracing::error!("Could not start worker: {}", e);
            send(&failed, RunEvent::Failed(format!("Could not start worker: {}", e)));
        }

        receiver
    }
}

/// The receiver may be gone when the window closed mid-run
fn send(sender: &UnboundedSender<RunEvent>, event: RunEvent) {
    let _ = sender.unbounded_send(event);
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("models", &self.models)
            .field("run_dir", &self.run_dir)
            .finish_non_exhaustive()
    }
}
