use assert_matches::assert_matches;
use iced::futures::StreamExt;
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use triposr_app::acquire::validate_selection;
use triposr_app::config::{AppConfig, PretrainedSpec};
use triposr_app::error::{ModelError, PipelineError};
use triposr_app::mesh::Mesh;
use triposr_app::model::{Device, ModelLoader, ModelSlot, ReconstructionModel, SceneCodes};
use triposr_app::output::{save_copy, RunDirectory};
use triposr_app::preprocess::background::BackgroundRemover;
use triposr_app::preprocess::{Preprocessor, ProcessedImage};
use triposr_app::state::{RunEvent, RunStage};
use triposr_app::Pipeline;

#[derive(Default)]
struct Calls {
    loads: AtomicUsize,
    infers: AtomicUsize,
    fail_extraction: Mutex<bool>,
    empty_output: Mutex<bool>,
}

/// Keeps every pixel
struct OpaqueRemover;

impl BackgroundRemover for OpaqueRemover {
    fn remove(&self, image: &DynamicImage) -> Result<RgbaImage, ModelError> {
        Ok(image.to_rgba8())
    }
}

/// Produces one triangle per image, lifted by the number of earlier runs
struct TriangleModel {
    calls: Arc<Calls>,
}

impl ReconstructionModel for TriangleModel {
    fn set_chunk_size(&mut self, _chunk_size: usize) {}

    fn to_device(&mut self, _device: Device) -> Result<(), ModelError> {
        Ok(())
    }

    fn infer(&self, images: &[ProcessedImage], _device: Device) -> Result<SceneCodes, ModelError> {
        let run = self.calls.infers.fetch_add(1, Ordering::SeqCst) as f32;
        SceneCodes::new(vec![images.len(), 1], vec![run; images.len()])
    }

    fn extract_mesh(&self, codes: &SceneCodes, has_vertex_color: bool, resolution: u32) -> Result<Vec<Mesh>, ModelError> {
        assert!(has_vertex_color);
        assert_eq!(resolution, 256);

        if *self.calls.fail_extraction.lock().unwrap() {
            return Err(ModelError::Runtime("out of memory".to_string()));
        }
        if *self.calls.empty_output.lock().unwrap() {
            return Ok(Vec::new());
        }

        let z = codes.code(0).map(|code| code[0]).unwrap_or_default();
        Ok(vec![Mesh::new(
            vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]],
            vec![[0, 1, 2]],
            Some(vec![[0.5, 0.5, 0.5]; 3]),
        )])
    }
}

struct MockLoader {
    calls: Arc<Calls>,
}

impl ModelLoader for MockLoader {
    fn preferred_device(&self) -> Device {
        Device::Cpu
    }

    fn from_pretrained(&self, _spec: &PretrainedSpec) -> Result<Box<dyn ReconstructionModel>, ModelError> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TriangleModel {
            calls: self.calls.clone(),
        }))
    }
}

struct Fixture {
    root: PathBuf,
    calls: Arc<Calls>,
    pipeline: Arc<Pipeline>,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("triposr-app-it-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();

        let mut config = AppConfig::default();
        config.output_dir = root.join("output");

        let calls = Arc::new(Calls::default());
        let pipeline = Pipeline::new(
            Preprocessor::new(Box::new(OpaqueRemover), &config),
            ModelSlot::new(
                Box::new(MockLoader { calls: calls.clone() }),
                config.model.clone(),
                config.chunk_size,
            ),
            RunDirectory::new(config.run_dir()),
            &config,
        );

        Self {
            root,
            calls,
            pipeline: Arc::new(pipeline),
        }
    }

    fn source_image(&self, name: &str) -> PathBuf {
        let path = self.root.join(name);
        RgbImage::from_fn(120, 80, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 90]))
            .save(&path)
            .unwrap();
        path
    }

    fn run(&self, source: &Path) -> (Result<triposr_app::output::RunArtifacts, PipelineError>, Vec<RunEvent>) {
        let events = Mutex::new(Vec::new());
        let result = self.pipeline.run(source, |event| events.lock().unwrap().push(event));
        (result, events.into_inner().unwrap())
    }

    fn run_dir(&self) -> PathBuf {
        self.pipeline.run_dir().path().to_path_buf()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn stages(events: &[RunEvent]) -> Vec<RunStage> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Stage(stage) => Some(*stage),
            _ => None,
        })
        .collect()
}

fn slot_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_cancelled_selection_loads_nothing() {
    let fixture = Fixture::new("cancel");

    assert_matches!(validate_selection(None), Err(PipelineError::AcquisitionCancelled));

    assert!(!fixture.pipeline.models().is_loaded());
    assert_eq!(fixture.calls.loads.load(Ordering::SeqCst), 0);
    assert!(!fixture.run_dir().exists());
}

#[test]
fn test_run_commits_input_and_mesh() {
    let fixture = Fixture::new("commit");
    let source = fixture.source_image("cat.png");

    let (result, events) = fixture.run(&source);
    let artifacts = result.unwrap();

    assert_eq!(
        stages(&events),
        vec![
            RunStage::LoadingModel,
            RunStage::Preprocessing,
            RunStage::Generating,
            RunStage::ExtractingMesh,
            RunStage::Saving,
        ]
    );
    assert!(events.iter().any(|e| matches!(e, RunEvent::Preprocessed(image) if image.size() == 512)));

    assert_eq!(artifacts.mesh_path, fixture.run_dir().join("mesh.obj"));
    assert_eq!(slot_files(&fixture.run_dir()), vec!["input.png", "mesh.obj"]);

    let input = image::open(&artifacts.input_path).unwrap();
    assert_eq!((input.width(), input.height()), (512, 512));
}

#[test]
fn test_model_is_loaded_once_across_runs() {
    let fixture = Fixture::new("lazy");
    let source = fixture.source_image("cat.png");

    fixture.run(&source).0.unwrap();
    let (result, events) = fixture.run(&source);
    result.unwrap();

    assert_eq!(fixture.calls.loads.load(Ordering::SeqCst), 1);
    assert!(!stages(&events).contains(&RunStage::LoadingModel));
}

#[test]
fn test_second_run_replaces_the_first() {
    let fixture = Fixture::new("replace");
    let source = fixture.source_image("cat.png");

    fixture.run(&source).0.unwrap();
    let artifacts = fixture.run(&source).0.unwrap();

    let mesh = Mesh::load_obj(&artifacts.mesh_path).unwrap();
    assert!(mesh.vertices.iter().all(|v| v[2] == 1.0));
    assert_eq!(slot_files(&fixture.run_dir()), vec!["input.png", "mesh.obj"]);
}

#[test]
fn test_failed_run_keeps_previous_artifacts() {
    let fixture = Fixture::new("failure");
    let source = fixture.source_image("cat.png");

    let artifacts = fixture.run(&source).0.unwrap();
    let before = fs::read(&artifacts.mesh_path).unwrap();

    *fixture.calls.fail_extraction.lock().unwrap() = true;
    let (result, _) = fixture.run(&source);

    assert_matches!(result, Err(PipelineError::InferenceFailed(ModelError::Runtime(_))));
    assert_eq!(fs::read(&artifacts.mesh_path).unwrap(), before);
    assert_eq!(slot_files(&fixture.run_dir()), vec!["input.png", "mesh.obj"]);
}

#[test]
fn test_empty_model_output_is_an_inference_failure() {
    let fixture = Fixture::new("empty");
    let source = fixture.source_image("cat.png");
    *fixture.calls.empty_output.lock().unwrap() = true;

    let (result, _) = fixture.run(&source);

    assert_matches!(result, Err(PipelineError::InferenceFailed(ModelError::EmptyOutput)));
    assert!(!fixture.run_dir().exists());
}

#[test]
fn test_undecodable_image_fails_before_output() {
    let fixture = Fixture::new("decode");
    let source = fixture.root.join("broken.png");
    fs::write(&source, b"not an image").unwrap();

    let (result, _) = fixture.run(&source);

    assert_matches!(result, Err(PipelineError::DecodeFailed { .. }));
    assert!(!fixture.run_dir().exists());
}

#[tokio::test]
async fn test_worker_reports_through_the_channel() {
    let fixture = Fixture::new("worker");
    let source = fixture.source_image("cat.png");

    let events: Vec<RunEvent> = fixture.pipeline.clone().spawn(source).collect().await;

    assert_matches!(events.first(), Some(RunEvent::Stage(RunStage::LoadingModel)));
    assert_matches!(events.last(), Some(RunEvent::Succeeded(artifacts)) if artifacts.mesh_path.exists());
}

#[tokio::test]
async fn test_worker_reports_failure_as_text() {
    let fixture = Fixture::new("worker-failure");
    *fixture.calls.fail_extraction.lock().unwrap() = true;
    let image = Arc::new(ProcessedImage::from_rgb8(&RgbImage::new(512, 512)));

    let events: Vec<RunEvent> = fixture.pipeline.clone().spawn_finish(image).collect().await;

    assert_matches!(events.last(), Some(RunEvent::Failed(message)) if message.contains("out of memory"));
}

#[tokio::test]
async fn test_save_copy_after_a_run() {
    let fixture = Fixture::new("save");
    let source = fixture.source_image("cat.png");
    let artifacts = fixture.run(&source).0.unwrap();

    let dest = fixture.root.join("D");
    fs::create_dir_all(&dest).unwrap();

    let copied = save_copy(artifacts.mesh_path.clone(), source, dest.clone()).await.unwrap();

    assert_eq!(copied, dest.join("cat_modelo3D.obj"));
    assert_eq!(fs::read(&copied).unwrap(), fs::read(&artifacts.mesh_path).unwrap());
}
