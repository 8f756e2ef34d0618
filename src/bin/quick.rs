/// One-shot reconstruction
///
/// Picks an image at launch, preprocesses it, shows its patches and
/// reconstructs it on demand. The mesh opens in the same window.

use iced::widget::image::Handle;
use iced::widget::{button, canvas, column, container, row, text};
use iced::{Alignment, Element, Length, Task, Theme};
use std::path::PathBuf;
use std::sync::Arc;

use triposr_app::acquire;
use triposr_app::config::{self, AppConfig};
use triposr_app::error::PipelineError;
use triposr_app::mesh::Mesh;
use triposr_app::preprocess::ProcessedImage;
use triposr_app::state::RunEvent;
use triposr_app::ui::patch_grid::{patch_grid, patch_handles};
use triposr_app::ui::viewer::load_mesh;
use triposr_app::ui::MeshViewer;
use triposr_app::Pipeline;

/// Patches are drawn larger than their pixel size
const PATCH_SCALE: f32 = 1.25;

struct QuickApp {
    config: AppConfig,
    pipeline: Arc<Pipeline>,
    processed: Arc<ProcessedImage>,
    patches: Vec<Handle>,
    generating: bool,
    status: String,
    viewer: Option<MeshViewer>,
}

#[derive(Debug, Clone)]
enum Message {
    Generate,
    Run(RunEvent),
    MeshLoaded(Result<Mesh, String>),
}

impl QuickApp {
    fn new(config: AppConfig, pipeline: Arc<Pipeline>, processed: Arc<ProcessedImage>) -> (Self, Task<Message>) {
        let patches = patch_handles(&processed, config.patch_size);
        tracing::info!("Sliced the processed image into {} patches", patches.len());

        (
            QuickApp {
                config,
                pipeline,
                processed,
                patches,
                generating: false,
                status: "Ready to generate".to_string(),
                viewer: None,
            },
            Task::none(),
        )
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Generate => {
                if self.generating {
                    return Task::none();
                }
                self.generating = true;
                self.viewer = None;

                let events = self.pipeline.clone().spawn_finish(self.processed.clone());
                Task::run(events, Message::Run)
            }
            Message::Run(RunEvent::Stage(stage)) => {
                self.status = stage.to_string();
                Task::none()
            }
            Message::Run(RunEvent::Preprocessed(_)) => Task::none(),
            Message::Run(RunEvent::Succeeded(artifacts)) => {
                self.status = format!("Mesh saved to {}", artifacts.mesh_path.display());
                Task::perform(load_mesh(artifacts.mesh_path), Message::MeshLoaded)
            }
            Message::Run(RunEvent::Failed(message)) => {
                self.generating = false;
                self.status = format!("Error: {}", message);
                Task::none()
            }
            Message::MeshLoaded(result) => {
                self.generating = false;
                match result {
                    Ok(mesh) => self.viewer = Some(MeshViewer::new(mesh)),
                    Err(message) => {
                        tracing::error!("Could not load mesh: {}", message);
                        self.status = format!("The 3D model was not generated: {}", message);
                    }
                }
                Task::none()
            }
        }
    }

    fn view(&self) -> Element<Message> {
        let grid = patch_grid(&self.patches, &self.processed, self.config.patch_size, PATCH_SCALE);

        let [width, height] = self.config.viewer_resolution;
        let model: Element<Message> = match &self.viewer {
            Some(viewer) => canvas(viewer)
                .width(Length::Fixed(width as f32))
                .height(Length::Fixed(height as f32))
                .into(),
            None => container(text("No 3D model yet"))
                .width(Length::Fixed(width as f32))
                .height(Length::Fixed(height as f32))
                .center_x(Length::Fixed(width as f32))
                .center_y(Length::Fixed(height as f32))
                .into(),
        };

        let side = column![
            button("Generate 3D model")
                .on_press_maybe((!self.generating).then_some(Message::Generate))
                .padding(10),
            text(&self.status).size(14),
            model,
        ]
        .spacing(12)
        .align_x(Alignment::Center);

        row![grid, side].spacing(24).padding(20).into()
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

/// Preprocess the picked image before any window opens
fn prepare(pipeline: &Pipeline, picked: Result<PathBuf, PipelineError>) -> Result<Arc<ProcessedImage>, PipelineError> {
    let source = picked?;
    pipeline.preprocess(&source).map(Arc::new)
}

/// Cancelling the chooser is not a failure
fn exit_code(error: &PipelineError) -> i32 {
    match error {
        PipelineError::AcquisitionCancelled => 0,
        _ => 1,
    }
}

fn main() -> iced::Result {
    let config = config::init();

    let pipeline = Arc::new(Pipeline::from_config(&config));
    let processed = match prepare(&pipeline, acquire::pick_image()) {
        Ok(processed) => processed,
        Err(e) => {
            println!("{}", e);
            let code = exit_code(&e);
            if code != 0 {
                tracing::error!("Preprocessing failed: {}", e);
                std::process::exit(code);
            }
            return Ok(());
        }
    };

    iced::application("TripoSR - quick run", QuickApp::update, QuickApp::view)
        .theme(QuickApp::theme)
        .window_size((1500.0, 850.0))
        .centered()
        .run_with(move || QuickApp::new(config, pipeline, processed))
}
