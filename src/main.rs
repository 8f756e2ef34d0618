use iced::widget::image::Handle;
use iced::widget::{button, canvas, column, container, image, row, text, Column};
use iced::{Alignment, Element, Length, Task, Theme};
use std::path::PathBuf;
use std::sync::Arc;

use triposr_app::acquire;
use triposr_app::config::{self, AppConfig};
use triposr_app::mesh::Mesh;
use triposr_app::output::save_copy;
use triposr_app::preprocess::load_source;
use triposr_app::state::{RunEvent, Session};
use triposr_app::ui::viewer::load_mesh;
use triposr_app::ui::{image_handle, MeshViewer};
use triposr_app::Pipeline;

/// What the right-hand pane shows
enum Preview {
    Empty,
    Input(Handle),
    Processed(Handle),
    Mesh(MeshViewer),
}

/// Main application state
struct TripoApp {
    config: AppConfig,
    /// Shared with the worker thread
    pipeline: Arc<Pipeline>,
    session: Session,
    preview: Preview,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    /// User clicked "Select image"
    SelectImage,
    /// The chosen image was decoded for display
    ImageLoaded(PathBuf, Result<Handle, String>),
    /// User clicked "Process image"
    Process,
    /// Report from the worker
    Run(RunEvent),
    /// User clicked "View 3D model"
    ViewModel,
    MeshLoaded(Result<Mesh, String>),
    /// User clicked "Save 3D model"
    SaveModel,
    Saved(Result<PathBuf, String>),
}

impl TripoApp {
    fn new(config: AppConfig) -> (Self, Task<Message>) {
        let pipeline = Arc::new(Pipeline::from_config(&config));
        tracing::info!(
            "TripoSR app ready, models in {}, output in {}",
            config.models_dir.display(),
            pipeline.run_dir().path().display()
        );

        (
            TripoApp {
                config,
                pipeline,
                session: Session::new(),
                preview: Preview::Empty,
            },
            Task::none(),
        )
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::SelectImage => {
                if !self.session.controls().select {
                    return Task::none();
                }

                match acquire::pick_image() {
                    Ok(path) => {
                        return Task::perform(decode_preview(path.clone()), move |result| {
                            Message::ImageLoaded(path.clone(), result)
                        });
                    }
                    Err(e) => {
                        self.session.select(Err(e));
                    }
                }

                Task::none()
            }
            Message::ImageLoaded(path, Ok(handle)) => {
                // A run may have started while the preview was decoding
                if self.session.select(Ok(path)) {
                    self.preview = Preview::Input(handle);
                }
                Task::none()
            }
            Message::ImageLoaded(path, Err(message)) => {
                tracing::warn!("Could not decode {}: {}", path.display(), message);
                if self.session.selection_failed(&message) {
                    self.preview = Preview::Empty;
                }
                Task::none()
            }
            Message::Process => {
                let Some(source) = self.session.start_processing() else {
                    return Task::none();
                };

                let events = self.pipeline.clone().spawn(source);
                Task::run(events, Message::Run)
            }
            Message::Run(event) => {
                if let RunEvent::Preprocessed(processed) = &event {
                    self.preview = Preview::Processed(image_handle(processed.to_rgba8()));
                }
                self.session.apply(&event);
                Task::none()
            }
            Message::ViewModel => {
                if !self.session.controls().view {
                    return Task::none();
                }
                match self.session.mesh_path() {
                    Some(path) => Task::perform(load_mesh(path.to_path_buf()), Message::MeshLoaded),
                    None => Task::none(),
                }
            }
            Message::MeshLoaded(Ok(mesh)) => {
                self.preview = Preview::Mesh(MeshViewer::new(mesh));
                self.session.viewing();
                Task::none()
            }
            Message::MeshLoaded(Err(message)) => {
                tracing::error!("Could not load mesh: {}", message);
                self.session.view_failed(&message);
                Task::none()
            }
            Message::SaveModel => {
                if !self.session.controls().save {
                    return Task::none();
                }
                let (Some(mesh_path), Some(source)) = (self.session.mesh_path(), self.session.source()) else {
                    return Task::none();
                };
                let (mesh_path, source) = (mesh_path.to_path_buf(), source.to_path_buf());

                match acquire::pick_destination() {
                    Some(dest_dir) => Task::perform(save_copy(mesh_path, source, dest_dir), |result| {
                        Message::Saved(result.map_err(|e| e.to_string()))
                    }),
                    None => {
                        self.session.saved(None);
                        Task::none()
                    }
                }
            }
            Message::Saved(result) => {
                if let Err(message) = &result {
                    tracing::error!("Save failed: {}", message);
                }
                self.session.saved(Some(result));
                Task::none()
            }
        }
    }

    fn view(&self) -> Element<Message> {
        let controls = self.session.controls();

        let sidebar: Column<Message> = column![
            text("TripoSR").size(32),
            button("Select image")
                .on_press_maybe(controls.select.then_some(Message::SelectImage))
                .width(Length::Fill)
                .padding(10),
            button("Process image")
                .on_press_maybe(controls.process.then_some(Message::Process))
                .width(Length::Fill)
                .padding(10),
            button("View 3D model")
                .on_press_maybe(controls.view.then_some(Message::ViewModel))
                .width(Length::Fill)
                .padding(10),
            button("Save 3D model")
                .on_press_maybe(controls.save.then_some(Message::SaveModel))
                .width(Length::Fill)
                .padding(10),
            text(format!("Status: {}", self.session.status())).size(14),
        ]
        .spacing(12)
        .padding(20)
        .width(Length::Fixed(240.0));

        let [width, height] = self.config.viewer_resolution;
        let pane: Element<Message> = match &self.preview {
            Preview::Empty => text("No image selected").size(18).into(),
            Preview::Input(handle) => titled_image("Input image", handle),
            Preview::Processed(handle) => titled_image("Processed image", handle),
            Preview::Mesh(viewer) => column![
                text("3D model (drag to rotate, scroll to zoom)").size(18),
                canvas(viewer)
                    .width(Length::Fixed(width as f32))
                    .height(Length::Fixed(height as f32)),
            ]
            .spacing(10)
            .align_x(Alignment::Center)
            .into(),
        };

        row![
            sidebar,
            container(pane)
                .width(Length::Fill)
                .height(Length::Fill)
                .center_x(Length::Fill)
                .center_y(Length::Fill),
        ]
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn titled_image<'a>(title: &'a str, handle: &Handle) -> Element<'a, Message> {
    column![
        text(title).size(18),
        image(handle.clone()).width(Length::Fixed(512.0)).height(Length::Fixed(512.0)),
    ]
    .spacing(10)
    .align_x(Alignment::Center)
    .into()
}

/// Decode the chosen file off the UI thread
async fn decode_preview(path: PathBuf) -> Result<Handle, String> {
    let decoded = tokio::task::spawn_blocking(move || load_source(&path).map(|image| image_handle(image.to_rgba8())))
        .await
        .map_err(|e| e.to_string())?;

    decoded.map_err(|e| e.to_string())
}

fn main() -> iced::Result {
    let config = config::init();

    iced::application("TripoSR - 3D reconstruction", TripoApp::update, TripoApp::view)
        .theme(TripoApp::theme)
        .window_size((1200.0, 800.0))
        .centered()
        .run_with(move || TripoApp::new(config))
}
