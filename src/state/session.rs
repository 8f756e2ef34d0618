/// Desktop app state machine
///
/// ```text
/// NoImage -> ImageSelected -> Processing -> Ready
///                 ^               |           |
///                 +--- failure ---+           |
///                 +------ new image ----------+
/// ```
///
/// The session only tracks paths and flags. Decoded images and the viewer
/// live in the app, which asks the session what is allowed.

use std::path::{Path, PathBuf};

use super::data::{RunEvent, RunStatus};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    NoImage,
    ImageSelected,
    Processing,
    Ready,
}

/// Which buttons accept input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls {
    pub select: bool,
    pub process: bool,
    pub view: bool,
    pub save: bool,
}

impl Controls {
    pub fn for_state(state: AppState) -> Self {
        match state {
            AppState::NoImage => Self {
                select: true,
                ..Self::default()
            },
            AppState::ImageSelected => Self {
                select: true,
                process: true,
                ..Self::default()
            },
            AppState::Processing => Self::default(),
            AppState::Ready => Self {
                select: true,
                process: true,
                view: true,
                save: true,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    state: AppState,
    source: Option<PathBuf>,
    mesh_path: Option<PathBuf>,
    run: RunStatus,
    status: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: AppState::NoImage,
            source: None,
            mesh_path: None,
            run: RunStatus::Idle,
            status: "Waiting for an image...".to_string(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn controls(&self) -> Controls {
        Controls::for_state(self.state)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn run_status(&self) -> &RunStatus {
        &self.run
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The committed mesh, only while `Ready`
    pub fn mesh_path(&self) -> Option<&Path> {
        self.mesh_path.as_deref()
    }

    /// Outcome of the image chooser plus decoding
    ///
    /// A cancelled chooser changes nothing but the status text. Returns
    /// whether the chosen path is now the session's source.
    pub fn select(&mut self, outcome: Result<PathBuf, PipelineError>) -> bool {
        if !self.controls().select {
            return false;
        }

        match outcome {
            Ok(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                self.status = format!("Image selected: {}", name);
                self.source = Some(path);
                self.mesh_path = None;
                self.run = RunStatus::Idle;
                self.state = AppState::ImageSelected;
                true
            }
            Err(PipelineError::AcquisitionCancelled) => {
                self.status = PipelineError::AcquisitionCancelled.to_string();
                false
            }
            Err(e) => {
                self.selection_failed(&e.to_string());
                false
            }
        }
    }

    /// The chosen file could not be decoded
    ///
    /// Returns whether the session dropped its source.
    pub fn selection_failed(&mut self, message: &str) -> bool {
        if !self.controls().select {
            return false;
        }

        self.status = format!("Error loading image: {}", message);
        self.source = None;
        self.mesh_path = None;
        self.run = RunStatus::Idle;
        self.state = AppState::NoImage;
        true
    }

    /// Enter `Processing` and return the image to process
    ///
    /// Returns `None` when processing is not allowed right now.
    pub fn start_processing(&mut self) -> Option<PathBuf> {
        if !self.controls().process {
            return None;
        }
        let source = self.source.clone()?;

        self.mesh_path = None;
        self.state = AppState::Processing;
        self.status = "Starting...".to_string();
        Some(source)
    }

    /// Apply a report from the worker
    pub fn apply(&mut self, event: &RunEvent) {
        if self.state != AppState::Processing {
            return;
        }

        match event {
            RunEvent::Stage(stage) => {
                self.run = RunStatus::Running(*stage);
                self.status = stage.to_string();
            }
            RunEvent::Preprocessed(_) => {}
            RunEvent::Succeeded(artifacts) => {
                self.run = RunStatus::Succeeded(artifacts.mesh_path.clone());
                self.mesh_path = Some(artifacts.mesh_path.clone());
                self.status = "3D model generated successfully!".to_string();
                self.state = AppState::Ready;
            }
            RunEvent::Failed(message) => {
                self.run = RunStatus::Failed(message.clone());
                self.status = format!("Error: {}", message);
                self.state = AppState::ImageSelected;
            }
        }
    }

    pub fn viewing(&mut self) {
        self.status = "Showing the 3D model".to_string();
    }

    pub fn view_failed(&mut self, message: &str) {
        self.status = format!("Could not show the 3D model: {}", message);
    }

    /// Outcome of "save copy"; `None` means the folder chooser was closed
    pub fn saved(&mut self, outcome: Option<Result<PathBuf, String>>) {
        self.status = match outcome {
            Some(Ok(path)) => format!("Model saved to: {}", path.display()),
            Some(Err(message)) => format!("Error saving: {}", message),
            None => "No folder selected".to_string(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RunArtifacts;
    use crate::state::data::RunStage;
    use assert_matches::assert_matches;

    fn selected() -> Session {
        let mut session = Session::new();
        session.select(Ok(PathBuf::from("/photos/cat.png")));
        session
    }

    fn succeeded() -> RunEvent {
        RunEvent::Succeeded(RunArtifacts {
            input_path: PathBuf::from("output/0/input.png"),
            mesh_path: PathBuf::from("output/0/mesh.obj"),
        })
    }

    #[test]
    fn test_starts_with_only_select_enabled() {
        let session = Session::new();
        assert_eq!(session.state(), AppState::NoImage);
        assert_eq!(
            session.controls(),
            Controls {
                select: true,
                ..Controls::default()
            }
        );
    }

    #[test]
    fn test_selecting_enables_processing() {
        let session = selected();
        assert_eq!(session.state(), AppState::ImageSelected);
        assert!(session.controls().process);
        assert!(!session.controls().view);
        assert_eq!(session.status(), "Image selected: cat.png");
    }

    #[test]
    fn test_cancelled_selection_keeps_state() {
        let mut session = selected();
        session.select(Err(PipelineError::AcquisitionCancelled));

        assert_eq!(session.state(), AppState::ImageSelected);
        assert_eq!(session.source(), Some(Path::new("/photos/cat.png")));
        assert_eq!(session.status(), "No image was selected");
    }

    #[test]
    fn test_undecodable_selection_resets() {
        let mut session = selected();
        session.select(Err(PipelineError::DecodeFailed {
            path: PathBuf::from("broken.png"),
            source: image::ImageError::IoError(std::io::Error::other("bad header")),
        }));

        assert_eq!(session.state(), AppState::NoImage);
        assert!(session.source().is_none());
        assert!(!session.controls().process);
    }

    #[test]
    fn test_processing_disables_everything() {
        let mut session = selected();
        assert_eq!(session.start_processing(), Some(PathBuf::from("/photos/cat.png")));

        assert_eq!(session.state(), AppState::Processing);
        assert_eq!(session.controls(), Controls::default());
        assert_eq!(session.start_processing(), None);

        session.select(Ok(PathBuf::from("dog.png")));
        assert_eq!(session.source(), Some(Path::new("/photos/cat.png")));
    }

    #[test]
    fn test_no_processing_without_image() {
        let mut session = Session::new();
        assert_eq!(session.start_processing(), None);
        assert_eq!(session.state(), AppState::NoImage);
    }

    #[test]
    fn test_stage_reports_update_status() {
        let mut session = selected();
        session.start_processing();
        session.apply(&RunEvent::Stage(RunStage::ExtractingMesh));

        assert_eq!(session.status(), "Extracting 3D mesh...");
        assert_eq!(session.run_status(), &RunStatus::Running(RunStage::ExtractingMesh));
    }

    #[test]
    fn test_success_enables_view_and_save() {
        let mut session = selected();
        session.start_processing();
        session.apply(&succeeded());

        assert_eq!(session.state(), AppState::Ready);
        assert_eq!(
            session.controls(),
            Controls {
                select: true,
                process: true,
                view: true,
                save: true,
            }
        );
        assert_eq!(session.mesh_path(), Some(Path::new("output/0/mesh.obj")));
        assert_eq!(session.status(), "3D model generated successfully!");
    }

    #[test]
    fn test_failure_returns_to_image_selected() {
        let mut session = selected();
        session.start_processing();
        session.apply(&RunEvent::Failed("out of memory".to_string()));

        assert_eq!(session.state(), AppState::ImageSelected);
        let controls = session.controls();
        assert!(controls.select && controls.process);
        assert!(!controls.view && !controls.save);
        assert!(session.mesh_path().is_none());
        assert_matches!(session.run_status(), RunStatus::Failed(m) if m == "out of memory");
        assert_eq!(session.status(), "Error: out of memory");
    }

    #[test]
    fn test_new_image_drops_mesh() {
        let mut session = selected();
        session.start_processing();
        session.apply(&succeeded());

        session.select(Ok(PathBuf::from("dog.jpg")));

        assert_eq!(session.state(), AppState::ImageSelected);
        assert!(session.mesh_path().is_none());
        assert!(!session.controls().save);
    }

    #[test]
    fn test_late_selection_during_a_run_is_ignored() {
        let mut session = selected();
        session.start_processing();

        assert!(!session.select(Ok(PathBuf::from("/photos/dog.png"))));
        assert!(!session.selection_failed("bad header"));

        assert_eq!(session.state(), AppState::Processing);
        assert_eq!(session.source(), Some(Path::new("/photos/cat.png")));
    }

    #[test]
    fn test_reports_after_the_run_are_ignored() {
        let mut session = selected();
        session.apply(&succeeded());
        assert_eq!(session.state(), AppState::ImageSelected);
    }

    #[test]
    fn test_save_status() {
        let mut session = Session::new();
        session.saved(Some(Ok(PathBuf::from("D/cat_modelo3D.obj"))));
        assert_eq!(session.status(), "Model saved to: D/cat_modelo3D.obj");

        session.saved(None);
        assert_eq!(session.status(), "No folder selected");
    }
}
