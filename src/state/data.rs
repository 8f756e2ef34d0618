/// Shared data structures for the application state
///
/// These types flow from the background worker to the UI thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::output::RunArtifacts;
use crate::preprocess::ProcessedImage;

/// Step a running worker is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    LoadingModel,
    Preprocessing,
    Generating,
    ExtractingMesh,
    Saving,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStage::LoadingModel => "Loading TripoSR model...",
            RunStage::Preprocessing => "Processing image...",
            RunStage::Generating => "Generating 3D model...",
            RunStage::ExtractingMesh => "Extracting 3D mesh...",
            RunStage::Saving => "Saving results...",
        };
        f.write_str(text)
    }
}

/// Message from the worker to the event loop
#[derive(Debug, Clone)]
pub enum RunEvent {
    Stage(RunStage),
    /// The model input is ready for display
    Preprocessed(Arc<ProcessedImage>),
    Succeeded(RunArtifacts),
    Failed(String),
}

/// What the UI knows about the worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    Idle,
    Running(RunStage),
    Succeeded(PathBuf),
    Failed(String),
}
