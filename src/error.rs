/// Error types for every stage of a reconstruction run
///
/// Each stage reports its own variant so the UI can show a precise
/// status line. No stage retries; a failed run leaves the process usable.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a run, one variant per pipeline stage
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The user closed the file chooser without picking anything
    #[error("No image was selected")]
    AcquisitionCancelled,

    /// The chosen file could not be read or decoded
    #[error("Could not load image {}: {source}", path.display())]
    DecodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Model loading, background removal, inference or mesh extraction failed
    #[error("Reconstruction failed: {0}")]
    InferenceFailed(#[from] ModelError),

    /// Writing or copying an artifact failed
    #[error("Could not write {}: {source}", path.display())]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Encoding the processed image failed
    #[error("Could not encode {}: {source}", path.display())]
    PersistenceImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The exporter finished but no mesh file exists
    #[error("The 3D model was not generated: {} is missing", .0.display())]
    MeshMissing(PathBuf),
}

impl PipelineError {
    /// Wrap an I/O error with the path it concerns
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PersistenceFailed {
            path: path.into(),
            source,
        }
    }
}

/// Errors reading the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the external model collaborators
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("invalid model config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the inference runtime
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("the model returned no mesh")]
    EmptyOutput,
}

impl ModelError {
    /// Convert any runtime error into a `ModelError::Runtime`
    pub fn runtime(err: impl std::fmt::Display) -> Self {
        Self::Runtime(err.to_string())
    }
}

/// Errors raised while loading a mesh for viewing
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("could not read OBJ: {0}")]
    Load(#[from] tobj::LoadError),

    #[error("the OBJ file contains no triangles")]
    Empty,
}
