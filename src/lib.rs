//! Single-image 3D reconstruction with TripoSR
//!
//! A photo goes through background removal and recentring, the
//! reconstruction model turns it into a coloured mesh, and the result is
//! written to a single run slot on disk.

pub mod acquire;
pub mod config;
pub mod error;
pub mod mesh;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod state;
pub mod ui;

pub use config::AppConfig;
pub use error::{ConfigError, MeshError, ModelError, PipelineError};
pub use mesh::Mesh;
pub use pipeline::Pipeline;
