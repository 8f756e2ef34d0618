/// Application configuration
///
/// Every tunable of the pipeline lives here. The values are read once at
/// startup from a JSON file in the user's config directory:
/// - Linux: ~/.config/triposr-app/config.json
/// - macOS: ~/Library/Application Support/triposr-app/config.json
/// - Windows: %APPDATA%\triposr-app\config.json
///
/// A missing file means defaults. Missing keys fall back to their default
/// individually.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_DIR: &str = "triposr-app";
const CONFIG_FILE: &str = "config.json";

/// Which pretrained model to load and from which files
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PretrainedSpec {
    /// Model identifier, also the subdirectory under `models_dir`
    pub identifier: String,
    /// Model config file inside the model directory
    pub config_name: String,
    /// Encoder weights inside the model directory
    pub weight_name: String,
}

impl Default for PretrainedSpec {
    fn default() -> Self {
        Self {
            identifier: "stabilityai/TripoSR".to_string(),
            config_name: "config.json".to_string(),
            weight_name: "model.onnx".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    // ========== Output ==========

    /// Root of the run output
    pub output_dir: PathBuf,
    /// Single run slot under `output_dir`, overwritten by every run
    pub run_slot: String,

    // ========== Models ==========

    /// Directory holding the ONNX models
    pub models_dir: PathBuf,
    pub model: PretrainedSpec,
    /// Background removal network inside `models_dir`
    pub background_model: String,
    /// Points per decoder query
    pub chunk_size: usize,

    // ========== Preprocessing ==========

    /// Fraction of the frame side covered by the foreground
    pub foreground_ratio: f32,
    /// Square input size of the reconstruction model
    pub image_size: u32,
    /// Gray level behind transparent pixels
    pub background_gray: f32,

    // ========== Mesh ==========

    /// Grid resolution of the isosurface extraction
    pub mc_resolution: u32,
    pub has_vertex_color: bool,

    // ========== Presentation ==========

    /// Side of the diagnostic tiles
    pub patch_size: u32,
    /// Viewer size in logical pixels
    pub viewer_resolution: [u32; 2],
    /// Fallback filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            run_slot: "0".to_string(),
            models_dir: default_models_dir(),
            model: PretrainedSpec::default(),
            background_model: "u2net.onnx".to_string(),
            chunk_size: 8192,
            foreground_ratio: 0.85,
            image_size: 512,
            background_gray: 0.5,
            mc_resolution: 256,
            has_vertex_color: true,
            patch_size: 16,
            viewer_resolution: [800, 600],
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the config from the user's config directory, or defaults
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load the config from an explicit path
    ///
    /// A missing file means defaults. An unreadable or malformed file is an
    /// error so the caller can report it once logging is up.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::from_json(&json).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Directory of the run slot, e.g. `output/0`
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.run_slot)
    }

    /// Path to the background removal network
    pub fn background_model_path(&self) -> PathBuf {
        self.models_dir.join(&self.background_model)
    }
}

/// Get the path where the config file is expected
fn config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir().or_else(dirs::home_dir)?;
    path.push(APP_DIR);
    path.push(CONFIG_FILE);
    Some(path)
}

/// Models live next to the user's data, not in the working directory
fn default_models_dir() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    path.push(APP_DIR);
    path.push("models");
    path
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // A second init (e.g. from tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Load the config and install logging at its level
///
/// Problems with the config file are logged after the subscriber exists;
/// the app then starts on defaults.
pub fn init() -> AppConfig {
    init_from(config_path().as_deref())
}

fn init_from(path: Option<&Path>) -> AppConfig {
    let loaded = match path {
        Some(path) => AppConfig::load_from(path),
        None => Ok(AppConfig::default()),
    };
    let config = loaded.as_ref().cloned().unwrap_or_default();

    init_logging(&config.log_level);

    match (loaded, path) {
        (Err(e), _) => tracing::warn!("{}, using defaults", e),
        (Ok(_), Some(path)) if path.exists() => tracing::info!("Loaded config from {}", path.display()),
        _ => {}
    }
    config
}
