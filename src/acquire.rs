/// Native file and folder choosers

use rfd::FileDialog;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Raster formats accepted by the image chooser
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Show the modal image chooser
///
/// Returns `AcquisitionCancelled` when the dialog is closed without a choice.
pub fn pick_image() -> Result<PathBuf, PipelineError> {
    let picked = FileDialog::new()
        .set_title("Select an image")
        .add_filter("Images", &IMAGE_EXTENSIONS)
        .pick_file();

    validate_selection(picked)
}

/// Show the folder chooser used by "save copy"
pub fn pick_destination() -> Option<PathBuf> {
    FileDialog::new()
        .set_title("Select the folder to save the 3D model")
        .pick_folder()
}

/// Turn a raw dialog result into an existing file path
pub fn validate_selection(picked: Option<PathBuf>) -> Result<PathBuf, PipelineError> {
    let path = picked.ok_or(PipelineError::AcquisitionCancelled)?;

    if !path.is_file() {
        return Err(PipelineError::DecodeFailed {
            source: image::ImageError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "file does not exist",
            )),
            path,
        });
    }

    if !has_image_extension(&path) {
        return Err(PipelineError::DecodeFailed {
            source: image::ImageError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only png, jpg and jpeg images are supported",
            )),
            path,
        });
    }

    Ok(path)
}

/// Check the extension against the chooser filter (case-insensitive)
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
