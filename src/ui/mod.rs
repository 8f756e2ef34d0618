/// Widgets shared by both binaries
///
/// - `patch_grid.rs` - the processed image cut into tiles
/// - `viewer.rs` - the interactive mesh canvas
/// - `camera.rs` - orbit camera math for the viewer

pub mod camera;
pub mod patch_grid;
pub mod viewer;

use iced::widget::image::Handle;
use image::RgbaImage;

pub use viewer::MeshViewer;

/// Upload-ready handle for a decoded image
pub fn image_handle(image: RgbaImage) -> Handle {
    Handle::from_rgba(image.width(), image.height(), image.into_raw())
}
