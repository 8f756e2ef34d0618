use iced::widget::image::Handle;
use iced::widget::{column, container, image, text};
use iced::{Element, Length};
use iced_aw::Wrap;

use crate::preprocess::patches::{grid_shape, slice_patches};
use super::image_handle;
use crate::preprocess::ProcessedImage;

/// Display handles for every patch of the image, row-major
pub fn patch_handles(processed: &ProcessedImage, patch_size: u32) -> Vec<Handle> {
    slice_patches(processed, patch_size)
        .into_iter()
        .map(|patch| image_handle(::image::DynamicImage::ImageRgb8(patch.pixels).to_rgba8()))
        .collect()
}

/// The tiles wrapped into a grid `cols` wide, shown at `scale` times their size
pub fn patch_grid<'a, Message: 'a>(
    handles: &[Handle],
    processed: &ProcessedImage,
    patch_size: u32,
    scale: f32,
) -> Element<'a, Message> {
    let (rows, cols) = grid_shape(processed, patch_size);
    let tile = patch_size as f32 * scale;

    let tiles: Vec<Element<'a, Message>> = handles
        .iter()
        .map(|handle| {
            image(handle.clone())
                .width(Length::Fixed(tile))
                .height(Length::Fixed(tile))
                .into()
        })
        .collect();

    // The fixed width makes the grid wrap after `cols` tiles
    let grid = container(Wrap::with_elements(tiles)).width(Length::Fixed(cols as f32 * tile));

    column![
        text(format!("{} patches of {}x{} ({} x {})", handles.len(), patch_size, patch_size, rows, cols)).size(14),
        grid,
    ]
    .spacing(10)
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{Rgb, RgbImage};

    #[test]
    fn test_one_handle_per_tile() {
        let processed = ProcessedImage::from_rgb8(&RgbImage::from_pixel(64, 64, Rgb([10, 20, 30])));
        assert_eq!(patch_handles(&processed, 16).len(), 16);
    }
}
