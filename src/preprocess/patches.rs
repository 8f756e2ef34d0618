/// Slicing the processed image into fixed-size tiles
///
/// Purely diagnostic: shows what the model's patch tokenizer will see.
/// Nothing here feeds back into the pipeline.

use image::RgbImage;

use super::ProcessedImage;

/// One tile of the processed image
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub row: u32,
    pub col: u32,
    pub pixels: RgbImage,
}

/// Split into non-overlapping `patch_size` tiles, row-major
///
/// Leftover pixels at the right and bottom edges are dropped.
pub fn slice_patches(image: &ProcessedImage, patch_size: u32) -> Vec<Patch> {
    if patch_size == 0 {
        return Vec::new();
    }

    let rgb = image.to_rgb8();
    let rows = rgb.height() / patch_size;
    let cols = rgb.width() / patch_size;

    let mut patches = Vec::with_capacity((rows * cols) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let pixels = image::imageops::crop_imm(
                &rgb,
                col * patch_size,
                row * patch_size,
                patch_size,
                patch_size,
            )
            .to_image();
            patches.push(Patch { row, col, pixels });
        }
    }

    patches
}

/// Number of (rows, columns) in the patch grid
pub fn grid_shape(image: &ProcessedImage, patch_size: u32) -> (u32, u32) {
    if patch_size == 0 {
        return (0, 0);
    }
    (image.size() / patch_size, image.size() / patch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_full_grid_of_16px_patches() {
        let image = ProcessedImage::from_rgb8(&RgbImage::new(512, 512));
        let patches = slice_patches(&image, 16);

        assert_eq!(patches.len(), 32 * 32);
        assert_eq!(grid_shape(&image, 16), (32, 32));
        assert!(patches.iter().all(|p| p.pixels.dimensions() == (16, 16)));
        assert_eq!((patches[33].row, patches[33].col), (1, 1));
    }

    #[test]
    fn test_patch_content_matches_source_region() {
        let source = RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8, y as u8, 0]));
        let patches = slice_patches(&ProcessedImage::from_rgb8(&source), 16);

        let bottom_right = &patches[3];
        assert_eq!(bottom_right.pixels.get_pixel(0, 0).0, [16, 16, 0]);
        assert_eq!(bottom_right.pixels.get_pixel(15, 15).0, [31, 31, 0]);
    }

    #[test]
    fn test_remainder_is_dropped() {
        let image = ProcessedImage::from_rgb8(&RgbImage::new(40, 40));
        assert_eq!(slice_patches(&image, 16).len(), 4);
        assert!(slice_patches(&image, 0).is_empty());
    }
}
