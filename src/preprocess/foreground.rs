/// Foreground framing and alpha compositing
///
/// These steps run after background removal. Compositing over gray is
/// lossy: the alpha channel is gone afterwards.

use image::imageops;
use image::{Rgb, Rgb32FImage, RgbImage, Rgba, Rgba32FImage, RgbaImage};

/// Smallest accepted foreground ratio, keeps the canvas size bounded
const MIN_FOREGROUND_RATIO: f32 = 0.05;

/// Bounding box (x0, y0, x1, y1) of the non-transparent pixels, inclusive
pub fn alpha_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
}

/// Center the foreground on a transparent square canvas
///
/// The foreground is first padded to a square of its longest side, then
/// that square is padded so it spans `ratio` of the canvas side. A fully
/// transparent image keeps its whole frame as the foreground.
pub fn resize_foreground(image: &RgbaImage, ratio: f32) -> RgbaImage {
    let (x0, y0, x1, y1) = alpha_bounds(image).unwrap_or_else(|| {
        tracing::warn!("No foreground found, using the whole frame");
        (0, 0, image.width().saturating_sub(1), image.height().saturating_sub(1))
    });

    let fg_width = x1 - x0 + 1;
    let fg_height = y1 - y0 + 1;
    let foreground = imageops::crop_imm(image, x0, y0, fg_width, fg_height).to_image();

    let size = fg_width.max(fg_height);
    let ratio = ratio.clamp(MIN_FOREGROUND_RATIO, 1.0);
    let new_size = ((size as f32 / ratio) as u32).max(size);

    let offset_x = (size - fg_width) / 2 + (new_size - size) / 2;
    let offset_y = (size - fg_height) / 2 + (new_size - size) / 2;

    let mut canvas = RgbaImage::new(new_size, new_size);
    imageops::replace(&mut canvas, &foreground, offset_x as i64, offset_y as i64);
    canvas
}

/// 8-bit RGBA to float [0, 1]
pub fn normalize(image: &RgbaImage) -> Rgba32FImage {
    Rgba32FImage::from_fn(image.width(), image.height(), |x, y| {
        Rgba(image.get_pixel(x, y).0.map(|v| v as f32 / 255.0))
    })
}

/// `rgb * alpha + gray * (1 - alpha)`
pub fn composite_over_gray(image: &Rgba32FImage, gray: f32) -> Rgb32FImage {
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        Rgb([r * a + gray * (1.0 - a), g * a + gray * (1.0 - a), b * a + gray * (1.0 - a)])
    })
}

/// Treat an RGB image as fully opaque RGBA
pub fn opaque(image: &Rgb32FImage) -> Rgba32FImage {
    Rgba32FImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Rgba([r, g, b, 1.0])
    })
}

/// Float [0, 1] to 8 bits, truncating like a plain integer cast
pub fn quantize(image: &Rgb32FImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        Rgb(image.get_pixel(x, y).0.map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8))
    })
}
