/// Image preprocessing for the reconstruction model
///
/// This module turns an arbitrary photo into the square, gray-backed RGB
/// image the model expects:
/// - Background removal (background.rs)
/// - Foreground recentring and alpha compositing (foreground.rs)
/// - Diagnostic 16x16 patch slicing (patches.rs)
///
/// Every step after background removal is a pure function of its input.

pub mod background;
pub mod foreground;
pub mod patches;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, Rgb32FImage, RgbImage, RgbaImage};
use std::path::Path;

use crate::config::AppConfig;
use crate::error::PipelineError;
use background::{needs_background_removal, BackgroundRemover};

/// The model input: square, RGB, values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    pixels: Rgb32FImage,
}

impl ProcessedImage {
    /// Normalize an 8-bit image to [0, 1]
    pub fn from_rgb8(image: &RgbImage) -> Self {
        let pixels = Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            Rgb([r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])
        });
        Self { pixels }
    }

    /// Side length in pixels
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }

    pub fn pixels(&self) -> &Rgb32FImage {
        &self.pixels
    }

    /// Back to 8 bits per channel (what gets saved as `input.png`)
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.pixels.width(), self.pixels.height(), |x, y| {
            let Rgb(channels) = *self.pixels.get_pixel(x, y);
            Rgb(channels.map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8))
        })
    }

    /// RGBA bytes for display widgets
    pub fn to_rgba8(&self) -> RgbaImage {
        DynamicImage::ImageRgb8(self.to_rgb8()).to_rgba8()
    }
}

/// Load the user's image from disk
///
/// The format is guessed from the content, not the extension.
pub fn load_source(path: &Path) -> Result<DynamicImage, PipelineError> {
    let decode_failed = |source: image::ImageError| PipelineError::DecodeFailed {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .map_err(|e| decode_failed(image::ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| decode_failed(image::ImageError::IoError(e)))?
        .decode()
        .map_err(decode_failed)?;

    tracing::info!("Loaded {} ({}x{})", path.display(), image.width(), image.height());
    Ok(image)
}

/// Runs the full preprocessing chain with a fixed set of parameters
pub struct Preprocessor {
    remover: Box<dyn BackgroundRemover>,
    foreground_ratio: f32,
    image_size: u32,
    background_gray: f32,
}

impl Preprocessor {
    pub fn new(remover: Box<dyn BackgroundRemover>, config: &AppConfig) -> Self {
        Self {
            remover,
            foreground_ratio: config.foreground_ratio,
            image_size: config.image_size,
            background_gray: config.background_gray,
        }
    }

    /// Produce the model input for one source image
    pub fn run(&self, source: &DynamicImage) -> Result<ProcessedImage, PipelineError> {
        let cutout = if needs_background_removal(source) {
            self.remover.remove(source)?
        } else {
            tracing::info!("Image already has transparency, skipping background removal");
            source.to_rgba8()
        };

        let framed = foreground::resize_foreground(&cutout, self.foreground_ratio);
        let composited =
            foreground::composite_over_gray(&foreground::normalize(&framed), self.background_gray);

        let resized = imageops::resize(
            &foreground::quantize(&composited),
            self.image_size,
            self.image_size,
            FilterType::CatmullRom,
        );

        Ok(ProcessedImage::from_rgb8(&resized))
    }
}
