/// Background removal
///
/// The remover is a black box returning an RGBA cut-out. The default one
/// runs a U²-Net ONNX session loaded on first use.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgba, RgbaImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::PathBuf;

use crate::error::ModelError;
use crate::model::onnx::open_session;
use crate::model::Device;

/// U²-Net input resolution
const U2NET_SIZE: u32 = 320;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turns an image into an RGBA cut-out of its main subject
pub trait BackgroundRemover: Send + Sync {
    fn remove(&self, image: &DynamicImage) -> Result<RgbaImage, ModelError>;
}

/// Only RGBA images that already carry transparency are used as they are
///
/// Gray+alpha sources go through removal like any other mode.
pub fn needs_background_removal(image: &DynamicImage) -> bool {
    let is_rgba = matches!(
        image,
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_)
    );
    if !is_rgba {
        return true;
    }
    image.pixels().all(|(_, _, pixel)| pixel[3] == 255)
}

/// U²-Net salient object segmentation
pub struct U2NetRemover {
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
}

impl U2NetRemover {
    /// Nothing is loaded until the first `remove`
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            session: Mutex::new(None),
        }
    }

    /// Foreground probability per pixel at U²-Net resolution
    fn predict_mask(&self, image: &DynamicImage) -> Result<GrayImage, ModelError> {
        let small = imageops::resize(&image.to_rgb8(), U2NET_SIZE, U2NET_SIZE, FilterType::Lanczos3);
        let max = small.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

        let size = U2NET_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in small.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / max - MEAN[c]) / STD[c];
            }
        }

        let mut guard = self.session.lock();
        if guard.is_none() {
            if !self.model_path.exists() {
                return Err(ModelError::MissingFile(self.model_path.clone()));
            }
            tracing::info!("Loading background removal model from {}", self.model_path.display());
            *guard = Some(open_session(&self.model_path, Device::detect())?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ModelError::Runtime("background session unavailable".to_string()));
        };

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input.1".into());
        let tensor = TensorRef::from_array_view(&input).map_err(ModelError::runtime)?;
        let outputs = session
            .run(ort::inputs![input_name => tensor])
            .map_err(ModelError::runtime)?;
        let (_, prediction) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(ModelError::runtime)?;

        let plane = prediction.get(..size * size).ok_or_else(|| {
            ModelError::UnexpectedOutput(format!(
                "expected a {}x{} mask, got {} values",
                size,
                size,
                prediction.len()
            ))
        })?;

        Ok(mask_from_prediction(plane, U2NET_SIZE))
    }
}

impl BackgroundRemover for U2NetRemover {
    fn remove(&self, image: &DynamicImage) -> Result<RgbaImage, ModelError> {
        let mask = self.predict_mask(image)?;
        let (width, height) = image.dimensions();
        let mask = imageops::resize(&mask, width, height, FilterType::Lanczos3);
        Ok(cutout(&image.to_rgba8(), &mask))
    }
}

/// Min-max normalize a raw prediction plane into an 8-bit mask
fn mask_from_prediction(plane: &[f32], side: u32) -> GrayImage {
    let (min, max) = plane
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = (max - min).max(1e-6);

    GrayImage::from_fn(side, side, |x, y| {
        let v = plane[(y * side + x) as usize];
        Luma([(((v - min) / range) * 255.0).clamp(0.0, 255.0) as u8])
    })
}

/// Blend the image over a transparent background through the mask
fn cutout(image: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let m = mask.get_pixel(x, y)[0] as f32 / 255.0;
        let Rgba(channels) = *image.get_pixel(x, y);
        Rgba(channels.map(|c| (c as f32 * m).round() as u8))
    })
}
