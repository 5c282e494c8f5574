//! Image preprocessing for the segmentation model
//!
//! Images are letterboxed: resized to fit the model input while keeping their
//! aspect ratio, centred on a white canvas, and normalised into an NCHW tensor.
//! The same [`Letterbox`] geometry maps the model output back onto the image.

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;
use serde::Deserialize;
use std::path::Path;

/// Input size used when `preprocessor_config.json` does not state one
pub const DEFAULT_TARGET_SIZE: u32 = 1024;

const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Model preprocessing parameters, normalised to the 0-1 pixel range
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Square model input edge in pixels
    pub target_size: u32,
    /// Per-channel mean
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            normalization_mean: [128.0 / 255.0; 3],
            normalization_std: [256.0 / 255.0; 3],
        }
    }
}

/// `preprocessor_config.json` as published with HuggingFace models
#[derive(Debug, Deserialize)]
struct HuggingFacePreprocessor {
    size: Option<HuggingFaceSize>,
    image_mean: Option<Vec<f32>>,
    image_std: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceSize {
    height: u32,
    width: u32,
}

impl PreprocessingConfig {
    /// Parse a HuggingFace `preprocessor_config.json` document
    ///
    /// Mean and standard deviation are published in the 0-255 range and are
    /// converted to the 0-1 range. Missing values fall back to the defaults.
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Non-square or zero input size
    /// - Mean/std arrays with fewer than three values, or a zero std
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: HuggingFacePreprocessor = serde_json::from_str(json).map_err(|e| {
            BgRemovalError::model(format!("Invalid preprocessor configuration: {e}"))
        })?;

        let defaults = Self::default();

        let target_size = match parsed.size {
            Some(size) if size.height != size.width => {
                return Err(BgRemovalError::model(format!(
                    "Unsupported non-square model input {}x{}",
                    size.width, size.height
                )));
            },
            Some(size) if size.width == 0 => {
                return Err(BgRemovalError::model("Model input size must be non-zero"));
            },
            Some(size) => size.width,
            None => defaults.target_size,
        };

        let normalization_mean = match parsed.image_mean {
            Some(values) => channels("image_mean", &values)?,
            None => defaults.normalization_mean,
        };
        let normalization_std = match parsed.image_std {
            Some(values) => channels("image_std", &values)?,
            None => defaults.normalization_std,
        };

        if normalization_std.iter().any(|std| *std == 0.0) {
            return Err(BgRemovalError::model("image_std values must be non-zero"));
        }

        Ok(Self {
            target_size,
            normalization_mean,
            normalization_std,
        })
    }

    /// Load `preprocessor_config.json` from a model folder
    ///
    /// # Errors
    /// See [`PreprocessingConfig::from_json`]; also fails when the file cannot be read
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join("preprocessor_config.json");
        let json = std::fs::read_to_string(&path).map_err(|e| {
            BgRemovalError::model(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

fn channels(field: &str, values: &[f32]) -> Result<[f32; 3]> {
    match values {
        [r, g, b, ..] => Ok([r / 255.0, g / 255.0, b / 255.0]),
        _ => Err(BgRemovalError::model(format!(
            "{field} must have at least 3 values"
        ))),
    }
}

/// Geometry of an aspect-preserving resize onto a square canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Canvas edge length
    pub target_size: u32,
    /// Scale applied to the original image
    pub scale: f32,
    /// Resized image width
    pub scaled_width: u32,
    /// Resized image height
    pub scaled_height: u32,
    /// Horizontal offset of the resized image on the canvas
    pub offset_x: u32,
    /// Vertical offset of the resized image on the canvas
    pub offset_y: u32,
}

impl Letterbox {
    /// Compute the letterbox for an image of `width` x `height`
    #[must_use]
    pub fn new(width: u32, height: u32, target_size: u32) -> Self {
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);

        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            target_size,
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        }
    }

    /// Canvas coordinate that an original image pixel lands on
    #[must_use]
    pub fn to_canvas(&self, x: u32, y: u32) -> (u32, u32) {
        let scaled_x = (x as f32 * self.scale).round() as u32;
        let scaled_y = (y as f32 * self.scale).round() as u32;
        (
            scaled_x.min(self.scaled_width - 1) + self.offset_x,
            scaled_y.min(self.scaled_height - 1) + self.offset_y,
        )
    }
}

/// Turns decoded images into model input tensors
#[derive(Debug)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalise an image into a `[1, 3, size, size]` tensor
    ///
    /// # Errors
    /// Returns an error for images with a zero dimension
    pub fn preprocess(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let rgb_image = image.to_rgb8();
        let (width, height) = rgb_image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgRemovalError::internal(format!(
                "Cannot process an image of {width}x{height} pixels"
            )));
        }

        let letterbox = Letterbox::new(width, height, config.target_size);

        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas: RgbImage = ImageBuffer::from_pixel(
            letterbox.target_size,
            letterbox.target_size,
            image::Rgb(PADDING_COLOR),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, config), letterbox))
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let size = config.target_size as usize;
        Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            let pixel = canvas.get_pixel(x as u32, y as u32);
            let value = f32::from(pixel.0.get(channel).copied().unwrap_or(0)) / 255.0;
            let mean = config.normalization_mean.get(channel).copied().unwrap_or(0.0);
            let std = config.normalization_std.get(channel).copied().unwrap_or(1.0);
            (value - mean) / std
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config() -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: 64,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn test_from_json_isnet_defaults() {
        let config = PreprocessingConfig::from_json(
            r#"{"size":{"height":1024,"width":1024},"image_mean":[128,128,128],"image_std":[256,256,256]}"#,
        )
        .unwrap();
        assert_eq!(config, PreprocessingConfig::default());
    }

    #[test]
    fn test_from_json_partial_and_invalid() {
        let config = PreprocessingConfig::from_json("{}").unwrap();
        assert_eq!(config.target_size, DEFAULT_TARGET_SIZE);

        assert!(PreprocessingConfig::from_json("not json").is_err());
        assert!(
            PreprocessingConfig::from_json(r#"{"size":{"height":512,"width":1024}}"#).is_err()
        );
        assert!(PreprocessingConfig::from_json(r#"{"image_mean":[1,2]}"#).is_err());
        assert!(PreprocessingConfig::from_json(r#"{"image_std":[0,1,1]}"#).is_err());
    }

    #[test]
    fn test_letterbox_geometry() {
        let wide = Letterbox::new(200, 100, 64);
        assert_eq!((wide.scaled_width, wide.scaled_height), (64, 32));
        assert_eq!((wide.offset_x, wide.offset_y), (0, 16));
        assert_eq!(wide.to_canvas(0, 0), (0, 16));
        assert_eq!(wide.to_canvas(199, 99), (63, 47));

        let tiny = Letterbox::new(1, 1000, 64);
        assert_eq!(tiny.scaled_width, 1);
        assert_eq!(tiny.offset_x, 31);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(100, 50, Rgb([0, 0, 0])));
        let (tensor, letterbox) = ImagePreprocessor::preprocess(&image, &small_config()).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(letterbox.offset_y, 16);
        // White padding above the image, black pixels inside it
        assert!((tensor[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 32, 32]] + 0.5).abs() < 1e-6);
    }
}
