//! Segmentation model execution with Tract (pure Rust ONNX runtime)
//!
//! A [`SegmentationModel`] is loaded once and then shared read-only; running it
//! takes `&self`, so concurrent requests can use the same instance.

use crate::error::{BgRemovalError, Result};
use crate::preprocessing::{Letterbox, PreprocessingConfig};
use image::{DynamicImage, GrayImage, ImageBuffer, RgbaImage};
use ndarray::Array4;
use std::io::Cursor;
use std::path::Path;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Runnable ONNX segmentation model plus its preprocessing parameters
pub struct SegmentationModel {
    model: TractModel,
    preprocessing: PreprocessingConfig,
}

impl std::fmt::Debug for SegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationModel")
            .field("preprocessing", &self.preprocessing)
            .finish_non_exhaustive()
    }
}

impl SegmentationModel {
    /// Load, optimise and make runnable the ONNX file at `onnx_path`
    ///
    /// The input fact is pinned to `[1, 3, size, size]` so Tract can optimise
    /// a fully static graph.
    ///
    /// # Errors
    /// - The ONNX file cannot be read or parsed
    /// - Graph optimisation fails
    pub fn load(onnx_path: &Path, preprocessing: PreprocessingConfig) -> Result<Self> {
        let model_data = std::fs::read(onnx_path).map_err(|e| {
            BgRemovalError::model(format!(
                "Failed to read model '{}': {}",
                onnx_path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %onnx_path.display(),
            size = %crate::cache::format_size(model_data.len() as u64),
            "Loading segmentation model"
        );

        let size = preprocessing.target_size as usize;
        let model = onnx()
            .model_for_read(&mut Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .map_err(|e| BgRemovalError::model(format!("Failed to set model input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create runnable model: {e}"))
            })?;

        Ok(Self {
            model,
            preprocessing,
        })
    }

    /// Preprocessing parameters the model expects
    #[must_use]
    pub fn preprocessing(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    /// Run the model on a preprocessed `[1, 3, H, W]` tensor
    ///
    /// # Errors
    /// - Inference fails inside Tract
    /// - The output is not a 4D `f32` tensor
    pub fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let shape = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(&shape, &data)
            .map_err(|e| BgRemovalError::internal(format!("Failed to build input tensor: {e}")))?;

        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::internal(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::internal("No output tensor found"))?;

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::internal(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape().to_vec();
        let &[batch, channels, height, width] = output_shape.as_slice() else {
            return Err(BgRemovalError::internal(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        Array4::from_shape_vec(
            (batch, channels, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::internal(format!("Failed to reshape output tensor: {e}")))
    }
}

/// Map a `[1, 1, H, W]` model output back onto the original image as an 8-bit mask
///
/// # Errors
/// Returns an error when the tensor does not have a single batch and channel
pub fn tensor_to_mask(
    tensor: &Array4<f32>,
    letterbox: &Letterbox,
    original_dimensions: (u32, u32),
) -> Result<GrayImage> {
    let shape = tensor.shape();
    if shape.first() != Some(&1) || shape.get(1) != Some(&1) {
        return Err(BgRemovalError::internal(format!(
            "Invalid output tensor shape {shape:?}"
        )));
    }

    let mask_height = shape.get(2).copied().unwrap_or(0);
    let mask_width = shape.get(3).copied().unwrap_or(0);
    let (width, height) = original_dimensions;

    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let (canvas_x, canvas_y) = letterbox.to_canvas(x, y);
        let (canvas_x, canvas_y) = (canvas_x as usize, canvas_y as usize);
        let value = if canvas_x < mask_width && canvas_y < mask_height {
            tensor
                .get([0, 0, canvas_y, canvas_x])
                .copied()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        image::Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
    }))
}

/// Use the mask as the alpha channel; fully transparent pixels are zeroed
#[must_use]
pub fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let rgba_image = image.to_rgba8();
    let (width, height) = rgba_image.dimensions();

    ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = rgba_image.get_pixel(x, y);
        let alpha = mask.get_pixel_checked(x, y).map_or(0, |m| m.0[0]);
        if alpha > 0 {
            image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    })
}

/// Encode an RGBA image as PNG
///
/// # Errors
/// Returns an error when PNG encoding fails
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| BgRemovalError::internal(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer.into_inner())
}
