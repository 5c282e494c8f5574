//! In-process backend: ISNet segmentation run with Tract
//!
//! The model is fetched and loaded on the first request and then shared by
//! all later ones. Decoding, inference and encoding run on the blocking pool
//! so they never stall other requests' I/O.

use super::{BackgroundRemover, InputKind, RemovalRequest, RemovalResult};
use crate::cache::ModelCache;
use crate::config::{ModelVariant, ServerConfig};
use crate::download::ModelDownloader;
use crate::error::{BgRemovalError, Result};
use crate::inference::{apply_mask, encode_png, tensor_to_mask, SegmentationModel};
use crate::preprocessing::{ImagePreprocessor, PreprocessingConfig};
use crate::progress::{ComputeStage, ProgressReporter, ProgressUpdate};
use async_trait::async_trait;
use image::GenericImageView;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

/// Error classifications reported in the `name` field
pub mod error_names {
    pub const MODEL_LOAD: &str = "ModelLoadError";
    pub const FETCH: &str = "FetchError";
    pub const FILE_REFERENCE: &str = "FileReferenceError";
    pub const DECODE: &str = "DecodeError";
    pub const INFERENCE: &str = "InferenceError";
    pub const ENCODE: &str = "EncodeError";
}

/// Background removal with a locally executed ONNX model
pub struct LocalBackend {
    model_url: String,
    variant: ModelVariant,
    model_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    reporter: Arc<dyn ProgressReporter>,
    model: OnceCell<Arc<SegmentationModel>>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("model_url", &self.model_url)
            .field("variant", &self.variant)
            .field("model_dir", &self.model_dir)
            .field("loaded", &self.model.initialized())
            .finish_non_exhaustive()
    }
}

impl LocalBackend {
    /// Create the backend; nothing is fetched or loaded until the first request
    #[must_use]
    pub fn new(config: &ServerConfig, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            model_url: config.model_url.clone(),
            variant: config.model_variant,
            model_dir: config.model_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            reporter,
            model: OnceCell::new(),
        }
    }

    /// Selected model variant
    #[must_use]
    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    async fn model(&self) -> Result<Arc<SegmentationModel>> {
        self.model
            .get_or_try_init(|| self.load_model())
            .await
            .map(Arc::clone)
    }

    async fn load_model(&self) -> Result<Arc<SegmentationModel>> {
        let model_dir = match &self.model_dir {
            Some(dir) => {
                if !ModelCache::is_complete(dir, self.variant) {
                    return Err(BgRemovalError::removal(
                        error_names::MODEL_LOAD,
                        format!(
                            "Model folder '{}' is missing {} or its configuration files",
                            dir.display(),
                            self.variant.onnx_file()
                        ),
                        None,
                    ));
                }
                dir.clone()
            },
            None => self.fetch_model().await?,
        };

        let variant = self.variant;
        let started = Instant::now();
        let model = tokio::task::spawn_blocking(move || load_from_dir(&model_dir, variant))
            .await
            .map_err(|e| {
                BgRemovalError::removal(error_names::MODEL_LOAD, "Model loading aborted", Some(&e))
            })?
            .map_err(|e| {
                BgRemovalError::removal(error_names::MODEL_LOAD, "Failed to load model", Some(&e))
            })?;

        tracing::info!(
            variant = %self.variant,
            precision = self.variant.precision(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Segmentation model loaded"
        );

        Ok(Arc::new(model))
    }

    async fn fetch_model(&self) -> Result<PathBuf> {
        let fetch_error = |e: BgRemovalError| {
            BgRemovalError::removal(error_names::FETCH, "Failed to fetch model", Some(&e))
        };

        let cache = ModelCache::new(self.cache_dir.as_deref()).map_err(fetch_error)?;
        let downloader = ModelDownloader::new(cache).map_err(fetch_error)?;
        downloader
            .ensure_model(&self.model_url, self.variant, self.reporter.as_ref())
            .await
            .map_err(fetch_error)
    }
}

fn load_from_dir(model_dir: &Path, variant: ModelVariant) -> Result<SegmentationModel> {
    let preprocessing = PreprocessingConfig::load(model_dir)?;
    SegmentationModel::load(&model_dir.join(variant.onnx_file()), preprocessing)
}

/// Decode, segment and re-encode one staged image
fn compute(model: &SegmentationModel, path: &Path, reporter: &dyn ProgressReporter) -> Result<Vec<u8>> {
    reporter.report_progress(ProgressUpdate::compute(ComputeStage::Decode));
    let image = image::ImageReader::open(path)
        .and_then(image::ImageReader::with_guessed_format)
        .map_err(|e| {
            BgRemovalError::removal(error_names::DECODE, "Failed to read staged image", Some(&e))
        })?
        .decode()
        .map_err(|e| {
            BgRemovalError::removal(error_names::DECODE, "Failed to decode image", Some(&e))
        })?;
    let dimensions = image.dimensions();

    reporter.report_progress(ProgressUpdate::compute(ComputeStage::Preprocess));
    let (input, letterbox) =
        ImagePreprocessor::preprocess(&image, model.preprocessing()).map_err(|e| {
            BgRemovalError::removal(error_names::DECODE, "Failed to prepare image", Some(&e))
        })?;

    reporter.report_progress(ProgressUpdate::compute(ComputeStage::Inference));
    let output = model.infer(&input).map_err(|e| {
        BgRemovalError::removal(error_names::INFERENCE, "Model inference failed", Some(&e))
    })?;

    reporter.report_progress(ProgressUpdate::compute(ComputeStage::Mask));
    let mask = tensor_to_mask(&output, &letterbox, dimensions).map_err(|e| {
        BgRemovalError::removal(error_names::INFERENCE, "Unexpected model output", Some(&e))
    })?;
    let result = apply_mask(&image, &mask);

    reporter.report_progress(ProgressUpdate::compute(ComputeStage::Encode));
    encode_png(&result).map_err(|e| {
        BgRemovalError::removal(error_names::ENCODE, "Failed to encode result", Some(&e))
    })
}

#[async_trait]
impl BackgroundRemover for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn input_kind(&self) -> InputKind {
        InputKind::File
    }

    async fn remove(&self, request: RemovalRequest<'_>) -> Result<RemovalResult> {
        let reference = request.reference.ok_or_else(|| {
            BgRemovalError::removal(
                error_names::FILE_REFERENCE,
                "No staged file was provided",
                None,
            )
        })?;
        let path = reference.to_path().map_err(|e| {
            BgRemovalError::removal(
                error_names::FILE_REFERENCE,
                format!("Cannot open image reference {reference}"),
                Some(&e),
            )
        })?;

        let model = self.model().await?;
        let reporter = Arc::clone(&self.reporter);

        let started = Instant::now();
        let png = tokio::task::spawn_blocking(move || compute(&model, &path, reporter.as_ref()))
            .await
            .map_err(|e| {
                BgRemovalError::removal(error_names::INFERENCE, "Processing task failed", Some(&e))
            })??;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_size = png.len(),
            "Local background removal finished"
        );

        Ok(RemovalResult::new(png, Some("image/png".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Resolution;
    use crate::staging::ImageReference;
    use crate::upload::Upload;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn upload() -> Upload {
        Upload {
            bytes: Bytes::from_static(b"img"),
            filename: "cat.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    fn backend(model_dir: Option<PathBuf>) -> LocalBackend {
        let config = ServerConfig::builder().model_dir(model_dir).build().unwrap();
        LocalBackend::new(&config, Arc::new(crate::progress::NoOpProgressReporter))
    }

    #[tokio::test]
    async fn test_missing_reference_is_file_reference_error() {
        let backend = backend(None);
        let upload = upload();
        let err = backend
            .remove(RemovalRequest {
                upload: &upload,
                reference: None,
                resolution: Resolution::Preview,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FileReferenceError");
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_non_file_url_is_file_reference_error() {
        let backend = backend(None);
        let upload = upload();
        let reference = ImageReference::Url("https://example.com/cat.png".parse().unwrap());
        let err = backend
            .remove(RemovalRequest {
                upload: &upload,
                reference: Some(&reference),
                resolution: Resolution::Preview,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FileReferenceError");
    }

    #[tokio::test]
    async fn test_incomplete_model_dir_is_model_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(Some(temp_dir.path().to_path_buf()));
        let staged = temp_dir.path().join("cat.png");
        std::fs::write(&staged, b"img").unwrap();

        let upload = upload();
        let reference = ImageReference::Path(staged);
        let err = backend
            .remove(RemovalRequest {
                upload: &upload,
                reference: Some(&reference),
                resolution: Resolution::Full,
            })
            .await
            .unwrap_err();

        match err {
            BgRemovalError::Removal { name, message, .. } => {
                assert_eq!(name, "ModelLoadError");
                assert!(message.contains("onnx/model.onnx"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_model_is_model_load_error_with_cause() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("onnx")).unwrap();
        std::fs::write(temp_dir.path().join("config.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("preprocessor_config.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("onnx/model.onnx"), b"not an onnx graph").unwrap();

        let backend = backend(Some(temp_dir.path().to_path_buf()));
        let staged = temp_dir.path().join("cat.png");
        std::fs::write(&staged, b"img").unwrap();

        let upload = upload();
        let reference = ImageReference::Path(staged);
        let err = backend
            .remove(RemovalRequest {
                upload: &upload,
                reference: Some(&reference),
                resolution: Resolution::Preview,
            })
            .await
            .unwrap_err();

        match err {
            BgRemovalError::Removal { name, cause, .. } => {
                assert_eq!(name, "ModelLoadError");
                assert!(cause.is_some());
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
