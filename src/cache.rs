//! Model cache for the in-process backend
//!
//! Fetched model repositories live in an XDG-compliant cache directory, one
//! folder per repository, laid out the way HuggingFace serves them:
//! `config.json`, `preprocessor_config.json` and `onnx/*.onnx`.

use crate::config::ModelVariant;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Files every cached model folder must contain besides the ONNX weights
pub const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the cache, creating its directory if needed
    ///
    /// Uses `custom_dir/models` when given, otherwise the user cache
    /// directory (`~/.cache/bgremove-server/models` on Linux).
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new(custom_dir: Option<&Path>) -> Result<Self> {
        let cache_dir = match custom_dir {
            Some(dir) => dir.join("models"),
            None => dirs::cache_dir()
                .ok_or_else(|| {
                    BgRemovalError::configuration(
                        "Failed to determine cache directory. Set BGREMOVE_CACHE_DIR.",
                    )
                })?
                .join("bgremove-server")
                .join("models"),
        };

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::model(format!(
                    "Failed to create cache directory '{}': {}",
                    cache_dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self { cache_dir })
    }

    /// Generate a filesystem-safe model ID from a repository URL
    ///
    /// ```
    /// use bgremove_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    /// Whether a complete copy of the model variant is cached
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str, variant: ModelVariant) -> bool {
        Self::is_complete(&self.get_model_path(model_id), variant)
    }

    /// Whether a model folder holds the configuration files and the variant's weights
    #[must_use]
    pub fn is_complete(model_path: &Path, variant: ModelVariant) -> bool {
        REQUIRED_FILES
            .iter()
            .all(|file| model_path.join(file).is_file())
            && model_path.join(variant.onnx_file()).is_file()
    }

    /// Path of a cached model folder (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Cache directory in use
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
