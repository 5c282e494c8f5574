//! Configuration types for the background removal service
//!
//! A [`ServerConfig`] is built once at startup and shared read-only between
//! requests. Nothing in it changes while the process runs.

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ceiling for uploaded images (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default remote background removal endpoint
pub const DEFAULT_REMOTE_URL: &str = "https://api.remove.bg/v1.0/removebg";

/// Default model repository for the in-process backend
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Which background removal strategy the server is wired with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process ONNX model
    Local,
    /// Third-party HTTP API
    Remote,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Remote
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(BgRemovalError::configuration(format!(
                "Unknown backend '{other}'. Valid backends: local, remote"
            ))),
        }
    }
}

/// Model size selector for the in-process backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Half precision weights, faster to fetch
    Small,
    /// Full precision weights
    Medium,
}

impl ModelVariant {
    /// ONNX file inside the model repository that backs this variant
    #[must_use]
    pub fn onnx_file(self) -> &'static str {
        match self {
            Self::Small => "onnx/model_fp16.onnx",
            Self::Medium => "onnx/model.onnx",
        }
    }

    /// Precision label used in logs
    #[must_use]
    pub fn precision(self) -> &'static str {
        match self {
            Self::Small => "fp16",
            Self::Medium => "fp32",
        }
    }
}

impl Default for ModelVariant {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
        }
    }
}

impl std::str::FromStr for ModelVariant {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "small" | "fp16" => Ok(Self::Small),
            "medium" | "fp32" => Ok(Self::Medium),
            other => Err(BgRemovalError::configuration(format!(
                "Unknown model variant '{other}'. Valid variants: small, medium"
            ))),
        }
    }
}

/// How a staged upload is handed to the in-process backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileReferenceStyle {
    /// Plain filesystem path
    #[default]
    Path,
    /// `file://` URL
    Url,
}

/// Process-wide configuration, immutable after startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Active backend
    pub backend: BackendKind,

    /// Credential for the remote API (absence only fails processing requests)
    pub api_key: Option<String>,

    /// Remote API endpoint
    pub remote_url: String,

    /// Model variant for the in-process backend
    pub model_variant: ModelVariant,

    /// Model repository fetched on first use
    pub model_url: String,

    /// Pre-fetched model folder; skips downloading when set
    pub model_dir: Option<PathBuf>,

    /// Model cache directory override
    pub cache_dir: Option<PathBuf>,

    /// Directory that receives staged uploads
    pub scratch_dir: PathBuf,

    /// Staged file reference handed to the in-process backend
    pub file_reference: FileReferenceStyle,

    /// Upload size ceiling in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            backend: BackendKind::default(),
            api_key: None,
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            model_variant: ModelVariant::default(),
            model_url: DEFAULT_MODEL_URL.to_string(),
            model_dir: None,
            cache_dir: None,
            scratch_dir: std::env::temp_dir(),
            file_reference: FileReferenceStyle::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Create a builder for server configuration
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Socket address string the server binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The API key, if one is configured and not blank
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Validate the configuration
    ///
    /// A missing API key is not checked here. The server still starts and
    /// answers `GET /`; processing requests report it.
    ///
    /// # Errors
    /// - Upload ceiling of zero
    /// - Unparseable remote endpoint
    /// - Unsupported model repository URL
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(BgRemovalError::configuration(
                "Maximum upload size must be greater than zero",
            ));
        }

        reqwest::Url::parse(&self.remote_url).map_err(|e| {
            BgRemovalError::configuration(format!(
                "Invalid remote API URL '{}': {}",
                self.remote_url, e
            ))
        })?;

        if self.model_dir.is_none() {
            crate::download::validate_model_url(&self.model_url)?;
        }

        Ok(())
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a builder starting from defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.config.api_key = api_key;
        self
    }

    #[must_use]
    pub fn remote_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.remote_url = url.into();
        self
    }

    #[must_use]
    pub fn model_variant(mut self, variant: ModelVariant) -> Self {
        self.config.model_variant = variant;
        self
    }

    #[must_use]
    pub fn model_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.model_url = url.into();
        self
    }

    #[must_use]
    pub fn model_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.model_dir = dir;
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.cache_dir = dir;
        self
    }

    #[must_use]
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    #[must_use]
    pub fn file_reference(mut self, style: FileReferenceStyle) -> Self {
        self.config.file_reference = style;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    /// See [`ServerConfig::validate`]
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.backend, BackendKind::Remote);
        assert_eq!(config.model_variant, ModelVariant::Medium);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.api_key().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ServerConfig::builder()
            .host("127.0.0.1")
            .port(8080)
            .backend(BackendKind::Local)
            .model_variant(ModelVariant::Small)
            .file_reference(FileReferenceStyle::Url)
            .max_upload_bytes(1024)
            .build()
            .unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.model_variant.onnx_file(), "onnx/model_fp16.onnx");
        assert_eq!(config.file_reference, FileReferenceStyle::Url);
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let config = ServerConfig::builder()
            .api_key(Some("   ".to_string()))
            .build()
            .unwrap();
        assert!(config.api_key().is_none());

        let config = ServerConfig::builder()
            .api_key(Some("secret".to_string()))
            .build()
            .unwrap();
        assert_eq!(config.api_key(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServerConfig::builder().max_upload_bytes(0).build().is_err());
        assert!(ServerConfig::builder().remote_url("not a url").build().is_err());
        assert!(ServerConfig::builder()
            .model_url("https://github.com/user/repo")
            .build()
            .is_err());

        // A local model folder makes the repository URL irrelevant
        assert!(ServerConfig::builder()
            .model_url("https://github.com/user/repo")
            .model_dir(Some(PathBuf::from("/models/isnet")))
            .build()
            .is_ok());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("LOCAL".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert!("cloud".parse::<BackendKind>().is_err());

        assert_eq!("small".parse::<ModelVariant>().unwrap(), ModelVariant::Small);
        assert_eq!("fp32".parse::<ModelVariant>().unwrap(), ModelVariant::Medium);
        assert!("large".parse::<ModelVariant>().is_err());
        assert_eq!(ModelVariant::Small.to_string(), "small");
    }
}
