//! Background removal backends
//!
//! Every backend implements [`BackgroundRemover`], so the HTTP layer is the
//! same whichever one is wired in at startup:
//! - [`LocalBackend`]: in-process ISNet model run with Tract, fed a staged file
//! - [`RemoteBackend`]: third-party HTTP API, fed the uploaded bytes
//! - [`MockBackend`]: scripted outcomes for tests

pub mod local;
pub mod mock;
pub mod remote;

pub use self::local::LocalBackend;
pub use self::mock::{MockBackend, MockInvocation};
pub use self::remote::RemoteBackend;

use crate::config::{BackendKind, ServerConfig};
use crate::error::Result;
use crate::progress::TracingProgressReporter;
use crate::staging::ImageReference;
use crate::upload::Upload;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Content type reported when a backend does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// What a backend needs to receive for each request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The uploaded bytes are enough
    Bytes,
    /// The upload must be staged and handed over as a file reference
    File,
}

/// Output quality tier, only honoured by the remote backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Fast, low resolution preview
    #[default]
    Preview,
    /// Full resolution
    Full,
}

impl Resolution {
    /// Map the `resolution` query parameter; anything but `full` is a preview
    #[must_use]
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("full") => Self::Full,
            _ => Self::Preview,
        }
    }

    /// Value of the remote API `size` field for this tier
    #[must_use]
    pub fn remote_size(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Full => "auto",
        }
    }
}

/// One background removal call
#[derive(Debug, Clone, Copy)]
pub struct RemovalRequest<'a> {
    /// Validated upload
    pub upload: &'a Upload,
    /// Staged copy of the upload, present for [`InputKind::File`] backends
    pub reference: Option<&'a ImageReference>,
    /// Requested quality tier
    pub resolution: Resolution,
}

/// Processed image returned by a backend
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// Encoded image
    pub bytes: Bytes,
    /// Declared content type, if the backend supplied one
    pub content_type: Option<String>,
}

impl RemovalResult {
    #[must_use]
    pub fn new<B: Into<Bytes>>(bytes: B, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    /// Declared content type, falling back to PNG
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Capability shared by all backends: remove the background from one image
///
/// Implementations make exactly one external call per request and never retry.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Whether requests must be staged to disk first
    fn input_kind(&self) -> InputKind;

    /// Remove the background
    ///
    /// # Errors
    /// Backend specific; see the implementations
    async fn remove(&self, request: RemovalRequest<'_>) -> Result<RemovalResult>;
}

/// Build the backend selected by the configuration
///
/// # Errors
/// Returns an error when the backend's HTTP client cannot be created
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn BackgroundRemover>> {
    let remover: Arc<dyn BackgroundRemover> = match config.backend {
        BackendKind::Local => Arc::new(LocalBackend::new(
            config,
            Arc::new(TracingProgressReporter),
        )),
        BackendKind::Remote => Arc::new(RemoteBackend::new(config)?),
    };

    tracing::info!(backend = remover.name(), "Background removal backend ready");
    Ok(remover)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_from_query() {
        assert_eq!(Resolution::from_query(Some("full")), Resolution::Full);
        assert_eq!(Resolution::from_query(None), Resolution::Preview);
        assert_eq!(Resolution::from_query(Some("preview")), Resolution::Preview);
        assert_eq!(Resolution::from_query(Some("FULL")), Resolution::Preview);
        assert_eq!(Resolution::from_query(Some("")), Resolution::Preview);

        assert_eq!(Resolution::Preview.remote_size(), "preview");
        assert_eq!(Resolution::Full.remote_size(), "auto");
    }

    #[test]
    fn test_result_content_type_fallback() {
        assert_eq!(RemovalResult::new(vec![1], None).content_type(), "image/png");
        assert_eq!(
            RemovalResult::new(vec![1], Some(" ".to_string())).content_type(),
            "image/png"
        );
        assert_eq!(
            RemovalResult::new(vec![1], Some("image/webp".to_string())).content_type(),
            "image/webp"
        );
    }

    #[test]
    fn test_from_config_selects_backend() {
        let remote = from_config(&ServerConfig::default()).unwrap();
        assert_eq!(remote.name(), "remote");
        assert_eq!(remote.input_kind(), InputKind::Bytes);

        let config = ServerConfig::builder()
            .backend(BackendKind::Local)
            .build()
            .unwrap();
        let local = from_config(&config).unwrap();
        assert_eq!(local.name(), "local");
        assert_eq!(local.input_kind(), InputKind::File);
    }
}
