//! Mock backend implementation for testing
//!
//! Returns a scripted outcome and records every invocation, including whether
//! the staged file it was handed actually existed at that moment.

use super::{BackgroundRemover, InputKind, RemovalRequest, RemovalResult, Resolution};
use crate::error::{BgRemovalError, Result};
use crate::staging::ImageReference;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type ErrorFactory = Arc<dyn Fn() -> BgRemovalError + Send + Sync>;

#[derive(Clone)]
enum Outcome {
    Succeed {
        bytes: Bytes,
        content_type: Option<String>,
    },
    Fail(ErrorFactory),
    Panic,
}

/// What the mock saw on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInvocation {
    /// Staged path, when a reference was passed
    pub staged_path: Option<PathBuf>,
    /// Whether that path existed during the call
    pub staged_file_existed: bool,
    /// Upload size in bytes
    pub upload_size: usize,
    /// Requested tier
    pub resolution: Resolution,
}

/// Scriptable backend for tests
#[derive(Clone)]
pub struct MockBackend {
    input_kind: InputKind,
    outcome: Outcome,
    invocations: Arc<Mutex<Vec<MockInvocation>>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("input_kind", &self.input_kind)
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl MockBackend {
    /// Succeed with the given bytes and declared content type
    #[must_use]
    pub fn succeeding<B: Into<Bytes>>(
        input_kind: InputKind,
        bytes: B,
        content_type: Option<&str>,
    ) -> Self {
        Self::with_outcome(
            input_kind,
            Outcome::Succeed {
                bytes: bytes.into(),
                content_type: content_type.map(str::to_string),
            },
        )
    }

    /// Fail every call with a freshly built error
    #[must_use]
    pub fn failing<F>(input_kind: InputKind, error: F) -> Self
    where
        F: Fn() -> BgRemovalError + Send + Sync + 'static,
    {
        Self::with_outcome(input_kind, Outcome::Fail(Arc::new(error)))
    }

    /// Panic inside every call
    #[must_use]
    pub fn panicking(input_kind: InputKind) -> Self {
        Self::with_outcome(input_kind, Outcome::Panic)
    }

    fn with_outcome(input_kind: InputKind, outcome: Outcome) -> Self {
        Self {
            input_kind,
            outcome,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Calls seen so far
    #[must_use]
    pub fn invocations(&self) -> Vec<MockInvocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls seen so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    fn record(&self, request: &RemovalRequest<'_>) {
        let staged_path = request.reference.and_then(|reference| match reference {
            ImageReference::Path(path) => Some(path.clone()),
            ImageReference::Url(url) => url.to_file_path().ok(),
        });
        let staged_file_existed = staged_path.as_ref().is_some_and(|path| path.is_file());

        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(MockInvocation {
                staged_path,
                staged_file_existed,
                upload_size: request.upload.size(),
                resolution: request.resolution,
            });
        }
    }
}

#[async_trait]
impl BackgroundRemover for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn input_kind(&self) -> InputKind {
        self.input_kind
    }

    async fn remove(&self, request: RemovalRequest<'_>) -> Result<RemovalResult> {
        self.record(&request);

        match &self.outcome {
            Outcome::Succeed {
                bytes,
                content_type,
            } => Ok(RemovalResult::new(bytes.clone(), content_type.clone())),
            Outcome::Fail(error) => Err(error()),
            Outcome::Panic => panic!("mock backend panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::Upload;
    use tempfile::TempDir;

    fn upload() -> Upload {
        Upload {
            bytes: Bytes::from_static(b"abc"),
            filename: "a.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_staged_file_presence() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("a.png");
        std::fs::write(&staged, b"abc").unwrap();
        let reference = ImageReference::Path(staged.clone());

        let mock = MockBackend::succeeding(InputKind::File, &b"out"[..], None);
        let upload = upload();
        let result = mock
            .remove(RemovalRequest {
                upload: &upload,
                reference: Some(&reference),
                resolution: Resolution::Full,
            })
            .await
            .unwrap();
        assert_eq!(result.content_type(), "image/png");

        let calls = mock.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].staged_path.as_deref(), Some(staged.as_path()));
        assert!(calls[0].staged_file_existed);
        assert_eq!(calls[0].upload_size, 3);
        assert_eq!(calls[0].resolution, Resolution::Full);
    }

    #[tokio::test]
    async fn test_failing_builds_fresh_errors() {
        let mock = MockBackend::failing(InputKind::Bytes, || {
            BgRemovalError::removal("InferenceError", "boom", None)
        });
        let upload = upload();

        for _ in 0..2 {
            let err = mock
                .remove(RemovalRequest {
                    upload: &upload,
                    reference: None,
                    resolution: Resolution::Preview,
                })
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "InferenceError");
        }
        assert_eq!(mock.call_count(), 2);
        assert!(!mock.invocations()[0].staged_file_existed);
    }
}
