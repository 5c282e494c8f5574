//! Upload validation
//!
//! Pulls the single `image` field out of a multipart request and checks it
//! against the content type allow-list and the size ceiling before anything
//! else touches it. The MIME type declared for the part decides acceptance;
//! the filename extension is never consulted.

use crate::error::{BgRemovalError, Result};
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};

/// Multipart field carrying the image
pub const IMAGE_FIELD: &str = "image";

/// Raster formats accepted for processing
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Name used when the client sends no usable filename
const FALLBACK_FILENAME: &str = "upload";

const MAX_FILENAME_LENGTH: usize = 128;

/// One request's validated image payload
#[derive(Debug, Clone)]
pub struct Upload {
    /// Raw image bytes
    pub bytes: Bytes,
    /// Sanitized base filename
    pub filename: String,
    /// Declared MIME type, normalized
    pub content_type: String,
}

impl Upload {
    /// Payload length in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Validates multipart uploads against the allow-list and size ceiling
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_bytes: usize,
}

impl UploadValidator {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Size ceiling in bytes
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Read and validate the image field of a multipart request
    ///
    /// The field is buffered chunk by chunk so an oversize upload is rejected
    /// as soon as it crosses the ceiling.
    ///
    /// # Errors
    /// `BgRemovalError::Validation` when the body is malformed, the field is
    /// missing or repeated, the type is not allowed, or the size is exceeded.
    pub async fn extract(&self, mut multipart: Multipart) -> Result<Upload> {
        let mut upload: Option<Upload> = None;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(IMAGE_FIELD) {
                tracing::debug!(field = ?field.name(), "Ignoring unexpected multipart field");
                continue;
            }

            if upload.is_some() {
                return Err(BgRemovalError::validation(format!(
                    "Only one file may be uploaded in the '{IMAGE_FIELD}' field"
                )));
            }

            let content_type = self.validate_content_type(field.content_type())?;
            let filename = sanitize_filename(field.file_name().unwrap_or(FALLBACK_FILENAME));
            let bytes = self.read_field(field).await?;

            upload = Some(Upload {
                bytes,
                filename,
                content_type,
            });
        }

        let upload = upload.ok_or_else(|| {
            BgRemovalError::validation(format!(
                "No image file uploaded. Send the image in the '{IMAGE_FIELD}' form field"
            ))
        })?;

        tracing::debug!(
            filename = %upload.filename,
            content_type = %upload.content_type,
            size = upload.size(),
            "Upload validated"
        );

        Ok(upload)
    }

    /// Check a declared MIME type against the allow-list
    ///
    /// Parameters such as `; charset=...` are stripped before comparison.
    ///
    /// # Errors
    /// `BgRemovalError::Validation` for missing or disallowed types
    pub fn validate_content_type(&self, content_type: Option<&str>) -> Result<String> {
        let declared = content_type.unwrap_or_default();
        let normalized = declared
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_lowercase();

        if ALLOWED_CONTENT_TYPES.contains(&normalized.as_str()) {
            Ok(normalized)
        } else {
            Err(BgRemovalError::validation(format!(
                "Invalid file type '{}'. Only {} images are allowed",
                if declared.is_empty() { "unknown" } else { declared },
                ALLOWED_CONTENT_TYPES.join(", ")
            )))
        }
    }

    /// Check a byte count against the ceiling
    ///
    /// # Errors
    /// `BgRemovalError::Validation` when `size` exceeds the ceiling
    pub fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_bytes {
            return Err(BgRemovalError::validation(format!(
                "File too large. Maximum size is {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    async fn read_field(&self, mut field: Field<'_>) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            self.check_size(buffer.len() + chunk.len())?;
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

/// Reduce a client-supplied filename to a safe base name
///
/// Directory components (either separator style) are dropped and characters
/// outside `[A-Za-z0-9._-]` become `_`.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = base
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized
    }
}

fn multipart_error(error: MultipartError) -> BgRemovalError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        BgRemovalError::validation("File too large")
    } else {
        BgRemovalError::validation(format!("Invalid multipart upload: {}", error.body_text()))
    }
}
