//! Remote backend: a remove.bg compatible HTTP API
//!
//! One multipart POST per request, authenticated with the `X-Api-Key` header.
//! Failures are split by where they happened: the request could not be built,
//! no response arrived, or the service answered with an error status.

use super::{BackgroundRemover, InputKind, RemovalRequest, RemovalResult};
use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Instant;

/// Header carrying the API credential
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Multipart field the remote API reads the image from
pub const REMOTE_IMAGE_FIELD: &str = "image_file";

/// Content type the remote API always answers with
const REMOTE_CONTENT_TYPE: &str = "image/png";

const GENERIC_FAILURE: &str = "Background removal service returned an error";

/// Structured error body, e.g. `{"errors":[{"title":"Insufficient credits"}]}`
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    errors: Vec<RemoteErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorEntry {
    title: Option<String>,
}

/// Background removal through the remote HTTP API
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl RemoteBackend {
    /// Create the backend
    ///
    /// A missing API key is accepted here and reported on each request.
    ///
    /// # Errors
    /// - Invalid endpoint URL
    /// - Failed to create HTTP client
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.remote_url).map_err(|e| {
            BgRemovalError::configuration(format!(
                "Invalid remote API URL '{}': {}",
                config.remote_url, e
            ))
        })?;

        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BgRemovalError::internal(format!("Failed to create HTTP client: {e}")))?;

        let api_key = config.api_key().map(str::to_string);
        if api_key.is_none() {
            tracing::warn!(
                "No remote API key configured; background removal requests will fail until REMOVE_BG_API_KEY is set"
            );
        }

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// Endpoint requests are sent to
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn form(request: &RemovalRequest<'_>) -> Result<Form> {
        let upload = request.upload;
        let part = Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| BgRemovalError::RemoteRequest(format!("Invalid upload content type: {e}")))?;

        Ok(Form::new()
            .part(REMOTE_IMAGE_FIELD, part)
            .text("size", request.resolution.remote_size()))
    }
}

/// Classify a transport failure
fn transport_error(error: &reqwest::Error) -> BgRemovalError {
    if error.is_builder() {
        BgRemovalError::RemoteRequest(error.to_string())
    } else {
        BgRemovalError::RemoteUnreachable(error.to_string())
    }
}

/// Turn a non-success answer into an error, keeping the remote status when
/// the body explains what went wrong
fn response_error(status: u16, body: &str) -> BgRemovalError {
    let title = serde_json::from_str::<RemoteErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.errors.into_iter().find_map(|entry| entry.title));

    match title {
        Some(title) => BgRemovalError::remote_response(status, GENERIC_FAILURE, Some(title)),
        None => BgRemovalError::remote_response(
            500,
            format!("{GENERIC_FAILURE} (status {status})"),
            None,
        ),
    }
}

#[async_trait]
impl BackgroundRemover for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Bytes
    }

    async fn remove(&self, request: RemovalRequest<'_>) -> Result<RemovalResult> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            BgRemovalError::configuration(
                "Remote API key is not configured. Set REMOVE_BG_API_KEY",
            )
        })?;

        let form = Self::form(&request)?;
        let started = Instant::now();

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            size = request.resolution.remote_size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remote service responded"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = response_error(status.as_u16(), &body);
            tracing::warn!(status = status.as_u16(), error = %error, "Remote background removal failed");
            return Err(error);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgRemovalError::RemoteUnreachable(format!("Failed to read response: {e}")))?;

        Ok(RemovalResult::new(bytes, Some(REMOTE_CONTENT_TYPE.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Resolution;
    use crate::upload::Upload;
    use bytes::Bytes;
    use mockito::Matcher;

    fn upload() -> Upload {
        Upload {
            bytes: Bytes::from_static(b"fake-png"),
            filename: "cat.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    fn backend(url: &str, api_key: Option<&str>) -> RemoteBackend {
        let config = ServerConfig::builder()
            .remote_url(url)
            .api_key(api_key.map(str::to_string))
            .build()
            .unwrap();
        RemoteBackend::new(&config).unwrap()
    }

    async fn remove(backend: &RemoteBackend, resolution: Resolution) -> Result<RemovalResult> {
        let upload = upload();
        backend
            .remove(RemovalRequest {
                upload: &upload,
                reference: None,
                resolution,
            })
            .await
    }

    #[test]
    fn test_response_error_mapping() {
        let err = response_error(403, r#"{"errors":[{"title":"Insufficient credits"}]}"#);
        assert_eq!(err.status_code(), 403);
        match err {
            BgRemovalError::RemoteResponse { details, .. } => {
                assert_eq!(details.as_deref(), Some("Insufficient credits"));
            },
            other => panic!("unexpected error: {other:?}"),
        }

        let err = response_error(502, "<html>Bad gateway</html>");
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("502"));

        assert_eq!(response_error(400, r#"{"errors":[]}"#).status_code(), 500);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let mut server = mockito::Server::new_async().await;
        let never = server.mock("POST", "/").expect(0).create_async().await;

        let err = remove(&backend(&server.url(), None), Resolution::Preview)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Configuration(_)));
        assert_eq!(err.status_code(), 500);
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_success_sends_key_and_preview_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header(API_KEY_HEADER, "secret")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="image_file"; filename="cat.png""#.to_string()),
                Matcher::Regex(r#"name="size"\r\n\r\npreview"#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"png-result")
            .create_async()
            .await;

        let result = remove(&backend(&server.url(), Some("secret")), Resolution::Preview)
            .await
            .unwrap();
        assert_eq!(result.bytes.as_ref(), b"png-result");
        assert_eq!(result.content_type(), "image/png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_full_resolution_requests_auto_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#"name="size"\r\n\r\nauto"#.to_string()))
            .with_body(b"png")
            .create_async()
            .await;

        remove(&backend(&server.url(), Some("secret")), Resolution::Full)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_error_status_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors":[{"title":"Insufficient credits"}]}"#)
            .create_async()
            .await;

        let err = remove(&backend(&server.url(), Some("secret")), Resolution::Preview)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.kind(), "RemoteServiceError");
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // Nothing listens on port 9 of the loopback interface
        let err = remove(&backend("http://127.0.0.1:9/", Some("secret")), Resolution::Preview)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::RemoteUnreachable(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_transport_error_classification() {
        // A header value with a newline cannot be built into a request
        let err = Client::new()
            .get("http://localhost/")
            .header(API_KEY_HEADER, "bad\nkey")
            .build()
            .unwrap_err();
        assert!(matches!(transport_error(&err), BgRemovalError::RemoteRequest(_)));
    }
}
