//! HTTP server: routes, request pipeline and graceful shutdown
//!
//! Each request runs `validate -> (stage ->) invoke -> respond` once, with no
//! retries. A staged file is removed on every exit path before the response
//! leaves the handler.

use crate::backends::{self, BackgroundRemover, InputKind, RemovalRequest, RemovalResult, Resolution};
use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use crate::response::{panic_response, removal_response};
use crate::staging::StagingArea;
use crate::upload::{Upload, UploadValidator, IMAGE_FIELD};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Room left above the upload ceiling for multipart boundaries and headers
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared, read-only state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub remover: Arc<dyn BackgroundRemover>,
    pub staging: StagingArea,
    pub validator: UploadValidator,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("remover", &self.remover.name())
            .field("staging", &self.staging)
            .field("validator", &self.validator)
            .finish()
    }
}

impl AppState {
    /// Wire a backend into the state derived from the configuration
    #[must_use]
    pub fn new(config: ServerConfig, remover: Arc<dyn BackgroundRemover>) -> Self {
        Self {
            staging: StagingArea::new(config.scratch_dir.clone()),
            validator: UploadValidator::new(config.max_upload_bytes),
            config: Arc::new(config),
            remover,
        }
    }
}

/// Query parameter selecting the output tier
pub const RESOLUTION_PARAM: &str = "resolution";

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.validator.max_bytes().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(banner))
        .route("/remove-background", post(remove_background))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner(State(state): State<AppState>) -> String {
    format!(
        "Background removal service ({} backend)\n\
         POST an image to /remove-background as multipart field '{}'.\n\
         Accepted types: image/jpeg, image/png, image/webp; maximum size {} bytes.\n",
        state.remover.name(),
        IMAGE_FIELD,
        state.validator.max_bytes()
    )
}

async fn remove_background(
    State(state): State<AppState>,
    query: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "remove_background",
        %request_id,
        backend = state.remover.name()
    );

    async move {
        let resolution = requested_resolution(query);
        match process(&state, multipart, resolution).await {
            Ok(result) => removal_response(result),
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}

/// Tier named by the first `resolution` parameter
///
/// Repeated parameters keep the first value and an unreadable query string
/// counts as absent; neither fails the request.
fn requested_resolution(
    query: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Resolution {
    let pairs = match query {
        Ok(Query(pairs)) => pairs,
        Err(e) => {
            tracing::debug!(error = %e.body_text(), "Ignoring unreadable query string");
            Vec::new()
        },
    };

    Resolution::from_query(
        pairs
            .iter()
            .find(|(key, _)| key == RESOLUTION_PARAM)
            .map(|(_, value)| value.as_str()),
    )
}

async fn process(
    state: &AppState,
    multipart: std::result::Result<Multipart, MultipartRejection>,
    resolution: Resolution,
) -> Result<RemovalResult> {
    let multipart = multipart.map_err(|e| {
        BgRemovalError::validation(format!("Invalid multipart upload: {}", e.body_text()))
    })?;
    let upload = state.validator.extract(multipart).await?;

    match state.remover.input_kind() {
        InputKind::Bytes => invoke(state, &upload, None, resolution).await,
        InputKind::File => {
            let staged = state.staging.stage(&upload).await?;
            let outcome = match staged.reference(state.config.file_reference) {
                Ok(reference) => invoke(state, &upload, Some(&reference), resolution).await,
                Err(e) => Err(e),
            };
            staged.cleanup().await;
            outcome
        },
    }
}

async fn invoke(
    state: &AppState,
    upload: &Upload,
    reference: Option<&crate::staging::ImageReference>,
    resolution: Resolution,
) -> Result<RemovalResult> {
    let started = Instant::now();
    let outcome = state
        .remover
        .remove(RemovalRequest {
            upload,
            reference,
            resolution,
        })
        .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(result) => tracing::info!(
            elapsed_ms,
            input_size = upload.size(),
            output_size = result.bytes.len(),
            "Background removed"
        ),
        Err(e) => tracing::debug!(elapsed_ms, kind = e.kind(), "Background removal failed"),
    }
    outcome
}

/// Bind, serve until Ctrl-C or SIGTERM, then drain in-flight requests
///
/// # Errors
/// - Backend construction fails
/// - The address cannot be bound
/// - The server stops with an I/O error
pub async fn serve(config: ServerConfig) -> Result<()> {
    let remover = backends::from_config(&config)?;
    let state = AppState::new(config, remover);
    let addr = state.config.bind_address();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BgRemovalError::configuration(format!("Failed to bind {addr}: {e}")))?;

    tracing::info!(
        addr = %addr,
        backend = %state.config.backend,
        max_upload_bytes = state.config.max_upload_bytes,
        scratch_dir = %state.config.scratch_dir.display(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BgRemovalError::internal(format!("Server error: {e}")))?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received terminate signal"),
    }

    tracing::info!("Shutting down gracefully...");
}
