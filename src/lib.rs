#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Server
//!
//! An HTTP service that accepts an uploaded image and returns it with the
//! background removed. The removal itself is delegated to one of two
//! interchangeable backends selected at startup:
//!
//! - **Local**: an `ISNet` segmentation model executed in-process with Tract
//!   (pure Rust ONNX runtime), fetched from `HuggingFace` and cached on first use
//! - **Remote**: a remove.bg compatible HTTP API authenticated with an API key
//!
//! ## HTTP Surface
//!
//! - `GET /` returns a plain-text banner
//! - `POST /remove-background` takes a multipart body with one `image` field
//!   (JPEG, PNG or WebP) and an optional `resolution=full` query parameter,
//!   and answers with the processed image or a JSON error body
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use bgremove_server::{backends, router, AppState, ServerConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder()
//!     .api_key(std::env::var("REMOVE_BG_API_KEY").ok())
//!     .build()?;
//! let remover = backends::from_config(&config)?;
//! let app = router(AppState::new(config, remover));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): the `bgremove-server` binary, argument parsing and the
//!   tracing subscriber
//! - `tracing-json`: JSON log output

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod preprocessing;
pub mod progress;
pub mod response;
pub mod server;
pub mod staging;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod upload;

pub use backends::{
    BackgroundRemover, InputKind, LocalBackend, MockBackend, RemoteBackend, RemovalRequest,
    RemovalResult, Resolution,
};
pub use cache::{format_size, ModelCache};
pub use config::{BackendKind, FileReferenceStyle, ModelVariant, ServerConfig, ServerConfigBuilder};
pub use download::{parse_huggingface_url, validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use progress::{
    ChannelProgressReporter, ComputeStage, NoOpProgressReporter, ProgressReporter,
    ProgressUpdate, TracingProgressReporter,
};
pub use response::ErrorResponse;
pub use server::{router, serve, AppState};
pub use staging::{ImageReference, StagedFile, StagingArea};
pub use upload::{Upload, UploadValidator};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};
