//! Background removal HTTP server
//!
//! Every option can also be supplied through the environment, which is how
//! container platforms usually configure the service.

use super::config::CliConfigBuilder;
use crate::tracing_config::{TracingConfig, TracingFormat};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Background removal HTTP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Interface to bind
    #[arg(long, env = "BGREMOVE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Background removal backend
    #[arg(short, long, env = "BGREMOVE_BACKEND", value_enum, default_value_t = CliBackend::Remote)]
    pub backend: CliBackend,

    /// API key for the remote backend
    #[arg(long, env = "REMOVE_BG_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Remote background removal endpoint
    #[arg(long, env = "REMOVE_BG_URL", default_value = crate::config::DEFAULT_REMOTE_URL)]
    pub remote_url: String,

    /// Model size for the local backend
    #[arg(short, long, env = "BGREMOVE_MODEL", value_enum, default_value_t = CliModel::Medium)]
    pub model: CliModel,

    /// Model repository fetched on first use by the local backend
    #[arg(long, env = "BGREMOVE_MODEL_URL", default_value = crate::config::DEFAULT_MODEL_URL)]
    pub model_url: String,

    /// Pre-fetched model folder (skips downloading)
    #[arg(long, env = "BGREMOVE_MODEL_DIR", value_name = "PATH")]
    pub model_dir: Option<PathBuf>,

    /// Use custom model cache directory
    #[arg(long, env = "BGREMOVE_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Directory for staged uploads [default: system temp directory]
    #[arg(long, env = "BGREMOVE_SCRATCH_DIR", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// How staged uploads are referenced when handed to the local backend
    #[arg(long, value_enum, default_value_t = CliFileReference::Path)]
    pub file_reference: CliFileReference,

    /// Maximum accepted upload size in bytes
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Log output format
    #[arg(long, env = "BGREMOVE_LOG_FORMAT", value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Tracing filter directives (overrides -v)
    #[arg(long, env = "RUST_LOG", value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    /// In-process ONNX model
    Local,
    /// remove.bg compatible HTTP API
    Remote,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliModel {
    /// fp16 weights
    Small,
    /// fp32 weights
    Medium,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliFileReference {
    Path,
    Url,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend,
        "Starting background removal server"
    );
    if config.backend == crate::config::BackendKind::Local {
        tracing::info!(
            model = %config.model_variant,
            model_url = %config.model_url,
            model_dir = ?config.model_dir,
            "Local model will be loaded on first request"
        );
    }

    crate::server::serve(config)
        .await
        .context("Server terminated with an error")?;

    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
    };

    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);
    if let Some(filter) = cli.log_filter.as_deref().filter(|f| !f.trim().is_empty()) {
        config = config.with_env_filter(filter);
    }

    config.init()?;
    tracing::debug!(verbosity = cli.verbose, "Tracing initialized");
    Ok(())
}
