//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliBackend, CliFileReference, CliModel};
use crate::config::{BackendKind, FileReferenceStyle, ModelVariant, ServerConfig};
use anyhow::Result;

/// Convert CLI arguments to a validated [`ServerConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let mut builder = ServerConfig::builder()
            .host(cli.host.clone())
            .port(cli.port)
            .backend(Self::backend(cli.backend))
            .api_key(cli.api_key.clone())
            .remote_url(cli.remote_url.clone())
            .model_variant(Self::model_variant(cli.model))
            .model_url(cli.model_url.clone())
            .model_dir(cli.model_dir.clone())
            .cache_dir(cli.cache_dir.clone())
            .file_reference(Self::file_reference(cli.file_reference))
            .max_upload_bytes(cli.max_upload_bytes);

        if let Some(scratch_dir) = &cli.scratch_dir {
            builder = builder.scratch_dir(scratch_dir.clone());
        }

        Ok(builder.build()?)
    }

    fn backend(backend: CliBackend) -> BackendKind {
        match backend {
            CliBackend::Local => BackendKind::Local,
            CliBackend::Remote => BackendKind::Remote,
        }
    }

    fn model_variant(model: CliModel) -> ModelVariant {
        match model {
            CliModel::Small => ModelVariant::Small,
            CliModel::Medium => ModelVariant::Medium,
        }
    }

    fn file_reference(style: CliFileReference) -> FileReferenceStyle {
        match style {
            CliFileReference::Path => FileReferenceStyle::Path,
            CliFileReference::Url => FileReferenceStyle::Url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_cli() {
        let cli = Cli::try_parse_from([
            "bgremove-server",
            "--host",
            "127.0.0.1",
            "--backend",
            "local",
            "--model",
            "small",
            "--scratch-dir",
            "/var/tmp/bgremove",
            "--max-upload-bytes",
            "2048",
        ])
        .unwrap();

        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.model_variant, ModelVariant::Small);
        assert_eq!(config.scratch_dir, std::path::PathBuf::from("/var/tmp/bgremove"));
        assert_eq!(config.max_upload_bytes, 2048);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cli =
            Cli::try_parse_from(["bgremove-server", "--max-upload-bytes", "0"]).unwrap();
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
