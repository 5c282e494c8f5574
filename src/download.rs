//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a scratch folder next to the cache. Once every file
//! has arrived they are renamed into the model folder one by one, weights last,
//! so a model folder only passes the completeness check when the variant's
//! weights are fully in place. Other variants cached in the same folder are
//! left alone.

use crate::cache::{format_size, ModelCache, REQUIRED_FILES};
use crate::config::ModelVariant;
use crate::error::{BgRemovalError, Result};
use crate::progress::{ProgressReporter, ProgressUpdate};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Model downloader with progress reporting
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader that fills the given cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Make sure a model variant is cached and return its folder
    ///
    /// Downloads `config.json`, `preprocessor_config.json` and the variant's
    /// ONNX file when they are not already cached.
    ///
    /// # Errors
    /// - Invalid or unsupported URL format
    /// - Network errors during download
    /// - File system errors while populating the cache
    pub async fn ensure_model(
        &self,
        url: &str,
        variant: ModelVariant,
        reporter: &dyn ProgressReporter,
    ) -> Result<PathBuf> {
        validate_model_url(url)?;

        let model_id = ModelCache::url_to_model_id(url);
        let final_dir = self.cache.get_model_path(&model_id);

        if self.cache.is_model_cached(&model_id, variant) {
            tracing::debug!(model_id = %model_id, variant = %variant, "Model already cached");
            return Ok(final_dir);
        }

        tracing::info!(
            url = %url,
            model_id = %model_id,
            precision = variant.precision(),
            "Downloading model"
        );

        let raw_base = format!("{}/resolve/main/", url.trim_end_matches('/'));
        self.install_model(&model_id, &raw_base, variant, reporter)
            .await
    }

    /// Download one variant into a scratch folder and merge it into the cache
    ///
    /// Files are moved one at a time with the weights last, so other variants
    /// already in the model folder survive and an interrupted merge never
    /// looks complete.
    async fn install_model(
        &self,
        model_id: &str,
        raw_base: &str,
        variant: ModelVariant,
        reporter: &dyn ProgressReporter,
    ) -> Result<PathBuf> {
        let final_dir = self.cache.get_model_path(model_id);
        let token = uuid::Uuid::new_v4().simple().to_string();
        let temp_dir = self
            .cache
            .cache_dir()
            .join(format!(".{model_id}.partial-{token}"));

        let outcome = match self
            .download_model_files(raw_base, &temp_dir, variant, reporter)
            .await
        {
            Ok(()) => merge_into(&temp_dir, &final_dir, variant).await,
            Err(e) => Err(e),
        };
        remove_dir_quietly(&temp_dir).await;
        outcome?;

        tracing::info!(model_id = %model_id, path = %final_dir.display(), "Model cached");
        Ok(final_dir)
    }

    /// Download the configuration files and one ONNX variant into `download_dir`
    async fn download_model_files(
        &self,
        raw_base: &str,
        download_dir: &Path,
        variant: ModelVariant,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        for file_name in REQUIRED_FILES.iter().copied().chain([variant.onnx_file()]) {
            let file_url = format!("{raw_base}{file_name}");
            let local_path = download_dir.join(file_name);
            self.download_file(&file_url, file_name, &local_path, reporter)
                .await?;
        }
        Ok(())
    }

    /// Stream a single file to disk, reporting progress per chunk
    async fn download_file(
        &self,
        url: &str,
        file_name: &str,
        local_path: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        tracing::debug!(url = %url, path = %local_path.display(), "Downloading file");

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BgRemovalError::staging("create directory", parent, e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::model(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length();
        reporter.report_progress(ProgressUpdate::fetch(file_name, 0, total_size));

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::staging("create file", local_path, e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::staging("write to file", local_path, e))?;

            downloaded += bytes_read as u64;
            reporter.report_progress(ProgressUpdate::fetch(file_name, downloaded, total_size));
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::staging("flush file", local_path, e))?;

        tracing::debug!(
            file = file_name,
            size = %format_size(downloaded),
            "Downloaded file"
        );
        Ok(())
    }

    /// The cache this downloader fills
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate that a URL is a supported model repository
///
/// Only `HuggingFace` repositories are supported.
///
/// # Errors
/// Returns a configuration error describing what is wrong with the URL
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::configuration("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::configuration(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported (https://huggingface.co/...)"
        )));
    };

    let mut parts = repo_path.split('/').filter(|part| !part.is_empty());
    if parts.next().is_none() || parts.next().is_none() {
        return Err(BgRemovalError::configuration(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: https://huggingface.co/username/repo-name"
        )));
    }

    Ok(())
}

/// Parse a `HuggingFace` URL into `(username, repository_name)`
///
/// # Errors
/// See [`validate_model_url`]
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    validate_model_url(url)?;

    let mut parts = url
        .strip_prefix(HUGGINGFACE_PREFIX)
        .unwrap_or_default()
        .split('/')
        .filter(|part| !part.is_empty());

    match (parts.next(), parts.next()) {
        (Some(user), Some(repo)) => Ok((user.to_string(), repo.to_string())),
        _ => Err(BgRemovalError::configuration(format!(
            "Invalid HuggingFace URL format: {url}"
        ))),
    }
}

/// Move a downloaded variant's files into the model folder, weights last
async fn merge_into(download_dir: &Path, model_dir: &Path, variant: ModelVariant) -> Result<()> {
    for file_name in REQUIRED_FILES.iter().copied().chain([variant.onnx_file()]) {
        let target = model_dir.join(file_name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BgRemovalError::staging("create directory", parent, e))?;
        }
        tokio::fs::rename(download_dir.join(file_name), &target)
            .await
            .map_err(|e| BgRemovalError::staging("move downloaded file to cache", &target, e))?;
    }
    Ok(())
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to clean up temp directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChannelProgressReporter, NoOpProgressReporter};
    use mockito::Matcher;
    use tempfile::TempDir;

    fn downloader(temp_dir: &TempDir) -> ModelDownloader {
        let cache = ModelCache::new(Some(temp_dir.path())).unwrap();
        ModelDownloader::new(cache).unwrap()
    }

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/user/repo/").is_ok());

        let invalid_urls = [
            "",
            "http://huggingface.co/user/repo",
            "https://github.com/user/repo",
            "https://huggingface.co/",
            "https://huggingface.co/onlyuser",
            "https://subdomain.huggingface.co/user/repo",
        ];
        for url in invalid_urls {
            assert!(validate_model_url(url).is_err(), "URL should be invalid: {url}");
        }

        let err = validate_model_url("").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_parse_huggingface_url() {
        let (user, repo) =
            parse_huggingface_url("https://huggingface.co/imgly/isnet-general-onnx").unwrap();
        assert_eq!(user, "imgly");
        assert_eq!(repo, "isnet-general-onnx");

        let (user, repo) = parse_huggingface_url("https://huggingface.co/user/repo/tree/main").unwrap();
        assert_eq!((user.as_str(), repo.as_str()), ("user", "repo"));

        assert!(parse_huggingface_url("https://huggingface.co/single").is_err());
    }

    #[tokio::test]
    async fn test_download_variant_files() {
        let mut server = mockito::Server::new_async().await;
        let config = server
            .mock("GET", "/resolve/main/config.json")
            .with_body("{}")
            .create_async()
            .await;
        let preprocessor = server
            .mock("GET", "/resolve/main/preprocessor_config.json")
            .with_body(r#"{"size":{"height":1024,"width":1024}}"#)
            .create_async()
            .await;
        let weights = server
            .mock("GET", "/resolve/main/onnx/model_fp16.onnx")
            .with_body(vec![7u8; 20_000])
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);
        let target = temp_dir.path().join("fetched");
        let (reporter, mut updates) = ChannelProgressReporter::new(1024);

        downloader
            .download_model_files(
                &format!("{}/resolve/main/", server.url()),
                &target,
                ModelVariant::Small,
                &reporter,
            )
            .await
            .unwrap();

        config.assert_async().await;
        preprocessor.assert_async().await;
        weights.assert_async().await;
        assert!(ModelCache::is_complete(&target, ModelVariant::Small));
        assert_eq!(
            std::fs::metadata(target.join("onnx/model_fp16.onnx")).unwrap().len(),
            20_000
        );

        let mut last_weights_update = None;
        while let Ok(update) = updates.try_recv() {
            if update.stage == "fetch:onnx/model_fp16.onnx" {
                last_weights_update = Some(update);
            }
        }
        let last = last_weights_update.unwrap();
        assert_eq!(last.done, 20_000);
        assert_eq!(last.total, 20_000);
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/resolve/main/config.json")
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);

        let err = downloader
            .download_model_files(
                &format!("{}/resolve/main/", server.url()),
                &temp_dir.path().join("fetched"),
                ModelVariant::Medium,
                &NoOpProgressReporter,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_ensure_model_uses_cache() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);
        let url = "https://huggingface.co/imgly/isnet-general-onnx";

        let model_dir = downloader
            .cache()
            .get_model_path(&ModelCache::url_to_model_id(url));
        std::fs::create_dir_all(model_dir.join("onnx")).unwrap();
        for file in REQUIRED_FILES {
            std::fs::write(model_dir.join(file), "{}").unwrap();
        }
        std::fs::write(model_dir.join("onnx/model.onnx"), b"weights").unwrap();

        // Served from the cache without touching the network
        let path = downloader
            .ensure_model(url, ModelVariant::Medium, &NoOpProgressReporter)
            .await
            .unwrap();
        assert_eq!(path, model_dir);
    }

    #[tokio::test]
    async fn test_install_keeps_other_cached_variant() {
        let mut server = mockito::Server::new_async().await;
        for (path, body) in [
            ("/resolve/main/config.json", b"{}".to_vec()),
            ("/resolve/main/preprocessor_config.json", b"{}".to_vec()),
            ("/resolve/main/onnx/model_fp16.onnx", vec![1u8; 512]),
        ] {
            server
                .mock("GET", path)
                .with_body(body)
                .create_async()
                .await;
        }

        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);
        let model_id = "imgly--isnet-general-onnx";
        let model_dir = downloader.cache().get_model_path(model_id);
        std::fs::create_dir_all(model_dir.join("onnx")).unwrap();
        for file in REQUIRED_FILES {
            std::fs::write(model_dir.join(file), "{}").unwrap();
        }
        std::fs::write(model_dir.join("onnx/model.onnx"), b"fp32-weights").unwrap();

        let path = downloader
            .install_model(
                model_id,
                &format!("{}/resolve/main/", server.url()),
                ModelVariant::Small,
                &NoOpProgressReporter,
            )
            .await
            .unwrap();

        assert_eq!(path, model_dir);
        assert!(ModelCache::is_complete(&model_dir, ModelVariant::Small));
        assert!(ModelCache::is_complete(&model_dir, ModelVariant::Medium));
        assert_eq!(std::fs::read(model_dir.join("onnx/model.onnx")).unwrap(), b"fp32-weights");

        // Only the model folder remains; the scratch folder is gone
        let entries: Vec<_> = std::fs::read_dir(downloader.cache().cache_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(model_id)]);
    }

    #[tokio::test]
    async fn test_failed_install_leaves_no_scratch_folder() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);

        let result = downloader
            .install_model(
                "user--repo",
                &format!("{}/resolve/main/", server.url()),
                ModelVariant::Medium,
                &NoOpProgressReporter,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(downloader.cache().cache_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_model_rejects_bad_url() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = downloader(&temp_dir);

        let err = downloader
            .ensure_model("https://github.com/u/r", ModelVariant::Medium, &NoOpProgressReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Configuration(_)));
    }
}
