//! Temporary staging of uploads for backends that consume a file reference
//!
//! Each upload is written under a name prefixed with a random hex token, so
//! concurrent requests never share a path. Bytes go to a `.partial` sibling
//! first and are renamed into place, so a backend never sees a half-written
//! file. A [`StagedFile`] owns its path: [`StagedFile::cleanup`] removes it on
//! the normal exit path and `Drop` removes it if the request was abandoned.
//! A stage that is itself cancelled removes its files once the blocking write
//! has settled.

use crate::config::FileReferenceStyle;
use crate::error::{BgRemovalError, Result};
use crate::upload::Upload;
use reqwest::Url;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Length of the random token prepended to staged filenames
const TOKEN_LENGTH: usize = 16;

/// Scratch directory that receives staged uploads
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory staged files are written to
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an upload to a fresh, uniquely named file
    ///
    /// The write and rename run as one blocking task. If this future is
    /// dropped before it finishes, both candidate paths are removed once that
    /// task has settled.
    ///
    /// # Errors
    /// `BgRemovalError::Staging` when the directory cannot be created or the
    /// file cannot be written or renamed. No partial file is left behind.
    pub async fn stage(&self, upload: &Upload) -> Result<StagedFile> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BgRemovalError::staging("create scratch directory", &self.dir, e))?;

        let token = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}",
            token.get(..TOKEN_LENGTH).unwrap_or(&token),
            upload.filename
        );
        let path = self.dir.join(&name);
        let partial = self.dir.join(format!("{name}.partial"));

        let task = {
            let (partial, path, bytes) = (partial.clone(), path.clone(), upload.bytes.clone());
            tokio::task::spawn_blocking(move || write_and_rename(&partial, &path, &bytes))
        };
        let mut pending = PendingStage {
            partial,
            path,
            task: Some(task),
        };

        let written = match pending.task.as_mut() {
            Some(task) => task.await,
            None => return Err(BgRemovalError::internal("Staging task missing")),
        };
        pending.task = None;

        match written {
            Ok(Ok(())) => {
                tracing::debug!(path = %pending.path.display(), size = upload.size(), "Staged upload");
                Ok(pending.into_staged())
            },
            Ok(Err(e)) => Err(e),
            Err(e) => Err(BgRemovalError::internal(format!("Staging task failed: {e}"))),
        }
    }
}

fn write_and_rename(partial: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let written = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial)
        .map_err(|e| BgRemovalError::staging("create staged file", partial, e))
        .and_then(|mut file| {
            file.write_all(bytes)
                .and_then(|()| file.flush())
                .map_err(|e| BgRemovalError::staging("write staged file", partial, e))
        })
        .and_then(|()| {
            std::fs::rename(partial, path)
                .map_err(|e| BgRemovalError::staging("move staged file into place", path, e))
        });

    if written.is_err() {
        remove_quietly(partial);
    }
    written
}

/// Owns the paths of a stage still in progress
///
/// Dropped without [`PendingStage::into_staged`], it removes both the
/// `.partial` and the final path. When the blocking write may still be
/// running, removal waits for it on the runtime.
struct PendingStage {
    partial: PathBuf,
    path: PathBuf,
    task: Option<JoinHandle<Result<()>>>,
}

impl PendingStage {
    fn into_staged(mut self) -> StagedFile {
        let path = std::mem::take(&mut self.path);
        self.partial = PathBuf::new();
        StagedFile {
            path,
            removed: false,
        }
    }

    fn remove_paths(partial: &Path, path: &Path) {
        for candidate in [partial, path] {
            if !candidate.as_os_str().is_empty() {
                remove_quietly(candidate);
            }
        }
    }
}

impl Drop for PendingStage {
    fn drop(&mut self) {
        let partial = std::mem::take(&mut self.partial);
        let path = std::mem::take(&mut self.path);

        match (self.task.take(), tokio::runtime::Handle::try_current()) {
            (Some(task), Ok(runtime)) => {
                tracing::debug!(path = %path.display(), "Staging abandoned, removing once the write settles");
                runtime.spawn(async move {
                    let _ = task.await;
                    Self::remove_paths(&partial, &path);
                });
            },
            _ => Self::remove_paths(&partial, &path),
        }
    }
}

/// Reference to a staged image, in the form the backend was configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Filesystem path
    Path(PathBuf),
    /// `file://` URL
    Url(Url),
}

impl ImageReference {
    /// Resolve the reference to a filesystem path
    ///
    /// # Errors
    /// Returns an error for URLs that do not use the `file` scheme
    pub fn to_path(&self) -> Result<PathBuf> {
        match self {
            Self::Path(path) => Ok(path.clone()),
            Self::Url(url) if url.scheme() == "file" => url.to_file_path().map_err(|()| {
                BgRemovalError::internal(format!("File URL has no local path: {url}"))
            }),
            Self::Url(url) => Err(BgRemovalError::internal(format!(
                "Unsupported image reference scheme '{}'",
                url.scheme()
            ))),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

/// An upload written to the scratch directory for the lifetime of one request
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    removed: bool,
}

impl StagedFile {
    /// Path of the staged file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The staged path as a `file://` URL
    ///
    /// # Errors
    /// Returns an error when the path is not absolute
    pub fn file_url(&self) -> Result<Url> {
        Url::from_file_path(&self.path).map_err(|()| {
            BgRemovalError::internal(format!(
                "Cannot express '{}' as a file URL",
                self.path.display()
            ))
        })
    }

    /// Reference to hand to a backend
    ///
    /// # Errors
    /// See [`StagedFile::file_url`]
    pub fn reference(&self, style: FileReferenceStyle) -> Result<ImageReference> {
        match style {
            FileReferenceStyle::Path => Ok(ImageReference::Path(self.path.clone())),
            FileReferenceStyle::Url => self.file_url().map(ImageReference::Url),
        }
    }

    /// Remove the staged file
    ///
    /// An already absent file is fine. Any other failure is logged and
    /// swallowed so it never replaces the response being sent.
    pub async fn cleanup(mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed staged file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Staged file already gone");
            },
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staged file"
            ),
        }
        self.removed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Reached when the request future was dropped or unwound before cleanup ran
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed abandoned staged file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove abandoned staged file"
            ),
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}
