//! Local staging directories for the uploaded input and the fetched result.
//!
//! Both directories are path-addressed shared resources. They are cleared
//! when a new job is admitted, the upload directory receives exactly one
//! file before submission, and the download directory receives at most one
//! result file after a successful fetch.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Upload and download directories plus the well-known result file name.
#[derive(Debug, Clone)]
pub struct StagingDirs {
    upload_dir: PathBuf,
    download_dir: PathBuf,
    result_file_name: String,
}

impl StagingDirs {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        result_file_name: impl Into<String>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            download_dir: download_dir.into(),
            result_file_name: result_file_name.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn result_file_name(&self) -> &str {
        &self.result_file_name
    }

    /// Extension (including the dot) a downloadable file must carry,
    /// derived from the result file name, e.g. `.ply`.
    pub fn result_extension(&self) -> String {
        Path::new(&self.result_file_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Where a fetched result lands.
    pub fn result_path(&self) -> PathBuf {
        self.download_dir.join(&self.result_file_name)
    }

    /// Create both directories if they do not exist.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.download_dir).await
    }

    /// Clear both directories in preparation for a newly admitted job.
    pub async fn reset(&self) -> std::io::Result<()> {
        self.ensure().await?;
        clear_directory(&self.upload_dir).await;
        clear_directory(&self.download_dir).await;
        Ok(())
    }

    /// Persist the uploaded artifact under its client-supplied name.
    ///
    /// Only the final path component of `file_name` is used.
    pub async fn stage_upload(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, CoreError> {
        let name = sanitize_file_name(file_name)
            .ok_or_else(|| CoreError::Validation("No selected file.".into()))?;
        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, data).await?;
        tracing::info!(path = %path.display(), bytes = data.len(), "Upload staged");
        Ok(path)
    }

    /// Validate a requested download name and locate the file.
    ///
    /// Names without the result extension or containing path separators are
    /// rejected as bad requests before the filesystem is consulted.
    pub async fn resolve_download(&self, name: &str) -> Result<PathBuf, CoreError> {
        let extension = self.result_extension();
        if !name.ends_with(&extension) {
            return Err(CoreError::BadRequest(format!(
                "Only {extension} files are allowed."
            )));
        }
        if sanitize_file_name(name) != Some(name) {
            return Err(CoreError::BadRequest(format!("Invalid file name '{name}'")));
        }

        let path = self.download_dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(CoreError::NotFound(
                "Requested file not found. It may not be generated yet.".into(),
            )),
        }
    }
}

/// Reduce a client-supplied name to a plain file name.
///
/// Returns `None` for empty names and names that resolve to `.` or `..`.
pub fn sanitize_file_name(file_name: &str) -> Option<&str> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return None;
    }
    let last = trimmed.rsplit(|c: char| c == '/' || c == '\\').next()?;
    match last {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Remove every file and sub-directory inside `dir`.
///
/// A missing directory is treated as already clear. Individual removal
/// failures are logged and skipped.
pub async fn clear_directory(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Failed to read directory for clearing");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "Failed to list directory entry");
                break;
            }
        };

        let path = entry.path();
        let removal = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        if let Err(e) = removal {
            tracing::error!(path = %path.display(), error = %e, "Error deleting staged entry");
        }
    }
}

/// Lexicographically first regular file directly inside `dir`.
pub async fn first_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files.into_iter().next())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
