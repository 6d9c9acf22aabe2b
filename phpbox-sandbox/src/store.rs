//! Sandbox directory and per-execution temp artifacts

use crate::error::SandboxError;
use crate::token::Token;
use crate::Result;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// Name of the sandbox directory created under the cache root
pub const SANDBOX_DIR_NAME: &str = "php_sandbox";

/// Extension of code artifacts
pub const CODE_EXTENSION: &str = "php";

/// Extension of captured diagnostics
pub const LOG_EXTENSION: &str = "log";

/// Owns the sandbox directory shared by every execution.
///
/// There is no locking: each execution names its files after its own
/// [`Token`], which is what keeps concurrent calls apart.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    resolved: OnceCell<PathBuf>,
}

impl ArtifactStore {
    /// Store rooted at `<cache_root>/php_sandbox`
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            dir: cache_root.as_ref().join(SANDBOX_DIR_NAME),
            resolved: OnceCell::new(),
        }
    }

    /// Sandbox directory as configured (not necessarily created yet)
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the sandbox directory (and parents) on first use.
    ///
    /// The canonical path is resolved once and reused afterwards.
    pub async fn ensure_directory(&self) -> Result<&Path> {
        let path = self
            .resolved
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.dir).await.map_err(|source| {
                    SandboxError::DirectoryUnavailable {
                        path: self.dir.clone(),
                        source,
                    }
                })?;
                let resolved = tokio::fs::canonicalize(&self.dir).await.map_err(|source| {
                    SandboxError::DirectoryUnavailable {
                        path: self.dir.clone(),
                        source,
                    }
                })?;
                tracing::debug!(path = %resolved.display(), "Sandbox directory ready");
                Ok::<_, SandboxError>(resolved)
            })
            .await?;
        Ok(path.as_path())
    }

    /// Write `<token>.<extension>` into the sandbox directory
    pub async fn write_artifact(
        &self,
        token: &Token,
        extension: &str,
        content: &str,
    ) -> Result<PathBuf> {
        let dir = self.ensure_directory().await?;
        let path = dir.join(token.file_name(extension));
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| SandboxError::WriteFailure {
                path: path.clone(),
                source,
            })?;
        tracing::trace!(token = %token, path = %path.display(), "Artifact written");
        Ok(path)
    }

    /// Remove an artifact. A file that is already gone is not an error.
    pub async fn remove_artifact(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::trace!(path = %path.display(), "Artifact removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
        }
    }

    /// Guard that removes `path` when dropped
    pub fn guard(&self, path: PathBuf) -> ArtifactGuard {
        ArtifactGuard {
            path: Some(path),
        }
    }

    /// Files in the sandbox directory belonging to `token`
    pub fn list_artifacts(&self, token: &Token) -> Vec<PathBuf> {
        let stem = token.to_string();
        let dir = self.resolved.get().unwrap_or(&self.dir);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str())
            })
            .collect()
    }

    /// Recursively delete everything below the sandbox directory, keeping the
    /// directory itself. Returns whether it ended up empty; a directory that
    /// does not exist counts as cleared.
    pub fn clear_all(&self) -> io::Result<bool> {
        let dir = match std::fs::canonicalize(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        };

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let result = if std::fs::symlink_metadata(&path)?.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache entry");
            }
        }

        let empty = std::fs::read_dir(&dir)?.next().is_none();
        tracing::info!(path = %dir.display(), empty, "Sandbox cache cleared");
        Ok(empty)
    }
}

/// Removes its artifact on drop, on every exit path.
///
/// [`ArtifactGuard::disarm`] hands the file over to someone else, which the
/// detached strategy uses once the spawned script is responsible for
/// deleting itself.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: Option<PathBuf>,
}

impl ArtifactGuard {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Stop tracking the file; it will not be removed on drop
    pub fn disarm(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::trace!(path = %path.display(), "Artifact cleaned up"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to clean up artifact")
                }
            }
        }
    }
}
