//! Directory layout shared with the anonymity daemon, and the provisioner
//! that creates it.
//!
//! The controller writes only the daemon config into the working directory;
//! everything under the hidden-service directory is written by the daemon.

use std::io;
use std::path::{Path, PathBuf};

use prysm_config::AppConfig;
use tracing::debug;

/// Name of the daemon config file inside the working directory.
pub const TORRC_FILE_NAME: &str = "torrc";

/// Name of the identity file the daemon writes inside the hidden-service directory.
pub const HOSTNAME_FILE_NAME: &str = "hostname";

/// Errors from creating directories or writing files the daemon depends on.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to resolve {path:?} to an absolute path: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} exists and is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to restrict permissions on {path:?}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Absolute paths of the working directory and the hidden-service directory.
///
/// Both are fixed for the lifetime of a controller; the daemon config embeds
/// them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    working_dir: PathBuf,
    hidden_service_dir: PathBuf,
}

impl ServicePaths {
    /// Build the layout from a working directory and the name of the
    /// hidden-service subdirectory. Relative working directories are resolved
    /// against the current directory.
    pub fn new(
        working_dir: impl AsRef<Path>,
        hidden_service_subdir: impl AsRef<Path>,
    ) -> Result<Self, StorageError> {
        let working_dir = working_dir.as_ref();
        let working_dir = std::path::absolute(working_dir).map_err(|source| {
            StorageError::Resolve {
                path: working_dir.to_path_buf(),
                source,
            }
        })?;
        let hidden_service_dir = working_dir.join(hidden_service_subdir);
        Ok(Self {
            working_dir,
            hidden_service_dir,
        })
    }

    /// Build the layout described by the `[paths]` config section.
    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        Self::new(
            &config.paths.working_dir,
            &config.paths.hidden_service_subdir,
        )
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn hidden_service_dir(&self) -> &Path {
        &self.hidden_service_dir
    }

    /// Location the daemon config is written to.
    pub fn torrc_path(&self) -> PathBuf {
        self.working_dir.join(TORRC_FILE_NAME)
    }

    /// Location the daemon publishes the onion address to.
    pub fn hostname_path(&self) -> PathBuf {
        self.hidden_service_dir.join(HOSTNAME_FILE_NAME)
    }

    /// Create both directories, parents first.
    pub async fn provision(&self) -> Result<(), StorageError> {
        ensure_dir(&self.working_dir).await?;
        ensure_dir(&self.hidden_service_dir).await
    }
}

/// Create `path` and any missing parents. Succeeds without changes when the
/// directory already exists.
///
/// On Unix the directory is restricted to its owner: the daemon refuses to use
/// a data or hidden-service directory that other users can read.
pub async fn ensure_dir(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            debug!(path = %path.display(), "Directory already present");
        }
        Ok(_) => {
            return Err(StorageError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|source| StorageError::CreateDir {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(path = %path.display(), "Directory created");
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|source| StorageError::Permissions {
                path: path.to_path_buf(),
                source,
            })?;
    }

    Ok(())
}
