//! Content-addressed artifact store.
//!
//! Artifacts are `<cache key>.tar.gz` files in one flat directory. Presence
//! of that file is the single source of truth for "this identity has been
//! converted"; the task registry is never consulted for it.
//!
//! ## Atomic publication
//!
//! A bundle is packed into a hidden `.<random>.partial` file inside the store
//! directory and renamed onto its final name only after the gzip trailer is
//! flushed and synced to disk. Rename within one directory is atomic, so [`ArtifactStore::exists`]
//! and [`ArtifactStore::read`] either see nothing or a complete archive. Two
//! jobs racing on the same key each publish a complete file; the last rename
//! wins. A failed pack drops its temp file.

use crate::cache_key::CacheKey;
use crate::error::Doc2MdError;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Durable directory of published conversion bundles.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Doc2MdError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Doc2MdError::Io {
            path: root.clone(),
            source: e,
        })?;
        debug!("Artifact store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage location for `key`. Does not imply existence.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.artifact_file_name())
    }

    /// `true` iff a complete, readable artifact is published under `key`.
    pub fn exists(&self, key: &CacheKey) -> bool {
        std::fs::metadata(self.path(key))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Pack `dir` into a bundle and publish it under `key`.
    ///
    /// Every entry is nested under a root directory named after the key.
    /// Packing runs on the blocking pool.
    pub async fn publish_dir(&self, key: &CacheKey, dir: &Path) -> Result<PathBuf, Doc2MdError> {
        let root = self.root.clone();
        let dest = self.path(key);
        let src = dir.to_path_buf();
        let root_name = key.to_string();

        let published = tokio::task::spawn_blocking(move || {
            let mut tmp = partial_file(&root)?;
            let tmp_path = tmp.path().to_path_buf();
            {
                let mut writer = bundle_tar::pack_dir(&src, &root_name, BufWriter::new(tmp.as_file_mut()))
                    .map_err(|e| Doc2MdError::Internal(e.to_string()))?;
                writer.flush().map_err(|e| Doc2MdError::Io {
                    path: tmp_path,
                    source: e,
                })?;
            }
            persist(tmp, &dest)
        })
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Publish task panicked: {e}")))??;

        info!("Published artifact {}", published.display());
        Ok(published)
    }

    /// Publish an already-packed bundle under `key`.
    pub async fn publish_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<PathBuf, Doc2MdError> {
        let root = self.root.clone();
        let dest = self.path(key);

        let published = tokio::task::spawn_blocking(move || {
            let mut tmp = partial_file(&root)?;
            tmp.write_all(&bytes).map_err(|e| Doc2MdError::Io {
                path: tmp.path().to_path_buf(),
                source: e,
            })?;
            persist(tmp, &dest)
        })
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Publish task panicked: {e}")))??;

        info!("Published artifact {}", published.display());
        Ok(published)
    }

    /// Read the whole artifact into memory.
    pub async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Doc2MdError> {
        let path = self.path(key);
        tokio::fs::read(&path).await.map_err(|e| self.read_error(key, path, e))
    }

    /// Open the artifact for streaming.
    pub async fn open_read(&self, key: &CacheKey) -> Result<tokio::fs::File, Doc2MdError> {
        let path = self.path(key);
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| self.read_error(key, path, e))
    }

    fn read_error(&self, key: &CacheKey, path: PathBuf, e: std::io::Error) -> Doc2MdError {
        if e.kind() == std::io::ErrorKind::NotFound {
            Doc2MdError::ArtifactNotFound {
                name: key.artifact_file_name(),
            }
        } else {
            Doc2MdError::Io { path, source: e }
        }
    }
}

fn partial_file(root: &Path) -> Result<NamedTempFile, Doc2MdError> {
    tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(root)
        .map_err(|e| Doc2MdError::Io {
            path: root.to_path_buf(),
            source: e,
        })
}

/// Sync the data, then rename onto `dest`. The rename must never land
/// ahead of the bytes it names.
fn persist(tmp: NamedTempFile, dest: &Path) -> Result<PathBuf, Doc2MdError> {
    tmp.as_file().sync_all().map_err(|e| Doc2MdError::Io {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;
    tmp.persist(dest).map_err(|e| Doc2MdError::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    Ok(dest.to_path_buf())
}
