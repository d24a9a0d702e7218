use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::fetch::ByteStream;
use crate::track::sanitize_component;

const STAGING_DIR: &str = ".staging";
const ARTIFACT_EXTENSION: &str = "mp3";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("artifact not found: {0}")]
    Missing(String),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ArtifactStats {
    pub files: u64,
    pub total_bytes: u64,
}

/// Durable store for encoded artifacts, keyed by resource id.
///
/// Writers encode into a staging path and promote it with a rename, so a
/// reader never observes a partially written artifact under its final name.
/// Staging lives inside the library root to keep the rename on one
/// filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize_component(id), ARTIFACT_EXTENSION))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    pub async fn ensure_layout(&self) -> ArtifactResult<()> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|source| ArtifactError::Io {
                source,
                path: staging,
            })?;
        Ok(())
    }

    /// Reserves a unique staging path for an in-progress encode.
    pub async fn stage_path(&self) -> ArtifactResult<PathBuf> {
        self.ensure_layout().await?;
        Ok(self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.{}.part", Uuid::new_v4().simple(), ARTIFACT_EXTENSION)))
    }

    /// Moves a finished staging file under its final name and returns the
    /// artifact checksum. The checksum is taken before the rename, so a
    /// promoted artifact is always complete.
    pub async fn promote(&self, staged: &Path, id: &str) -> ArtifactResult<String> {
        let checksum = self.compute_sha256(staged).await?;
        let target = self.path_for(id);
        fs::rename(staged, &target)
            .await
            .map_err(|source| ArtifactError::Io {
                source,
                path: target,
            })?;
        Ok(checksum)
    }

    /// Best-effort removal of an abandoned staging file.
    pub async fn discard(&self, staged: &Path) {
        if let Err(err) = fs::remove_file(staged).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %staged.display(), error = %err, "failed to discard staging file");
            }
        }
    }

    pub async fn open(&self, id: &str) -> ArtifactResult<ByteStream> {
        let path = self.path_for(id);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::Missing(id.to_string()));
            }
            Err(source) => return Err(ArtifactError::Io { source, path }),
        };
        Ok(Box::pin(ReaderStream::new(file)))
    }

    pub async fn remove(&self, id: &str) -> ArtifactResult<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Io { source, path }),
        }
    }

    /// Sweeps the library for artifact count and size, skipping staging.
    pub fn stats(&self) -> ArtifactStats {
        let mut stats = ArtifactStats::default();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != STAGING_DIR)
            .flatten()
        {
            if entry.file_type().is_file() {
                stats.files += 1;
                stats.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }

    async fn compute_sha256(&self, path: &Path) -> ArtifactResult<String> {
        let bytes = fs::read(path).await.map_err(|source| ArtifactError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn promote_makes_artifact_visible_atomically() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let staged = store.stage_path().await.unwrap();
        fs::write(&staged, b"encoded audio").await.unwrap();
        assert!(!store.exists("abc123"));

        let checksum = store.promote(&staged, "abc123").await.unwrap();
        assert_eq!(checksum.len(), 64);
        assert!(store.exists("abc123"));
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn open_streams_artifact_bytes() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let staged = store.stage_path().await.unwrap();
        fs::write(&staged, b"payload").await.unwrap();
        store.promote(&staged, "song").await.unwrap();

        let mut stream = store.open("song").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"payload");

        assert!(matches!(
            store.open("missing").await,
            Err(ArtifactError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn stats_skip_staging_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let staged = store.stage_path().await.unwrap();
        fs::write(&staged, b"partial").await.unwrap();

        let other = store.stage_path().await.unwrap();
        fs::write(&other, b"done").await.unwrap();
        store.promote(&other, "kept").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.total_bytes, 4);
    }

    #[tokio::test]
    async fn ids_are_sanitized_into_file_names() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.path_for("a/b:c?d");
        assert!(path.ends_with("abcd.mp3"));
    }
}
