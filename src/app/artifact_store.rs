use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::export::FormatId;

/// Blob storage for exported bytes. One object per document and format.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn locator(&self, document_id: &str, format: FormatId) -> String;

    /// Stores `bytes`, replacing any earlier object, and returns its locator.
    async fn put(&self, document_id: &str, format: FormatId, bytes: Vec<u8>) -> anyhow::Result<String>;
    async fn get(&self, document_id: &str, format: FormatId) -> anyhow::Result<Option<Vec<u8>>>;
    async fn delete_all(&self, document_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsArtifactStore {
    base_dir: PathBuf,
}

impl LocalFsArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn files_dir(&self, document_id: &str) -> PathBuf {
        self.base_dir.join("documents").join(document_id).join("files")
    }

    pub fn artifact_path(&self, document_id: &str, format: FormatId) -> PathBuf {
        self.files_dir(document_id)
            .join(format!("{document_id}.{}", format.extension()))
    }
}

#[async_trait]
impl ArtifactStore for LocalFsArtifactStore {
    fn locator(&self, document_id: &str, format: FormatId) -> String {
        format!("file://{}", self.artifact_path(document_id, format).display())
    }

    async fn put(&self, document_id: &str, format: FormatId, bytes: Vec<u8>) -> anyhow::Result<String> {
        ensure_safe_id(document_id)?;
        let path = self.artifact_path(document_id, format);
        write_atomic(&path, &bytes).await?;
        Ok(self.locator(document_id, format))
    }

    async fn get(&self, document_id: &str, format: FormatId) -> anyhow::Result<Option<Vec<u8>>> {
        if ensure_safe_id(document_id).is_err() {
            return Ok(None);
        }
        let path = self.artifact_path(document_id, format);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read artifact: {}", path.display())),
        }
    }

    async fn delete_all(&self, document_id: &str) -> anyhow::Result<()> {
        ensure_safe_id(document_id)?;
        let dir = self.files_dir(document_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove artifacts: {}", dir.display())),
        }
    }
}

/// Keeps artifacts in process memory. Used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<(String, FormatId), Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn locator(&self, document_id: &str, format: FormatId) -> String {
        format!("memory://{document_id}/{}", format.extension())
    }

    async fn put(&self, document_id: &str, format: FormatId, bytes: Vec<u8>) -> anyhow::Result<String> {
        self.objects
            .write()
            .await
            .insert((document_id.to_owned(), format), bytes);
        Ok(self.locator(document_id, format))
    }

    async fn get(&self, document_id: &str, format: FormatId) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(document_id.to_owned(), format))
            .cloned())
    }

    async fn delete_all(&self, document_id: &str) -> anyhow::Result<()> {
        self.objects
            .write()
            .await
            .retain(|(id, _), _| id != document_id);
        Ok(())
    }
}

/// Rejects ids that could escape the storage directory.
pub(crate) fn ensure_safe_id(id: &str) -> anyhow::Result<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        anyhow::bail!("invalid document id: {id:?}");
    }
    Ok(())
}

pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
