use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::app::artifact_store::{ensure_safe_id, write_atomic};
use crate::export::FormatId;
use crate::formats::{Document, ExportArtifact};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, document: &Document) -> anyhow::Result<()>;
    async fn get(&self, document_id: &str) -> anyhow::Result<Option<Document>>;
    async fn put(&self, document: &Document) -> anyhow::Result<()>;
    /// Every stored document, oldest first.
    async fn list(&self) -> anyhow::Result<Vec<Document>>;
    /// Returns whether anything was removed.
    async fn delete(&self, document_id: &str) -> anyhow::Result<bool>;
    async fn put_artifact(&self, artifact: &ExportArtifact) -> anyhow::Result<()>;
    async fn get_artifact(
        &self,
        document_id: &str,
        format: FormatId,
    ) -> anyhow::Result<Option<ExportArtifact>>;
}

#[derive(Debug, Clone)]
pub struct LocalFsDocumentStore {
    base_dir: PathBuf,
}

impl LocalFsDocumentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn documents_dir(&self) -> PathBuf {
        self.base_dir.join("documents")
    }

    fn document_dir(&self, document_id: &str) -> PathBuf {
        self.documents_dir().join(document_id)
    }

    fn document_json_path(&self, document_id: &str) -> PathBuf {
        self.document_dir(document_id).join("document.json")
    }

    fn artifact_json_path(&self, document_id: &str, format: FormatId) -> PathBuf {
        self.document_dir(document_id)
            .join("artifacts")
            .join(format!("{}.json", format.extension()))
    }
}

#[async_trait]
impl DocumentStore for LocalFsDocumentStore {
    async fn create(&self, document: &Document) -> anyhow::Result<()> {
        ensure_safe_id(&document.id)?;
        let path = self.document_json_path(&document.id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            anyhow::bail!("document already exists: {}", document.id);
        }
        write_json_atomic(&path, document)
            .await
            .context("write document.json")
    }

    async fn get(&self, document_id: &str) -> anyhow::Result<Option<Document>> {
        if ensure_safe_id(document_id).is_err() {
            return Ok(None);
        }
        let path = self.document_json_path(document_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put(&self, document: &Document) -> anyhow::Result<()> {
        ensure_safe_id(&document.id)?;
        write_json_atomic(&self.document_json_path(&document.id), document)
            .await
            .context("write document.json")
    }

    async fn list(&self) -> anyhow::Result<Vec<Document>> {
        let dir = self.documents_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list dir: {}", dir.display()))?
        {
            let path = entry.path().join("document.json");
            match read_json::<Document>(&path).await {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => {}
                Err(err) => tracing::warn!(path = %path.display(), ?err, "skipping unreadable document"),
            }
        }
        sort_oldest_first(&mut documents);
        Ok(documents)
    }

    async fn delete(&self, document_id: &str) -> anyhow::Result<bool> {
        if ensure_safe_id(document_id).is_err() {
            return Ok(false);
        }
        let dir = self.document_dir(document_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove: {}", dir.display())),
        }
    }

    async fn put_artifact(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        ensure_safe_id(&artifact.document_id)?;
        let path = self.artifact_json_path(&artifact.document_id, artifact.format);
        write_json_atomic(&path, artifact)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    async fn get_artifact(
        &self,
        document_id: &str,
        format: FormatId,
    ) -> anyhow::Result<Option<ExportArtifact>> {
        if ensure_safe_id(document_id).is_err() {
            return Ok(None);
        }
        let path = self.artifact_json_path(document_id, format);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
    artifacts: RwLock<HashMap<(String, FormatId), ExportArtifact>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, document: &Document) -> anyhow::Result<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id) {
            anyhow::bail!("document already exists: {}", document.id);
        }
        documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get(&self, document_id: &str) -> anyhow::Result<Option<Document>> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn put(&self, document: &Document) -> anyhow::Result<()> {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.documents.read().await.values().cloned().collect();
        sort_oldest_first(&mut documents);
        Ok(documents)
    }

    async fn delete(&self, document_id: &str) -> anyhow::Result<bool> {
        self.artifacts
            .write()
            .await
            .retain(|(id, _), _| id != document_id);
        Ok(self.documents.write().await.remove(document_id).is_some())
    }

    async fn put_artifact(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        self.artifacts.write().await.insert(
            (artifact.document_id.clone(), artifact.format),
            artifact.clone(),
        );
        Ok(())
    }

    async fn get_artifact(
        &self,
        document_id: &str,
        format: FormatId,
    ) -> anyhow::Result<Option<ExportArtifact>> {
        Ok(self
            .artifacts
            .read()
            .await
            .get(&(document_id.to_owned(), format))
            .cloned())
    }
}

fn sort_oldest_first(documents: &mut [Document]) {
    documents.sort_by(|a, b| {
        planned_at(a)
            .cmp(planned_at(b))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn planned_at(document: &Document) -> &str {
    document
        .metadata
        .get("planned_at")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    write_atomic(path, &data).await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::formats::RawGenerationRequest;
    use crate::{params, plan};

    fn document(topic: &str) -> Document {
        plan::plan(&params::validate(&RawGenerationRequest::new(topic, 1)).unwrap()).unwrap()
    }

    fn artifact(document_id: &str) -> ExportArtifact {
        ExportArtifact {
            document_id: document_id.to_owned(),
            format: FormatId::Markdown,
            produced_at: Utc::now(),
            byte_size: 3,
            locator: "memory://x/md".to_owned(),
            sha256: "00".to_owned(),
        }
    }

    async fn exercise(store: &dyn DocumentStore) {
        let doc = document("Cell Biology");
        store.create(&doc).await.unwrap();
        assert!(store.create(&doc).await.is_err());

        let mut loaded = store.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
        loaded.title = "Renamed".to_owned();
        store.put(&loaded).await.unwrap();
        assert_eq!(store.get(&doc.id).await.unwrap().unwrap().title, "Renamed");

        let other = document("Geology");
        store.create(&other).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.put_artifact(&artifact(&doc.id)).await.unwrap();
        let stored = store.get_artifact(&doc.id, FormatId::Markdown).await.unwrap();
        assert_eq!(stored.unwrap().byte_size, 3);
        assert!(store.get_artifact(&doc.id, FormatId::Pdf).await.unwrap().is_none());

        assert!(store.delete(&doc.id).await.unwrap());
        assert!(!store.delete(&doc.id).await.unwrap());
        assert!(store.get(&doc.id).await.unwrap().is_none());
        assert!(store.get_artifact(&doc.id, FormatId::Markdown).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_fs_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsDocumentStore::new(dir.path());
        exercise(&store).await;
        assert!(store.get("../etc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        exercise(&InMemoryDocumentStore::new()).await;
    }
}
