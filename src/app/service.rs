//! Caller-facing operations over the generation pipeline.
//!
//! The HTTP router and the tests talk to this façade. It owns the
//! document store, the progress arena and the background queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use crate::app::artifact_store::ArtifactStore;
use crate::app::document_store::DocumentStore;
use crate::app::model::{
    CancelOutcome, DocumentSummary, ExportState, ExportStatus, GenerateAccepted,
};
use crate::app::preview::{self, Preview};
use crate::app::queue::InProcessQueue;
use crate::app::runner::GenerationRunner;
use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::export::{Exporter, FormatId};
use crate::formats::{Document, DocumentStatus, ExportArtifact, ProgressRecord, RawGenerationRequest};
use crate::progress::ProgressTracker;
use crate::synth::Synthesizer;
use crate::{params, plan};

/// How long a delete waits for a cancelled run to reach a unit boundary.
const RUN_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TextbookService {
    store: Arc<dyn DocumentStore>,
    tracker: ProgressTracker,
    runner: Arc<GenerationRunner>,
    queue: InProcessQueue,
    exporter: Exporter,
    preview_max_chars: usize,
    /// Serializes read-modify-write of `exported_formats`.
    export_lock: Mutex<()>,
}

impl TextbookService {
    pub fn new(
        config: &PipelineConfig,
        synthesizer: Synthesizer,
        store: Arc<dyn DocumentStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let tracker = ProgressTracker::new();
        let runner = Arc::new(GenerationRunner::new(
            Arc::clone(&store),
            tracker.clone(),
            synthesizer,
        ));
        Self {
            store,
            tracker,
            runner,
            queue: InProcessQueue::new(config.generation.max_concurrency),
            exporter: Exporter::new(artifacts),
            preview_max_chars: config.preview.max_chars,
            export_lock: Mutex::new(()),
        }
    }

    pub fn runner(&self) -> &GenerationRunner {
        &self.runner
    }

    /// Validates and plans a request, then queues its generation.
    pub async fn generate(
        &self,
        raw: &RawGenerationRequest,
    ) -> Result<GenerateAccepted, ServiceError> {
        let request = params::validate(raw)?;
        let document = plan::plan(&request)?;
        self.store
            .create(&document)
            .await
            .map_err(ServiceError::Storage)?;
        self.tracker.register(&document.id);

        let guard = self
            .runner
            .try_acquire(&document.id)
            .ok_or_else(|| ServiceError::AlreadyGenerating(document.id.clone()))?;
        let runner = Arc::clone(&self.runner);
        self.queue.spawn(async move { runner.run(guard).await });

        tracing::info!(
            document_id = %document.id,
            topic = %request.topic,
            chapters = request.num_chapters,
            sections_per_chapter = request.sections_per_chapter,
            "generation queued"
        );
        Ok(GenerateAccepted {
            document_id: document.id,
            initial_status: document.status,
        })
    }

    /// Live progress, or a snapshot derived from the stored document when
    /// this process never tracked it.
    pub async fn progress(&self, document_id: &str) -> Result<ProgressRecord, ServiceError> {
        if let Some(record) = self.tracker.read(document_id) {
            return Ok(record);
        }
        let document = self.load(document_id).await?;
        Ok(snapshot(&document))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressRecord> {
        self.tracker.subscribe()
    }

    pub async fn document(&self, document_id: &str) -> Result<Document, ServiceError> {
        self.load(document_id).await
    }

    pub async fn list(&self) -> Result<Vec<DocumentSummary>, ServiceError> {
        let documents = self.store.list().await.map_err(ServiceError::Storage)?;
        Ok(documents.iter().map(DocumentSummary::from).collect())
    }

    pub async fn preview(
        &self,
        document_id: &str,
        chapter: Option<u32>,
    ) -> Result<Preview, ServiceError> {
        let document = self.load(document_id).await?;
        preview::preview(&document, chapter, self.preview_max_chars).ok_or_else(|| {
            ServiceError::ChapterNotFound {
                document_id: document_id.to_owned(),
                chapter: chapter.unwrap_or_default(),
            }
        })
    }

    /// Converts a completed document and records the artifact.
    pub async fn export(
        &self,
        document_id: &str,
        format: &str,
    ) -> Result<ExportArtifact, ServiceError> {
        let format = FormatId::parse(format)?;
        let document = self.load(document_id).await?;
        let artifact = self.exporter.export(&document, format).await?;
        self.store
            .put_artifact(&artifact)
            .await
            .map_err(ServiceError::Storage)?;

        let _guard = self.export_lock.lock().await;
        let mut latest = self.load(document_id).await?;
        if latest.exported_formats.insert(format) {
            latest.set_metadata("last_exported_at", Utc::now().to_rfc3339());
            self.store
                .put(&latest)
                .await
                .map_err(ServiceError::Storage)?;
        }
        Ok(artifact)
    }

    pub async fn exported_artifact(
        &self,
        document_id: &str,
        format: &str,
    ) -> Result<ExportArtifact, ServiceError> {
        let format = FormatId::parse(format)?;
        self.load(document_id).await?;
        self.store
            .get_artifact(document_id, format)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::ArtifactNotFound {
                document_id: document_id.to_owned(),
                format,
            })
    }

    /// Which formats have a stored artifact, and when the newest was produced.
    pub async fn export_status(&self, document_id: &str) -> Result<ExportStatus, ServiceError> {
        let document = self.load(document_id).await?;
        let mut formats = BTreeMap::new();
        let mut last_exported = None;
        for format in FormatId::ALL {
            let artifact = self
                .store
                .get_artifact(document_id, format)
                .await
                .map_err(ServiceError::Storage)?;
            let state = match artifact {
                Some(artifact) => {
                    last_exported = last_exported.max(Some(artifact.produced_at));
                    ExportState::Available
                }
                None => ExportState::NotExported,
            };
            formats.insert(format, state);
        }
        Ok(ExportStatus {
            document_id: document.id,
            status: document.status,
            formats,
            last_exported,
        })
    }

    /// The artifact record together with its stored bytes.
    pub async fn artifact_bytes(
        &self,
        document_id: &str,
        format: &str,
    ) -> Result<(ExportArtifact, Vec<u8>), ServiceError> {
        let artifact = self.exported_artifact(document_id, format).await?;
        let bytes = self
            .exporter
            .store()
            .get(document_id, artifact.format)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::ArtifactNotFound {
                document_id: document_id.to_owned(),
                format: artifact.format,
            })?;
        Ok((artifact, bytes))
    }

    pub async fn cancel(&self, document_id: &str) -> Result<CancelOutcome, ServiceError> {
        self.load(document_id).await?;
        let cancelled = self.runner.cancel(document_id);
        tracing::info!(document_id, cancelled, "cancel requested");
        Ok(CancelOutcome {
            document_id: document_id.to_owned(),
            cancelled,
        })
    }

    /// Removes the document, its artifacts and its progress record.
    pub async fn delete(&self, document_id: &str) -> Result<(), ServiceError> {
        if self.runner.cancel(document_id)
            && !self.runner.wait_released(document_id, RUN_RELEASE_TIMEOUT).await
        {
            tracing::warn!(document_id, "generation still running; deleting anyway");
        }
        self.exporter
            .store()
            .delete_all(document_id)
            .await
            .map_err(ServiceError::Storage)?;
        let removed = self
            .store
            .delete(document_id)
            .await
            .map_err(ServiceError::Storage)?;
        self.tracker.remove(document_id);
        if !removed {
            return Err(ServiceError::NotFound(document_id.to_owned()));
        }
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    async fn load(&self, document_id: &str) -> Result<Document, ServiceError> {
        self.store
            .get(document_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::NotFound(document_id.to_owned()))
    }
}

fn snapshot(document: &Document) -> ProgressRecord {
    let total = document.total_sections();
    let filled = document.filled_sections();
    let fraction_complete = match document.status {
        DocumentStatus::Completed => 1.0,
        _ if total == 0 => 0.0,
        _ => filled as f64 / total as f64,
    };
    let message = document
        .metadata
        .get("failure")
        .and_then(|v| v.as_str())
        .unwrap_or(document.status.as_str())
        .to_owned();
    ProgressRecord {
        document_id: document.id.clone(),
        status: document.status,
        fraction_complete,
        message,
        completed_units: filled,
        total_units: total,
        updated_at: Utc::now(),
    }
}
