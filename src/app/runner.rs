use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::app::document_store::DocumentStore;
use crate::error::SynthesisError;
use crate::formats::{Document, DocumentStatus};
use crate::progress::ProgressTracker;
use crate::synth::{SynthesisObserver, Synthesizer, UnitAddress};

type ActiveMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

const RELEASE_POLL: Duration = Duration::from_millis(10);

/// Drives one document at a time through synthesis and records the outcome.
pub struct GenerationRunner {
    store: Arc<dyn DocumentStore>,
    tracker: ProgressTracker,
    synthesizer: Synthesizer,
    active: ActiveMap,
}

/// Exclusive claim on a document's generation. Released on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    document_id: String,
    cancel: CancellationToken,
    active: ActiveMap,
}

impl ActiveGuard {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.document_id);
    }
}

impl GenerationRunner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tracker: ProgressTracker,
        synthesizer: Synthesizer,
    ) -> Self {
        Self {
            store,
            tracker,
            synthesizer,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claims `document_id`, or returns `None` while another run holds it.
    pub fn try_acquire(&self, document_id: &str) -> Option<ActiveGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(document_id) {
            return None;
        }
        let cancel = CancellationToken::new();
        active.insert(document_id.to_owned(), cancel.clone());
        Some(ActiveGuard {
            document_id: document_id.to_owned(),
            cancel,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, document_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(document_id)
    }

    /// Waits until no run holds `document_id`, up to `limit`. Returns whether it was released.
    pub async fn wait_released(&self, document_id: &str, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while self.is_active(document_id) {
                tokio::time::sleep(RELEASE_POLL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Signals the running generation, if any. Takes effect at the next unit boundary.
    pub fn cancel(&self, document_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(document_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn run(&self, guard: ActiveGuard) {
        let document_id = guard.document_id.clone();
        match self.try_run(&document_id, &guard.cancel).await {
            Ok(()) => tracing::info!(document_id, "generation completed"),
            Err(err) => {
                let message = failure_message(&err);
                tracing::error!(document_id, ?err, "generation failed");
                if let Err(err) = self.mark_failed(&document_id, &message).await {
                    tracing::error!(document_id, ?err, "could not record failure");
                }
            }
        }
        drop(guard);
    }

    async fn try_run(&self, document_id: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut document = self
            .store
            .get(document_id)
            .await
            .context("load document")?
            .ok_or_else(|| anyhow::anyhow!("document not found: {document_id}"))?;

        document.transition(DocumentStatus::Generating)?;
        document.set_metadata("generation_started_at", Utc::now().to_rfc3339());
        document.set_metadata("prose_engine", self.synthesizer.engine_name());
        save_existing(self.store.as_ref(), &document).await?;
        self.tracker.start(document_id, document.total_sections())?;
        tracing::info!(
            document_id,
            sections = document.total_sections(),
            engine = self.synthesizer.engine_name(),
            "generation started"
        );

        let observer = StoreProgressObserver {
            store: self.store.as_ref(),
            tracker: &self.tracker,
        };
        self.synthesizer
            .synthesize(&mut document, &observer, cancel)
            .await?;

        document.transition(DocumentStatus::Completed)?;
        document.set_metadata("completed_at", Utc::now().to_rfc3339());
        save_existing(self.store.as_ref(), &document).await?;
        self.tracker.complete(document_id)?;
        Ok(())
    }

    async fn mark_failed(&self, document_id: &str, message: &str) -> anyhow::Result<()> {
        let Some(mut document) = self.store.get(document_id).await? else {
            tracing::info!(document_id, "document deleted during generation");
            return Ok(());
        };
        if document.transition(DocumentStatus::Failed).is_ok() {
            document.set_metadata("failure", message);
            document.set_metadata("failed_at", Utc::now().to_rfc3339());
            self.store.put(&document).await?;
        }
        if let Err(err) = self.tracker.fail(document_id, message) {
            tracing::debug!(document_id, %err, "progress not updated");
        }
        Ok(())
    }
}

/// Caller-facing text for a failed run: "cancelled", or the failing unit and reason.
fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<SynthesisError>() {
        Some(err @ (SynthesisError::Cancelled | SynthesisError::Fatal { .. })) => err.to_string(),
        _ => format!("{err:#}"),
    }
}

/// Writes `document` back only while it is still stored, so a delete is never undone.
async fn save_existing(store: &dyn DocumentStore, document: &Document) -> anyhow::Result<()> {
    if store.get(&document.id).await.context("load document")?.is_none() {
        anyhow::bail!("document {} was deleted", document.id);
    }
    store.put(document).await.context("save document")
}

struct StoreProgressObserver<'a> {
    store: &'a dyn DocumentStore,
    tracker: &'a ProgressTracker,
}

#[async_trait]
impl SynthesisObserver for StoreProgressObserver<'_> {
    async fn section_completed(&self, document: &Document, unit: &UnitAddress) -> anyhow::Result<()> {
        save_existing(self.store, document).await?;
        self.tracker.advance(&document.id, &format!("{unit} completed"))?;
        Ok(())
    }
}
