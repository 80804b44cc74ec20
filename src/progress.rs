//! Progress tracking for document generation.
//!
//! One record per document, kept in an arena keyed by document id. Every
//! mutation is also pushed to subscribers over a broadcast channel so the
//! HTTP layer can stream updates without polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::ProgressError;
use crate::formats::{DocumentStatus, ProgressRecord};

const CHANNEL_CAPACITY: usize = 256;

type Slot = Arc<Mutex<ProgressRecord>>;

/// Tracks progress for all documents.
#[derive(Clone)]
pub struct ProgressTracker {
    records: Arc<RwLock<HashMap<String, Slot>>>,
    /// Channel to notify listeners of progress changes
    notify_tx: broadcast::Sender<ProgressRecord>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            notify_tx,
        }
    }

    /// Creates a draft record at zero progress, replacing any previous one.
    pub fn register(&self, document_id: &str) -> ProgressRecord {
        let record = ProgressRecord {
            document_id: document_id.to_owned(),
            status: DocumentStatus::Draft,
            fraction_complete: 0.0,
            message: "queued".to_owned(),
            completed_units: 0,
            total_units: 0,
            updated_at: Utc::now(),
        };
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_owned(), Arc::new(Mutex::new(record.clone())));
        self.publish(&record);
        record
    }

    /// Moves the record to `generating` with `total_units` to fill.
    pub fn start(&self, document_id: &str, total_units: u64) -> Result<ProgressRecord, ProgressError> {
        self.mutate(document_id, |record| {
            record.status = DocumentStatus::Generating;
            record.total_units = total_units;
            record.completed_units = 0;
            record.fraction_complete = 0.0;
            record.message = "generating".to_owned();
        })
    }

    /// Counts one more finished unit.
    pub fn advance(&self, document_id: &str, message: &str) -> Result<ProgressRecord, ProgressError> {
        self.mutate(document_id, |record| {
            record.completed_units = (record.completed_units + 1).min(record.total_units.max(1));
            let fraction = if record.total_units == 0 {
                1.0
            } else {
                record.completed_units as f64 / record.total_units as f64
            };
            // Never move backwards, even if totals were reset mid-flight.
            record.fraction_complete = fraction.clamp(record.fraction_complete, 1.0);
            record.message = message.to_owned();
        })
    }

    pub fn complete(&self, document_id: &str) -> Result<ProgressRecord, ProgressError> {
        self.mutate(document_id, |record| {
            record.status = DocumentStatus::Completed;
            record.completed_units = record.total_units;
            record.fraction_complete = 1.0;
            record.message = "completed".to_owned();
        })
    }

    /// Marks the record failed. The fraction keeps its last value.
    pub fn fail(&self, document_id: &str, message: &str) -> Result<ProgressRecord, ProgressError> {
        self.mutate(document_id, |record| {
            record.status = DocumentStatus::Failed;
            record.message = message.to_owned();
        })
    }

    pub fn read(&self, document_id: &str) -> Option<ProgressRecord> {
        let slot = self.slot(document_id)?;
        let record = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(record)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressRecord> {
        self.notify_tx.subscribe()
    }

    pub fn remove(&self, document_id: &str) -> Option<ProgressRecord> {
        let slot = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)?;
        let record = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(record)
    }

    fn slot(&self, document_id: &str) -> Option<Slot> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    fn mutate<F>(&self, document_id: &str, apply: F) -> Result<ProgressRecord, ProgressError>
    where
        F: FnOnce(&mut ProgressRecord),
    {
        let slot = self
            .slot(document_id)
            .ok_or_else(|| ProgressError::NotFound(document_id.to_owned()))?;
        let snapshot = {
            let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if record.status.is_terminal() {
                return Err(ProgressError::Terminal(document_id.to_owned()));
            }
            apply(&mut record);
            record.updated_at = Utc::now();
            record.clone()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }

    fn publish(&self, record: &ProgressRecord) {
        // No receivers is fine; the record stays pollable.
        let _ = self.notify_tx.send(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_monotonically_to_completion() {
        let tracker = ProgressTracker::new();
        tracker.register("doc");
        tracker.start("doc", 4).unwrap();

        let mut last = 0.0;
        for i in 0..4 {
            let record = tracker.advance("doc", &format!("unit {i}")).unwrap();
            assert!(record.fraction_complete >= last);
            last = record.fraction_complete;
        }
        assert_eq!(last, 1.0);

        let done = tracker.complete("doc").unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert_eq!(done.fraction_complete, 1.0);
    }

    #[test]
    fn advance_never_exceeds_one() {
        let tracker = ProgressTracker::new();
        tracker.register("doc");
        tracker.start("doc", 1).unwrap();
        tracker.advance("doc", "a").unwrap();
        let record = tracker.advance("doc", "b").unwrap();
        assert_eq!(record.fraction_complete, 1.0);
        assert_eq!(record.completed_units, 1);
    }

    #[test]
    fn terminal_records_reject_mutation() {
        let tracker = ProgressTracker::new();
        tracker.register("doc");
        tracker.start("doc", 2).unwrap();
        tracker.fail("doc", "boom").unwrap();
        assert_eq!(
            tracker.advance("doc", "late"),
            Err(ProgressError::Terminal("doc".to_owned()))
        );
        let record = tracker.read("doc").unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.message, "boom");
    }

    #[test]
    fn unknown_document_is_not_found() {
        let tracker = ProgressTracker::new();
        assert_eq!(
            tracker.start("missing", 1),
            Err(ProgressError::NotFound("missing".to_owned()))
        );
        assert!(tracker.read("missing").is_none());
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.register("doc");
        tracker.start("doc", 1).unwrap();
        tracker.advance("doc", "1.1").unwrap();

        assert_eq!(rx.recv().await.unwrap().status, DocumentStatus::Draft);
        assert_eq!(rx.recv().await.unwrap().status, DocumentStatus::Generating);
        let advanced = rx.recv().await.unwrap();
        assert_eq!(advanced.message, "1.1");
        assert_eq!(advanced.fraction_complete, 1.0);
    }
}
