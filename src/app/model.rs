use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::export::FormatId;
use crate::formats::{Document, DocumentStatus};

/// Response to a generation request. Generation itself runs in the background.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateAccepted {
    pub document_id: String,
    pub initial_status: DocumentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub document_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub chapters: usize,
    pub total_sections: u64,
    pub filled_sections: u64,
    pub exported_formats: BTreeSet<FormatId>,
    pub planned_at: Option<String>,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            title: document.title.clone(),
            status: document.status,
            chapters: document.chapters.len(),
            total_sections: document.total_sections(),
            filled_sections: document.filled_sections(),
            exported_formats: document.exported_formats.clone(),
            planned_at: document
                .metadata
                .get("planned_at")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelOutcome {
    pub document_id: String,
    /// False when no generation was running.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Available,
    NotExported,
}

/// Stored artifacts per format for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportStatus {
    pub document_id: String,
    pub status: DocumentStatus,
    pub formats: BTreeMap<FormatId, ExportState>,
    /// Production time of the newest stored artifact.
    pub last_exported: Option<DateTime<Utc>>,
}
