use thiserror::Error;

use crate::formats::DocumentStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("topic must be between {min} and {max} characters (got {len})")]
    TopicLength { len: usize, min: usize, max: usize },

    #[error("invalid value `{value}` for `{field}` (expected one of: {})", expected.join(", "))]
    InvalidEnumValue {
        field: &'static str,
        value: String,
        expected: Vec<&'static str>,
    },

    #[error("`{field}` must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("could not title {unit} without using excluded topic `{term}`")]
    PlanningExhausted { unit: String, term: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("document {document_id}: illegal status transition {from} -> {to}")]
pub struct StateError {
    pub document_id: String,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("{unit}: {reason}")]
    Fatal { unit: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("progress observer failed")]
    Observer(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("no progress record for document {0}")]
    NotFound(String),

    #[error("progress for document {0} is already terminal")]
    Terminal(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("document {document_id} is {status}; only completed documents can be exported")]
    DocumentNotReady {
        document_id: String,
        status: DocumentStatus,
    },

    #[error("unsupported export format `{requested}` (supported: {})", supported.join(", "))]
    UnsupportedFormat {
        requested: String,
        supported: Vec<&'static str>,
    },

    #[error("render {format}")]
    Render {
        format: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("store artifact")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures surfaced by the service façade, one variant per caller-visible case.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document {document_id} has no chapter {chapter}")]
    ChapterNotFound { document_id: String, chapter: u32 },

    #[error("document {0} is already generating")]
    AlreadyGenerating(String),

    #[error("document {document_id} has no {format} export")]
    ArtifactNotFound {
        document_id: String,
        format: crate::export::FormatId,
    },

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("storage: {0:#}")]
    Storage(anyhow::Error),
}
