use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::stream::{self, Stream, StreamExt as _};
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::app::service::TextbookService;
use crate::error::{ExportError, ServiceError};
use crate::export::FormatId;
use crate::formats::{ProgressRecord, RawGenerationRequest};

#[derive(Clone)]
struct AppState {
    service: Arc<TextbookService>,
}

pub fn router(service: Arc<TextbookService>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/formats", get(|| async { Json(FormatId::catalogue()) }))
        .route("/documents", post(generate).get(list_documents))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/progress", get(get_progress))
        .route("/documents/:id/events", get(progress_events))
        .route("/documents/:id/preview", get(get_preview))
        .route("/documents/:id/cancel", post(cancel_generation))
        .route("/documents/:id/exports", get(get_export_status))
        .route(
            "/documents/:id/exports/:format",
            post(export_document).get(get_exported_artifact),
        )
        .route("/documents/:id/exports/:format/download", get(download_artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

/// JSON error body with a status derived from the failure kind.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ServiceError::Planning(_) => (StatusCode::UNPROCESSABLE_ENTITY, "planning_exhausted"),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::ChapterNotFound { .. } => (StatusCode::NOT_FOUND, "chapter_not_found"),
            ServiceError::ArtifactNotFound { .. } => (StatusCode::NOT_FOUND, "artifact_not_found"),
            ServiceError::AlreadyGenerating(_) => (StatusCode::CONFLICT, "already_generating"),
            ServiceError::Export(ExportError::DocumentNotReady { .. }) => {
                (StatusCode::CONFLICT, "document_not_ready")
            }
            ServiceError::Export(ExportError::UnsupportedFormat { .. }) => {
                (StatusCode::BAD_REQUEST, "unsupported_format")
            }
            ServiceError::Export(ExportError::Render { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "render")
            }
            ServiceError::Export(ExportError::Store(_)) | ServiceError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(err = ?self.0, "request failed");
        }
        let mut body = serde_json::json!({
            "error": kind,
            "message": error_chain(&self.0),
        });
        if let Some(obj) = body.as_object_mut()
            && kind == "unsupported_format"
        {
            obj.insert("supported".to_owned(), serde_json::json!(FormatId::supported_names()));
        }
        (status, Json(body)).into_response()
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn generate(
    State(state): State<AppState>,
    Json(raw): Json<RawGenerationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let accepted = state.service.generate(&raw).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn list_documents(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list().await?))
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.document(&id).await?))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.progress(&id).await?))
}

struct EventCursor {
    rx: broadcast::Receiver<ProgressRecord>,
    pending: Option<ProgressRecord>,
    finished: bool,
    document_id: String,
}

/// Server-sent progress events for one document, ending after a terminal record.
async fn progress_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Subscribe before the snapshot so no update falls in between.
    let rx = state.service.subscribe();
    let initial = state.service.progress(&id).await?;
    let cursor = EventCursor {
        rx,
        pending: Some(initial),
        finished: false,
        document_id: id,
    };

    let records = stream::unfold(cursor, |mut cursor| async move {
        if let Some(record) = cursor.pending.take() {
            cursor.finished = record.status.is_terminal();
            return Some((record, cursor));
        }
        if cursor.finished {
            return None;
        }
        loop {
            match cursor.rx.recv().await {
                Ok(record) if record.document_id == cursor.document_id => {
                    cursor.finished = record.status.is_terminal();
                    return Some((record, cursor));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let events = records.map(|record| Event::default().event("progress").json_data(&record));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    chapter: Option<u32>,
}

async fn get_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.preview(&id, query.chapter).await?))
}

async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.cancel(&id).await?;
    let status = if outcome.cancelled {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

async fn export_document(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = state.service.export(&id, &format).await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn get_export_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.export_status(&id).await?))
}

async fn get_exported_artifact(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.exported_artifact(&id, &format).await?))
}

async fn download_artifact(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (artifact, bytes) = state.service.artifact_bytes(&id, &format).await?;
    let mut resp = Response::new(axum::body::Body::from(bytes));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.format.media_type()),
    );
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        artifact.document_id,
        artifact.format.extension()
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        resp.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(resp)
}
