use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::{Value, json};
use textbookify::app::artifact_store::{ArtifactStore, InMemoryArtifactStore};
use textbookify::app::document_store::{DocumentStore, InMemoryDocumentStore};
use textbookify::app::http::router;
use textbookify::app::service::TextbookService;
use textbookify::config::PipelineConfig;
use textbookify::enrich::Enricher;
use textbookify::synth::{Synthesizer, TemplateEngine};
use tower::ServiceExt as _;

fn app() -> Router {
    let config = PipelineConfig::default();
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
    let synthesizer = Synthesizer::new(Arc::new(TemplateEngine), Enricher::disabled(), &config);
    router(Arc::new(TextbookService::new(
        &config,
        synthesizer,
        store,
        artifacts,
    )))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, headers, bytes))
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(StatusCode, Value)> {
    let (status, _, bytes) = send(app, method, uri, body).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn generate_completed(app: &Router) -> anyhow::Result<String> {
    let (status, accepted) = send_json(
        app,
        Method::POST,
        "/documents",
        Some(json!({ "topic": "Cell Biology", "num_chapters": 2, "sections_per_chapter": 2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["initial_status"], "draft");
    let id = accepted["document_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing document_id"))?
        .to_owned();

    let uri = format!("/documents/{id}/progress");
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let (status, progress) = send_json(app, Method::GET, &uri, None).await?;
            assert_eq!(status, StatusCode::OK);
            if progress["status"] == "completed" {
                return anyhow::Ok(());
            }
            assert_ne!(progress["status"], "failed", "{progress}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await??;
    Ok(id)
}

#[tokio::test]
async fn health_and_format_catalogue() -> anyhow::Result<()> {
    let app = app();
    let (status, _, body) = send(&app, Method::GET, "/healthz", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok\n");

    let (status, formats) = send_json(&app, Method::GET, "/formats", None).await?;
    assert_eq!(status, StatusCode::OK);
    let formats = formats.as_array().expect("format list");
    assert_eq!(formats.len(), 6);
    let defaults: Vec<&Value> = formats.iter().filter(|f| f["is_default"] == true).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0]["name"], "PDF");
    Ok(())
}

#[tokio::test]
async fn invalid_request_is_a_bad_request() -> anyhow::Result<()> {
    let app = app();
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/documents",
        Some(json!({ "topic": "Cell Biology", "num_chapters": 0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert!(body["message"].as_str().unwrap_or_default().contains("num_chapters"));

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/documents",
        Some(json!({ "topic": "Cell Biology", "num_chapters": 2, "writing_style": "poetic" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap_or_default().contains("writing_style"));
    Ok(())
}

#[tokio::test]
async fn generate_export_and_download() -> anyhow::Result<()> {
    let app = app();
    let id = generate_completed(&app).await?;

    let (status, document) = send_json(&app, Method::GET, &format!("/documents/{id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["status"], "completed");
    assert_eq!(document["chapters"].as_array().map(Vec::len), Some(2));

    let (status, artifact) =
        send_json(&app, Method::POST, &format!("/documents/{id}/exports/pdf"), None).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(artifact["format"], "PDF");
    assert!(artifact["byte_size"].as_u64().unwrap_or_default() > 0);

    let (status, recorded) =
        send_json(&app, Method::GET, &format!("/documents/{id}/exports/PDF"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recorded, artifact);

    let (status, headers, bytes) = send(
        &app,
        Method::GET,
        &format!("/documents/{id}/exports/pdf/download"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()?
            .contains(&format!("{id}.pdf"))
    );
    assert!(bytes.starts_with(b"%PDF-"));

    let (status, summaries) = send_json(&app, Method::GET, "/documents", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summaries[0]["document_id"], id.as_str());
    assert_eq!(summaries[0]["exported_formats"], json!(["PDF"]));
    Ok(())
}

#[tokio::test]
async fn export_status_reports_each_format() -> anyhow::Result<()> {
    let app = app();
    let id = generate_completed(&app).await?;
    let uri = format!("/documents/{id}/exports");

    let (status, before) = send_json(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before["status"], "completed");
    assert_eq!(before["formats"].as_object().map(|m| m.len()), Some(6));
    assert!(before["formats"].as_object().into_iter().flatten().all(|(_, v)| v == "not_exported"));
    assert_eq!(before["last_exported"], Value::Null);

    send_json(&app, Method::POST, &format!("/documents/{id}/exports/md"), None).await?;
    let (_, artifact) =
        send_json(&app, Method::POST, &format!("/documents/{id}/exports/epub"), None).await?;

    let (status, after) = send_json(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["formats"]["MD"], "available");
    assert_eq!(after["formats"]["EPUB"], "available");
    assert_eq!(after["formats"]["PDF"], "not_exported");
    assert_eq!(after["last_exported"], artifact["produced_at"]);

    let (status, body) = send_json(&app, Method::GET, "/documents/missing/exports", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    Ok(())
}

#[tokio::test]
async fn export_errors_map_to_status_codes() -> anyhow::Result<()> {
    let app = app();
    let id = generate_completed(&app).await?;

    let (status, body) =
        send_json(&app, Method::POST, &format!("/documents/{id}/exports/rtf"), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_format");
    assert_eq!(body["supported"].as_array().map(Vec::len), Some(6));

    let (status, body) =
        send_json(&app, Method::GET, &format!("/documents/{id}/exports/epub"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "artifact_not_found");

    let (status, body) =
        send_json(&app, Method::POST, "/documents/missing/exports/pdf", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    Ok(())
}

#[tokio::test]
async fn preview_events_cancel_and_delete() -> anyhow::Result<()> {
    let app = app();
    let id = generate_completed(&app).await?;

    let (status, preview) =
        send_json(&app, Method::GET, &format!("/documents/{id}/preview?chapter=1"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["chapter"], 1);
    assert!(
        preview["preview"]
            .as_str()
            .unwrap_or_default()
            .starts_with("## Chapter 1: ")
    );
    let (status, body) =
        send_json(&app, Method::GET, &format!("/documents/{id}/preview?chapter=7"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "chapter_not_found");

    let (status, headers, bytes) =
        send(&app, Method::GET, &format!("/documents/{id}/events"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    let events = String::from_utf8(bytes.to_vec())?;
    assert!(events.contains("event: progress"), "{events}");
    assert!(events.contains(r#""status":"completed""#), "{events}");

    let (status, outcome) =
        send_json(&app, Method::POST, &format!("/documents/{id}/cancel"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["cancelled"], false);

    let (status, _) = send_json(&app, Method::DELETE, &format!("/documents/{id}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send_json(&app, Method::GET, &format!("/documents/{id}"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    Ok(())
}
