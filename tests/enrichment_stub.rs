use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use futures::StreamExt as _;
use textbookify::config::{EnrichmentConfig, PipelineConfig};
use textbookify::enrich::Enricher;
use textbookify::formats::{DocumentStatus, RawGenerationRequest};
use textbookify::synth::{NoopObserver, Synthesizer, TemplateEngine};
use textbookify::{params, plan};
use tokio_util::sync::CancellationToken;

const ARXIV_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>arXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title>Membrane dynamics</title>
    <summary>  Lipid bilayers reorganise under
      mechanical stress &amp; heat.  </summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00002v1</id>
    <title>Organelle transport</title>
    <summary>Motor proteins move cargo along microtubules.</summary>
  </entry>
</feed>
"#;

struct ReferenceStub {
    base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReferenceStub {
    /// Serves Wikipedia summaries and an arXiv feed. `wikipedia_status` other
    /// than 200 makes every summary request fail with that status.
    fn spawn(wikipedia_status: u16) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start reference stub");
        let base_url = format!("http://{}", server.server_addr());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let (status, body, content_type) = if url.starts_with("/api/rest_v1/page/summary/")
                {
                    let body = serde_json::json!({
                        "title": "Cell",
                        "extract": "Cells are the basic structural unit of living things. They were first described in 1665.",
                        "content_urls": { "desktop": { "page": "https://en.wikipedia.org/wiki/Cell" } }
                    });
                    (wikipedia_status, body.to_string(), "application/json")
                } else if url.starts_with("/api/query?") && url.contains("search_query=") {
                    (200, ARXIV_FEED.to_owned(), "application/atom+xml")
                } else {
                    (404, "not found".to_owned(), "text/plain")
                };

                let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type)
                    .expect("build header");
                let _ = request.respond(
                    tiny_http::Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn config(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            wikipedia_base_url: self.base_url.clone(),
            arxiv_base_url: self.base_url.clone(),
            per_source_timeout_ms: 2_000,
            total_timeout_ms: 4_000,
            ..EnrichmentConfig::default()
        }
    }
}

impl Drop for ReferenceStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[tokio::test]
async fn snippets_arrive_in_source_order() -> anyhow::Result<()> {
    let stub = ReferenceStub::spawn(200);
    let enricher = Enricher::from_config(&stub.config())?;
    assert_eq!(enricher.source_names(), vec!["wikipedia", "arxiv"]);

    let snippets = enricher.gather("Cell Biology", &[], 10).await;
    let sources: Vec<&str> = snippets.iter().map(|s| s.source_name.as_str()).collect();
    assert_eq!(sources, vec!["wikipedia", "arxiv", "arxiv"]);
    assert_eq!(
        snippets[0].url.as_deref(),
        Some("https://en.wikipedia.org/wiki/Cell")
    );
    assert_eq!(
        snippets[1].excerpt,
        "Lipid bilayers reorganise under mechanical stress & heat."
    );
    assert_eq!(
        snippets[2].url.as_deref(),
        Some("http://arxiv.org/abs/2401.00002v1")
    );
    assert!(snippets.iter().all(|s| s.topic == "Cell Biology"));
    Ok(())
}

#[tokio::test]
async fn requested_sources_limit_the_lookups() -> anyhow::Result<()> {
    let stub = ReferenceStub::spawn(200);
    let enricher = Enricher::from_config(&stub.config())?;

    let snippets = enricher
        .gather("Cell Biology", &["ArXiv".to_owned(), "library".to_owned()], 10)
        .await;
    assert_eq!(snippets.len(), 2);
    assert!(snippets.iter().all(|s| s.source_name == "arxiv"));

    let limited = enricher.gather("Cell Biology", &[], 1).await;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].source_name, "wikipedia");
    Ok(())
}

#[tokio::test]
async fn failing_source_is_skipped() -> anyhow::Result<()> {
    let stub = ReferenceStub::spawn(500);
    let enricher = Enricher::from_config(&stub.config())?;

    let snippets: Vec<_> = enricher.enrich("Cell Biology", &[]).collect().await;
    assert_eq!(snippets.len(), 2);
    assert!(snippets.iter().all(|s| s.source_name == "arxiv"));
    Ok(())
}

#[tokio::test]
async fn disabled_enrichment_makes_no_requests() -> anyhow::Result<()> {
    let stub = ReferenceStub::spawn(200);
    let mut config = stub.config();
    config.enabled = false;
    let enricher = Enricher::from_config(&config)?;
    assert!(enricher.gather("Cell Biology", &[], 10).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn synthesized_sections_cite_their_sources() -> anyhow::Result<()> {
    let stub = ReferenceStub::spawn(200);
    let mut config = PipelineConfig::default();
    config.enrichment = stub.config();
    let synthesizer = Synthesizer::new(
        Arc::new(TemplateEngine),
        Enricher::from_config(&config.enrichment)?,
        &config,
    );

    let mut raw = RawGenerationRequest::new("Cell Biology", 1);
    raw.sections_per_chapter = Some(2);
    let mut document = plan::plan(&params::validate(&raw)?)?;
    document.transition(DocumentStatus::Generating)?;
    synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await?;

    for section in &document.chapters[0].sections {
        assert_eq!(section.citations, vec!["arxiv", "wikipedia"]);
        assert!(
            section
                .content
                .contains("According to Wikipedia, Cells are the basic structural unit of living things."),
            "{}",
            section.content
        );
    }
    let sources = document.metadata["sources"]
        .as_array()
        .expect("sources array");
    let names: Vec<&str> = sources
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(names, vec!["arxiv", "wikipedia"]);
    assert!(sources.iter().all(|s| s["reliability"].is_string()));
    Ok(())
}
