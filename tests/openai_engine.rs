mod openai_stub;

use std::sync::Arc;
use std::time::Duration;

use openai_stub::{OpenAiStub, OpenAiStubConfig, ProseBehavior};
use textbookify::config::PipelineConfig;
use textbookify::enrich::Enricher;
use textbookify::error::SynthesisError;
use textbookify::formats::{ContentType, Document, DocumentStatus, RawGenerationRequest};
use textbookify::openai::{OpenAiEngine, OpenAiSettings};
use textbookify::synth::{NoopObserver, Synthesizer};
use textbookify::{params, plan};
use tokio_util::sync::CancellationToken;

fn settings(stub: &OpenAiStub, api_key: &str) -> OpenAiSettings {
    OpenAiSettings {
        base_url: stub.base_url.clone(),
        api_key: api_key.to_owned(),
        model: "stub-model".to_owned(),
        temperature: 0.2,
        timeout: Duration::from_secs(10),
    }
}

fn draft(depth: &str) -> anyhow::Result<Document> {
    let mut raw = RawGenerationRequest::new("Cell Biology", 1);
    raw.sections_per_chapter = Some(2);
    raw.content_depth = Some(depth.to_owned());
    let mut document = plan::plan(&params::validate(&raw)?)?;
    document.transition(DocumentStatus::Generating)?;
    Ok(document)
}

fn synthesizer(engine: OpenAiEngine) -> Synthesizer {
    Synthesizer::new(
        Arc::new(engine),
        Enricher::disabled(),
        &PipelineConfig::default(),
    )
}

#[tokio::test]
async fn openai_engine_fills_every_section() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig {
        expected_api_key: "test-key".to_owned(),
        behavior: ProseBehavior::Fitting,
    });
    let synthesizer = synthesizer(OpenAiEngine::new(settings(&stub, "test-key"))?);
    assert_eq!(synthesizer.engine_name(), "openai");

    let mut document = draft("deep")?;
    synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await?;

    assert_eq!(document.filled_sections(), 2);
    let first = &document.chapters[0].sections[0];
    assert!(first.content.starts_with("This part covers Chapter 1, Section 1 ("));
    assert!(first.word_count >= 400 && first.word_count <= 1200);

    let last = &document.chapters[0].sections[1];
    let kinds: Vec<ContentType> = last.supplements.iter().map(|s| s.content_type).collect();
    assert!(kinds.contains(&ContentType::Exercise));
    assert!(
        last.supplements
            .iter()
            .all(|s| s.content.starts_with("Try this for Chapter 1, Section 2 ("))
    );
    assert!(!document.chapters[0].summary.is_empty());
    Ok(())
}

#[tokio::test]
async fn short_prose_is_retried_then_fails_the_unit() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig {
        expected_api_key: "test-key".to_owned(),
        behavior: ProseBehavior::TooShort,
    });
    let synthesizer = synthesizer(OpenAiEngine::new(settings(&stub, "test-key"))?);

    let mut document = draft("medium")?;
    let err = synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    let (unit, reason) = match err {
        SynthesisError::Fatal { unit, reason } => (unit, reason),
        other => panic!("expected fatal error, got {other}"),
    };
    assert_eq!(unit, "Chapter 1, Section 1");
    assert!(reason.contains("word count"), "{reason}");
    let retries = PipelineConfig::default().retry.max_retries as usize;
    assert_eq!(stub.requests(), retries + 1);
    Ok(())
}

#[tokio::test]
async fn api_errors_carry_the_server_message() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig {
        expected_api_key: "test-key".to_owned(),
        behavior: ProseBehavior::ServerError,
    });
    let synthesizer = synthesizer(OpenAiEngine::new(settings(&stub, "test-key"))?);

    let mut document = draft("shallow")?;
    let err = synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("the model is overloaded"), "{err}");
    Ok(())
}

#[tokio::test]
async fn wrong_api_key_is_reported() -> anyhow::Result<()> {
    let stub = OpenAiStub::spawn(OpenAiStubConfig {
        expected_api_key: "test-key".to_owned(),
        behavior: ProseBehavior::Fitting,
    });
    let synthesizer = synthesizer(OpenAiEngine::new(settings(&stub, "other-key"))?);

    let mut document = draft("shallow")?;
    let err = synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid api key"), "{err}");
    assert_eq!(document.filled_sections(), 0);
    Ok(())
}
