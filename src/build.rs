use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cli::{BuildArgs, ExportArgs, GenerateArgs, PlanArgs, ProseEngineKind, ValidateArgs};
use crate::config::PipelineConfig;
use crate::enrich::Enricher;
use crate::export::FormatId;
use crate::formats::{Document, DocumentStatus};
use crate::openai::{OpenAiEngine, OpenAiSettings};
use crate::synth::{ProseEngine, SynthesisObserver, Synthesizer, TemplateEngine, UnitAddress};
use crate::{params, plan};

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let out_dir = PathBuf::from(&args.out);
    if out_dir.exists() {
        anyhow::bail!("output directory already exists: {}", out_dir.display());
    }
    let formats = if args.formats.is_empty() {
        vec![FormatId::DEFAULT]
    } else {
        args.formats
            .iter()
            .map(|raw| FormatId::parse(raw))
            .collect::<Result<Vec<_>, _>>()?
    };
    let config = load_config(args.config.as_deref())?;
    let synthesizer = synthesizer(args.engine, &config, args.offline)?;

    let raw = args.request.load()?;
    let request = params::validate(&raw)?;
    let mut document = plan::plan(&request)?;
    tracing::info!(document_id = %document.id, topic = %request.topic, "build: planned");

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output dir: {}", out_dir.display()))?;
    let document_path = out_dir.join("document.json");
    write_document(&document_path, &document)?;

    tracing::info!(engine = synthesizer.engine_name(), "build: generate");
    generate_in_place(&synthesizer, &mut document).await?;

    for format in formats {
        let path = out_dir.join(format!("{}.{}", document.id, format.extension()));
        tracing::info!(%format, out = %path.display(), "build: export");
        export_to_file(&document, format, &path)?;
        document.exported_formats.insert(format);
    }
    if !document.exported_formats.is_empty() {
        document.set_metadata("last_exported_at", Utc::now().to_rfc3339());
    }
    write_document(&document_path, &document)?;

    println!("{}", document_path.display());
    Ok(())
}

pub fn validate_request(args: ValidateArgs) -> anyhow::Result<()> {
    let raw = args.request.load()?;
    let request = params::validate(&raw)?;
    let json = serde_json::to_string_pretty(&request).context("serialize request")?;
    println!("{json}");
    Ok(())
}

pub fn plan_document(args: PlanArgs) -> anyhow::Result<()> {
    let out = PathBuf::from(&args.out);
    if out.exists() && !args.force {
        anyhow::bail!("output file already exists: {}", out.display());
    }
    let raw = args.request.load()?;
    let request = params::validate(&raw)?;
    let document = plan::plan(&request)?;
    write_document(&out, &document)?;
    tracing::info!(
        document_id = %document.id,
        chapters = document.chapters.len(),
        sections = document.total_sections(),
        out = %out.display(),
        "planned"
    );
    Ok(())
}

pub async fn generate_document(args: GenerateArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let synthesizer = synthesizer(args.engine, &config, args.offline)?;
    let mut document = read_document(Path::new(&args.document))?;
    generate_in_place(&synthesizer, &mut document).await?;
    let out = args.out.as_deref().unwrap_or(&args.document);
    write_document(Path::new(out), &document)?;
    Ok(())
}

pub fn export_document(args: ExportArgs) -> anyhow::Result<()> {
    let format = FormatId::parse(&args.format)?;
    let out = PathBuf::from(&args.out);
    if out.exists() && !args.force {
        anyhow::bail!("output file already exists: {}", out.display());
    }
    let document = read_document(Path::new(&args.document))?;
    export_to_file(&document, format, &out)
}

pub fn print_formats() -> anyhow::Result<()> {
    for info in FormatId::catalogue() {
        let marker = if info.is_default { " (default)" } else { "" };
        println!(
            "{}\t.{}\t{}{}",
            info.name, info.extension, info.description, marker
        );
    }
    Ok(())
}

/// Assembles a synthesizer for the chosen engine. `offline` disables reference lookups.
pub fn synthesizer(
    engine: ProseEngineKind,
    config: &PipelineConfig,
    offline: bool,
) -> anyhow::Result<Synthesizer> {
    let engine: Arc<dyn ProseEngine> = match engine {
        ProseEngineKind::Template => Arc::new(TemplateEngine),
        ProseEngineKind::Openai => {
            let settings = OpenAiSettings::from_env().context("openai settings")?;
            Arc::new(OpenAiEngine::new(settings)?)
        }
    };
    let enricher = if offline || !config.enrichment.enabled {
        Enricher::disabled()
    } else {
        Enricher::from_config(&config.enrichment)?
    };
    Ok(Synthesizer::new(engine, enricher, config))
}

pub fn load_config(path: Option<&str>) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(path.map(Path::new)).context("load pipeline config")
}

async fn generate_in_place(synthesizer: &Synthesizer, document: &mut Document) -> anyhow::Result<()> {
    document.transition(DocumentStatus::Generating)?;
    document.set_metadata("generation_started_at", Utc::now().to_rfc3339());
    document.set_metadata("prose_engine", synthesizer.engine_name());

    let observer = LogObserver {
        total: document.total_sections(),
    };
    if let Err(err) = synthesizer
        .synthesize(document, &observer, &CancellationToken::new())
        .await
    {
        document.transition(DocumentStatus::Failed)?;
        document.set_metadata("failure", err.to_string());
        document.set_metadata("failed_at", Utc::now().to_rfc3339());
        return Err(err).context("synthesize");
    }

    document.transition(DocumentStatus::Completed)?;
    document.set_metadata("completed_at", Utc::now().to_rfc3339());
    Ok(())
}

struct LogObserver {
    total: u64,
}

#[async_trait]
impl SynthesisObserver for LogObserver {
    async fn section_completed(&self, document: &Document, unit: &UnitAddress) -> anyhow::Result<()> {
        tracing::info!(
            document_id = %document.id,
            done = document.filled_sections(),
            total = self.total,
            "{unit} completed"
        );
        Ok(())
    }
}

fn export_to_file(document: &Document, format: FormatId, path: &Path) -> anyhow::Result<()> {
    let bytes = crate::export::render(document, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    std::fs::write(path, &bytes).with_context(|| format!("write export: {}", path.display()))?;
    tracing::info!(%format, bytes = bytes.len(), out = %path.display(), "exported");
    Ok(())
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read document: {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parse document: {}", path.display()))
}

fn write_document(path: &Path, document: &Document) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(document).context("serialize document")?;
    std::fs::write(path, json).with_context(|| format!("write document: {}", path.display()))
}
