use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::formats::RawGenerationRequest;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a request, plan it, synthesize it and export it in one go.
    Build(BuildArgs),
    /// Validate a request and print its normalized form.
    Validate(ValidateArgs),
    /// Validate a request and write the planned draft document.
    Plan(PlanArgs),
    /// Synthesize the content of a planned document.
    Generate(GenerateArgs),
    /// Convert a completed document into a distributable format.
    Export(ExportArgs),
    /// List the supported export formats.
    Formats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProseEngineKind {
    /// Deterministic offline prose.
    Template,
    /// OpenAI Responses API (`OPENAI_API_KEY`).
    Openai,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// JSON file holding a generation request. The flags below override its fields.
    #[arg(long)]
    pub request: Option<String>,

    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long)]
    pub chapters: Option<i64>,

    #[arg(long)]
    pub sections: Option<i64>,

    #[arg(long)]
    pub audience: Option<String>,

    #[arg(long)]
    pub depth: Option<String>,

    #[arg(long)]
    pub style: Option<String>,

    #[arg(long)]
    pub no_examples: bool,

    #[arg(long)]
    pub no_exercises: bool,

    /// Reference source to consult (repeatable).
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Topic that must not appear in the textbook (repeatable).
    #[arg(long = "exclude")]
    pub excluded_topics: Vec<String>,

    #[arg(long)]
    pub instructions: Option<String>,
}

impl RequestArgs {
    pub fn load(&self) -> anyhow::Result<RawGenerationRequest> {
        let mut raw = match &self.request {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("read request: {path}"))?;
                serde_json::from_str::<RawGenerationRequest>(&json)
                    .with_context(|| format!("parse request: {path}"))?
            }
            None => RawGenerationRequest::default(),
        };

        if let Some(topic) = &self.topic {
            raw.topic = Some(topic.clone());
        }
        if let Some(chapters) = self.chapters {
            raw.num_chapters = Some(chapters);
        }
        if let Some(sections) = self.sections {
            raw.sections_per_chapter = Some(sections);
        }
        if let Some(audience) = &self.audience {
            raw.target_audience = Some(audience.clone());
        }
        if let Some(depth) = &self.depth {
            raw.content_depth = Some(depth.clone());
        }
        if let Some(style) = &self.style {
            raw.writing_style = Some(style.clone());
        }
        if self.no_examples {
            raw.include_examples = Some(false);
        }
        if self.no_exercises {
            raw.include_exercises = Some(false);
        }
        raw.required_sources.extend(self.sources.iter().cloned());
        raw.excluded_topics.extend(self.excluded_topics.iter().cloned());
        if let Some(instructions) = &self.instructions {
            raw.custom_instructions = Some(instructions.clone());
        }
        Ok(raw)
    }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Output directory (document.json plus one file per format).
    #[arg(long)]
    pub out: String,

    /// Export format (repeatable). Defaults to PDF.
    #[arg(long = "format")]
    pub formats: Vec<String>,

    #[arg(long, value_enum, default_value_t = ProseEngineKind::Template)]
    pub engine: ProseEngineKind,

    /// Pipeline configuration file (YAML).
    #[arg(long)]
    pub config: Option<String>,

    /// Skip reference lookups.
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub request: RequestArgs,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Output file path for the draft document JSON.
    #[arg(long)]
    pub out: String,

    /// Overwrite the output file if it exists.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Draft document JSON (created by `plan`).
    #[arg(long)]
    pub document: String,

    /// Output file path for the completed document. Defaults to rewriting the input.
    #[arg(long)]
    pub out: Option<String>,

    #[arg(long, value_enum, default_value_t = ProseEngineKind::Template)]
    pub engine: ProseEngineKind,

    /// Pipeline configuration file (YAML).
    #[arg(long)]
    pub config: Option<String>,

    /// Skip reference lookups.
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Completed document JSON.
    #[arg(long)]
    pub document: String,

    /// Target format (pdf, docx, epub, html, md, txt).
    #[arg(long, default_value = "pdf")]
    pub format: String,

    /// Output file path.
    #[arg(long)]
    pub out: String,

    /// Overwrite the output file if it exists.
    #[arg(long)]
    pub force: bool,
}
