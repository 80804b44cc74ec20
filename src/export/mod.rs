//! Conversion of completed documents into distributable files.
//!
//! Every renderer reads the same canonical block list produced by
//! [`blocks`], so the formats agree on structure and ordering.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::app::artifact_store::ArtifactStore;
use crate::error::ExportError;
use crate::formats::{ContentType, Document, DocumentStatus, ExportArtifact};

pub mod docx;
pub mod epub;
pub mod html;
pub mod markdown;
pub mod pdf;
pub mod text;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatId {
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "DOCX")]
    Docx,
    #[serde(rename = "EPUB")]
    Epub,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "MD")]
    Markdown,
    #[serde(rename = "TXT")]
    Txt,
}

impl FormatId {
    pub const ALL: [FormatId; 6] = [
        FormatId::Pdf,
        FormatId::Docx,
        FormatId::Epub,
        FormatId::Html,
        FormatId::Markdown,
        FormatId::Txt,
    ];

    pub const DEFAULT: FormatId = FormatId::Pdf;

    pub fn name(self) -> &'static str {
        match self {
            FormatId::Pdf => "PDF",
            FormatId::Docx => "DOCX",
            FormatId::Epub => "EPUB",
            FormatId::Html => "HTML",
            FormatId::Markdown => "MD",
            FormatId::Txt => "TXT",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FormatId::Pdf => "pdf",
            FormatId::Docx => "docx",
            FormatId::Epub => "epub",
            FormatId::Html => "html",
            FormatId::Markdown => "md",
            FormatId::Txt => "txt",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            FormatId::Pdf => "application/pdf",
            FormatId::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FormatId::Epub => "application/epub+zip",
            FormatId::Html => "text/html; charset=utf-8",
            FormatId::Markdown => "text/markdown; charset=utf-8",
            FormatId::Txt => "text/plain; charset=utf-8",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FormatId::Pdf => "Paginated document for printing and sharing",
            FormatId::Docx => "Word document for editing",
            FormatId::Epub => "E-book for readers and mobile devices",
            FormatId::Html => "Web page for browsers",
            FormatId::Markdown => "Markdown source that can be re-imported",
            FormatId::Txt => "Plain text without formatting",
        }
    }

    pub fn supported_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|f| f.name()).collect()
    }

    /// Case-insensitive lookup that also accepts extensions and a few aliases.
    pub fn parse(raw: &str) -> Result<Self, ExportError> {
        let key = raw.trim().to_ascii_lowercase();
        let found = match key.as_str() {
            "pdf" => Some(FormatId::Pdf),
            "docx" | "word" => Some(FormatId::Docx),
            "epub" => Some(FormatId::Epub),
            "html" | "htm" => Some(FormatId::Html),
            "md" | "markdown" => Some(FormatId::Markdown),
            "txt" | "text" | "plain" => Some(FormatId::Txt),
            _ => None,
        };
        found.ok_or_else(|| ExportError::UnsupportedFormat {
            requested: raw.to_owned(),
            supported: Self::supported_names(),
        })
    }

    pub fn catalogue() -> Vec<FormatInfo> {
        Self::ALL
            .iter()
            .map(|&id| FormatInfo {
                id,
                name: id.name(),
                extension: id.extension(),
                media_type: id.media_type(),
                description: id.description(),
                is_default: id == Self::DEFAULT,
            })
            .collect()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatId {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FormatInfo {
    pub id: FormatId,
    pub name: &'static str,
    pub extension: &'static str,
    pub media_type: &'static str,
    pub description: &'static str,
    pub is_default: bool,
}

/// One structural element of a document, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block<'a> {
    Title(&'a str),
    Description(&'a str),
    ChapterHeading { ordinal: u32, title: &'a str },
    Objectives(&'a [String]),
    SectionHeading { address: &'a str, title: &'a str },
    Paragraph { content_type: ContentType, text: &'a str },
    Supplement { content_type: ContentType, text: &'a str },
    ChapterSummary(&'a str),
}

pub fn blocks(document: &Document) -> Vec<Block<'_>> {
    let mut out = vec![
        Block::Title(&document.title),
        Block::Description(&document.description),
    ];
    for chapter in &document.chapters {
        out.extend(chapter_blocks(chapter));
    }
    out
}

pub fn chapter_blocks(chapter: &crate::formats::Chapter) -> Vec<Block<'_>> {
    let mut out = vec![Block::ChapterHeading {
        ordinal: chapter.ordinal,
        title: &chapter.title,
    }];
    if !chapter.learning_objectives.is_empty() {
        out.push(Block::Objectives(&chapter.learning_objectives));
    }
    for section in &chapter.sections {
        out.push(Block::SectionHeading {
            address: &section.address,
            title: &section.title,
        });
        out.extend(paragraphs(&section.content).map(|text| Block::Paragraph {
            content_type: section.content_type,
            text,
        }));
        out.extend(section.supplements.iter().map(|s| Block::Supplement {
            content_type: s.content_type,
            text: s.content.as_str(),
        }));
    }
    if !chapter.summary.trim().is_empty() {
        out.push(Block::ChapterSummary(&chapter.summary));
    }
    out
}

/// Blank-line separated paragraphs, trimmed, empties skipped.
pub fn paragraphs(content: &str) -> impl Iterator<Item = &str> {
    content.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

pub fn ensure_exportable(document: &Document) -> Result<(), ExportError> {
    if document.status != DocumentStatus::Completed {
        return Err(ExportError::DocumentNotReady {
            document_id: document.id.clone(),
            status: document.status,
        });
    }
    Ok(())
}

/// Renders `document` as `format`. Pure apart from the PDF/EPUB timestamps.
pub fn render(document: &Document, format: FormatId) -> Result<Vec<u8>, ExportError> {
    ensure_exportable(document)?;
    let rendered = match format {
        FormatId::Pdf => pdf::render(document),
        FormatId::Docx => docx::render(document),
        FormatId::Epub => epub::render(document),
        FormatId::Html => Ok(html::render(document).into_bytes()),
        FormatId::Markdown => Ok(markdown::render(document).into_bytes()),
        FormatId::Txt => Ok(text::render(document).into_bytes()),
    };
    rendered.map_err(|source| ExportError::Render {
        format: format.name(),
        source,
    })
}

#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn ArtifactStore>,
}

impl Exporter {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Renders on the blocking pool and stores the bytes, replacing any
    /// earlier artifact of the same format.
    pub async fn export(
        &self,
        document: &Document,
        format: FormatId,
    ) -> Result<ExportArtifact, ExportError> {
        ensure_exportable(document)?;
        tracing::info!(document_id = %document.id, format = format.name(), "export");

        let owned = document.clone();
        let bytes = tokio::task::spawn_blocking(move || render(&owned, format))
            .await
            .map_err(|err| ExportError::Render {
                format: format.name(),
                source: anyhow::Error::new(err).context("join render task"),
            })??;

        let sha256 = hex::encode(sha2::Sha256::digest(&bytes));
        let byte_size = bytes.len() as u64;
        let locator = self
            .store
            .put(&document.id, format, bytes)
            .await
            .map_err(ExportError::Store)?;

        tracing::info!(document_id = %document.id, format = format.name(), byte_size, "export stored");
        Ok(ExportArtifact {
            document_id: document.id.clone(),
            format,
            produced_at: Utc::now(),
            byte_size,
            locator,
            sha256,
        })
    }
}

pub(crate) fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Splits `text` into lines of at most `width` characters on word boundaries.
pub(crate) fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
