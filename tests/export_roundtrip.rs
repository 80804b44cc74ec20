use std::io::Read as _;
use std::sync::Arc;

use textbookify::config::PipelineConfig;
use textbookify::enrich::Enricher;
use textbookify::export::markdown::{self, Outline};
use textbookify::export::{self, FormatId};
use textbookify::formats::{Document, DocumentStatus, RawGenerationRequest};
use async_trait::async_trait;
use textbookify::synth::{NoopObserver, ProseEngine, SectionBrief, Synthesizer, TemplateEngine};
use textbookify::{params, plan};
use tokio_util::sync::CancellationToken;

/// Wraps the template prose in the headings and fences a chat model tends to add.
struct MarkdownHeavyEngine;

#[async_trait]
impl ProseEngine for MarkdownHeavyEngine {
    fn name(&self) -> &str {
        "markdown-heavy"
    }

    async fn compose(&self, brief: &SectionBrief) -> anyhow::Result<String> {
        let prose = TemplateEngine.compose(brief).await?;
        Ok(format!(
            "### Key Ideas\n\n{prose}\n\nIn short\n===\n\n```text\n# not a heading\n```"
        ))
    }
}

async fn completed(topic: &str, chapters: i64, sections: i64) -> anyhow::Result<Document> {
    completed_with(Arc::new(TemplateEngine), topic, chapters, sections).await
}

async fn completed_with(
    engine: Arc<dyn ProseEngine>,
    topic: &str,
    chapters: i64,
    sections: i64,
) -> anyhow::Result<Document> {
    let config = PipelineConfig::default();
    let synthesizer = Synthesizer::new(engine, Enricher::disabled(), &config);
    let mut raw = RawGenerationRequest::new(topic, chapters);
    raw.sections_per_chapter = Some(sections);
    let mut document = plan::plan(&params::validate(&raw)?)?;
    document.transition(DocumentStatus::Generating)?;
    synthesizer
        .synthesize(&mut document, &NoopObserver, &CancellationToken::new())
        .await?;
    document.transition(DocumentStatus::Completed)?;
    Ok(document)
}

fn zip_entry(bytes: &[u8], name: &str) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let mut file = archive.by_name(name)?;
    let mut out = String::new();
    file.read_to_string(&mut out)?;
    Ok(out)
}

#[tokio::test]
async fn markdown_export_reimports_to_the_same_outline() -> anyhow::Result<()> {
    let document = completed("Cell Biology", 3, 3).await?;
    let bytes = export::render(&document, FormatId::Markdown)?;
    let outline = markdown::reimport(std::str::from_utf8(&bytes)?)?;
    assert_eq!(outline, Outline::of(&document));
    assert_eq!(outline.chapters.len(), 3);
    assert!(outline.chapters.iter().all(|c| c.sections.len() == 3));
    Ok(())
}

#[tokio::test]
async fn markdown_round_trip_survives_headings_in_generated_prose() -> anyhow::Result<()> {
    let document = completed_with(Arc::new(MarkdownHeavyEngine), "Cell Biology", 2, 2).await?;
    assert!(document.chapters[0].sections[0].content.starts_with("### Key Ideas"));

    let bytes = export::render(&document, FormatId::Markdown)?;
    let outline = markdown::reimport(std::str::from_utf8(&bytes)?)?;
    assert_eq!(outline, Outline::of(&document));
    let addresses: Vec<_> = outline.chapters[0]
        .sections
        .iter()
        .map(|s| (s.address.as_str(), s.title.as_str()))
        .collect();
    let expected: Vec<_> = document.chapters[0]
        .sections
        .iter()
        .map(|s| (s.address.as_str(), s.title.as_str()))
        .collect();
    assert_eq!(addresses, expected);
    Ok(())
}

#[tokio::test]
async fn pdf_starts_each_chapter_on_a_new_page() -> anyhow::Result<()> {
    let document = completed("Cell Biology", 3, 2).await?;
    let bytes = export::render(&document, FormatId::Pdf)?;
    let pdf = lopdf::Document::load_mem(&bytes)?;
    assert!(pdf.get_pages().len() > document.chapters.len());
    Ok(())
}

#[tokio::test]
async fn epub_and_docx_carry_every_chapter() -> anyhow::Result<()> {
    let document = completed("Cell Biology", 2, 2).await?;

    let epub = export::render(&document, FormatId::Epub)?;
    let opf = zip_entry(&epub, "OEBPS/content.opf")?;
    assert!(opf.contains("<dc:title>Cell Biology</dc:title>"), "{opf}");
    for chapter in &document.chapters {
        let xhtml = zip_entry(&epub, &format!("OEBPS/ch{:03}.xhtml", chapter.ordinal))?;
        assert!(xhtml.contains(&format!("Chapter {}: ", chapter.ordinal)));
    }

    let docx = export::render(&document, FormatId::Docx)?;
    let body = zip_entry(&docx, "word/document.xml")?;
    for chapter in &document.chapters {
        assert!(body.contains(&format!("Chapter {}: ", chapter.ordinal)));
    }
    Ok(())
}

#[tokio::test]
async fn text_and_html_exports_include_summaries() -> anyhow::Result<()> {
    let document = completed("Cell Biology", 2, 2).await?;

    let text = String::from_utf8(export::render(&document, FormatId::Txt)?)?;
    assert!(text.starts_with("CELL BIOLOGY\n"));
    assert_eq!(text.matches("Summary: ").count(), 2);

    let html = String::from_utf8(export::render(&document, FormatId::Html)?)?;
    assert!(html.contains("<h1>Cell Biology</h1>"));
    assert_eq!(html.matches("<strong>Summary:</strong>").count(), 2);
    Ok(())
}
