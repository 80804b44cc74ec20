use std::ops::Range;

use anyhow::Context as _;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};

use crate::export::{Block, blocks, paragraphs};
use crate::formats::{ContentType, Document};

const OBJECTIVES_LABEL: &str = "**Learning objectives**";
const SUMMARY_LABEL: &str = "**Summary:**";

pub fn render(document: &Document) -> String {
    render_blocks(blocks(document))
}

pub(crate) fn render_blocks<'a>(blocks: impl IntoIterator<Item = Block<'a>>) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Title(title) => push_block(&mut out, &format!("# {title}")),
            Block::Description(text) => {
                if !text.trim().is_empty() {
                    push_block(&mut out, &escape_structure(text.trim()));
                }
            }
            Block::ChapterHeading { ordinal, title } => {
                push_block(&mut out, &format!("## Chapter {ordinal}: {title}"));
            }
            Block::Objectives(items) => {
                push_block(&mut out, OBJECTIVES_LABEL);
                let list = items
                    .iter()
                    .map(|item| format!("- {item}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                push_block(&mut out, &list);
            }
            Block::SectionHeading { address, title } => {
                push_block(&mut out, &format!("### {address} {title}"));
            }
            Block::Paragraph { text, .. } => push_block(&mut out, &escape_structure(text)),
            Block::Supplement { content_type, text } => {
                push_block(&mut out, &format!("#### {}", content_type.label()));
                for paragraph in paragraphs(text) {
                    push_block(&mut out, &escape_structure(paragraph));
                }
            }
            Block::ChapterSummary(text) => {
                push_block(&mut out, &format!("{SUMMARY_LABEL} {}", text.trim()));
            }
        }
    }
    out
}

fn push_block(out: &mut String, text: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(text);
    out.push('\n');
}

const RAW_HTML_OPENERS: &[&str] = &["<script", "<pre", "<style", "<textarea", "<!", "<?"];

/// Lines Markdown could read as structure: ATX headings, setext underlines,
/// code fences and raw HTML openers that run until a closing tag.
/// Leading escape backslashes are ignored.
fn is_structure_like(line: &str) -> bool {
    let rest = line.trim_start().trim_start_matches('\\').trim_end();
    let lower = rest.to_ascii_lowercase();
    rest.starts_with('#')
        || (!rest.is_empty() && (rest.chars().all(|c| c == '=') || rest.chars().all(|c| c == '-')))
        || fence(rest).is_some()
        || RAW_HTML_OPENERS.iter().any(|opener| lower.starts_with(opener))
}

/// The marker character and length of a code fence line.
fn fence(line: &str) -> Option<(char, usize)> {
    let rest = line.trim_start_matches(' ');
    if line.len() - rest.len() > 3 {
        return None;
    }
    let marker = rest.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    let info = &rest[len..];
    (len >= 3 && !(marker == '`' && info.contains('`'))).then_some((marker, len))
}

fn closes_fence(line: &str, open: (char, usize)) -> bool {
    fence(line).is_some_and(|(marker, len)| {
        marker == open.0 && len >= open.1 && line.trim().chars().all(|c| c == marker)
    })
}

/// Whether every code fence opened in `paragraph` is closed inside it.
fn fences_balanced(paragraph: &str) -> bool {
    let mut open = None;
    for line in paragraph.split('\n') {
        open = match open {
            Some(current) if closes_fence(line, current) => None,
            Some(current) => Some(current),
            None => fence(line),
        };
    }
    open.is_none()
}

fn indent_len(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Rewrites the structure-like lines of one paragraph. Closed code fences
/// and their bodies are left alone.
fn map_structure_lines(paragraph: &str, rewrite: impl Fn(&str) -> String) -> String {
    let keep_fences = fences_balanced(paragraph);
    let mut open = None;
    paragraph
        .split('\n')
        .map(|line| {
            if keep_fences {
                match open {
                    Some(current) => {
                        if closes_fence(line, current) {
                            open = None;
                        }
                        return line.to_owned();
                    }
                    None => {
                        if let Some(opened) = fence(line) {
                            open = Some(opened);
                            return line.to_owned();
                        }
                    }
                }
            }
            if is_structure_like(line) {
                rewrite(line)
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Adds one backslash in front of structure-like content lines so prose
/// never reads back as document structure. [`unescape_structure`] inverts it.
pub(crate) fn escape_structure(paragraph: &str) -> String {
    map_structure_lines(paragraph, |line| {
        let indent = indent_len(line);
        format!("{}\\{}", &line[..indent], &line[indent..])
    })
}

/// Inverse of [`escape_structure`] over paragraphs separated by blank lines.
pub(crate) fn unescape_structure(text: &str) -> String {
    text.split("\n\n")
        .map(|paragraph| {
            map_structure_lines(paragraph, |line| {
                let indent = indent_len(line);
                match line[indent..].strip_prefix('\\') {
                    Some(rest) => format!("{}{rest}", &line[..indent]),
                    None => line.to_owned(),
                }
            })
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Document structure recoverable from exported Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    pub title: String,
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineChapter {
    pub ordinal: u32,
    pub title: String,
    pub learning_objectives: Vec<String>,
    pub sections: Vec<OutlineSection>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineSection {
    pub address: String,
    pub title: String,
    pub content: String,
    pub supplements: Vec<(ContentType, String)>,
}

impl Outline {
    /// The outline a Markdown export of `document` re-imports to.
    pub fn of(document: &Document) -> Self {
        Self {
            title: document.title.clone(),
            chapters: document
                .chapters
                .iter()
                .map(|chapter| OutlineChapter {
                    ordinal: chapter.ordinal,
                    title: chapter.title.clone(),
                    learning_objectives: chapter.learning_objectives.clone(),
                    sections: chapter
                        .sections
                        .iter()
                        .map(|section| OutlineSection {
                            address: section.address.clone(),
                            title: section.title.clone(),
                            content: normalize_paragraphs(&section.content),
                            supplements: section
                                .supplements
                                .iter()
                                .map(|s| (s.content_type, normalize_paragraphs(&s.content)))
                                .collect(),
                        })
                        .collect(),
                    summary: chapter.summary.trim().to_owned(),
                })
                .collect(),
        }
    }
}

fn normalize_paragraphs(text: &str) -> String {
    paragraphs(text).collect::<Vec<_>>().join("\n\n")
}

/// A block at the top level of the Markdown tree.
struct TopBlock {
    heading: Option<HeadingLevel>,
    range: Range<usize>,
}

fn top_level_blocks(markdown: &str) -> Vec<TopBlock> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    for (event, range) in Parser::new_ext(markdown, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let heading = match tag {
                        Tag::Heading { level, .. } => Some(level),
                        _ => None,
                    };
                    out.push(TopBlock { heading, range });
                }
                depth += 1;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(TopBlock {
                heading: None,
                range,
            }),
            _ => {}
        }
    }
    out
}

fn heading_text(source: &str) -> &str {
    source.trim().trim_start_matches('#').trim()
}

enum Target {
    Preamble,
    Objectives,
    Section,
    Supplement,
}

struct Reimport<'a> {
    markdown: &'a str,
    outline: Outline,
    target: Target,
    /// Content blocks not yet assigned to the current target.
    pending: Vec<Range<usize>>,
}

impl Reimport<'_> {
    /// Assigns pending content to the current target. At a chapter boundary
    /// a trailing summary line becomes the chapter summary.
    fn flush(&mut self, chapter_end: bool) -> anyhow::Result<()> {
        let markdown = self.markdown;
        let mut blocks = std::mem::take(&mut self.pending);
        if chapter_end && !self.outline.chapters.is_empty() {
            let summary = blocks
                .last()
                .and_then(|last| markdown[last.clone()].trim().strip_prefix(SUMMARY_LABEL))
                .map(|rest| rest.trim().to_owned());
            if let Some(summary) = summary {
                blocks.pop();
                current_chapter(&mut self.outline, SUMMARY_LABEL)?.summary = summary;
            }
        }

        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(());
        };
        let source = &markdown[first.start..last.end];
        let text = normalize_paragraphs(&unescape_structure(source));
        match self.target {
            Target::Preamble | Target::Objectives => {}
            Target::Section => current_section(&mut self.outline, source)?.content = text,
            Target::Supplement => {
                let section = current_section(&mut self.outline, source)?;
                if let Some((_, content)) = section.supplements.last_mut() {
                    *content = text;
                }
            }
        }
        Ok(())
    }

    fn block(&mut self, block: TopBlock) -> anyhow::Result<()> {
        let markdown = self.markdown;
        let source = markdown[block.range.clone()].trim();
        match block.heading {
            Some(HeadingLevel::H1) => {
                self.flush(false)?;
                self.outline.title = heading_text(source).to_owned();
                self.target = Target::Preamble;
            }
            Some(HeadingLevel::H2) => {
                self.flush(true)?;
                let rest = heading_text(source)
                    .strip_prefix("Chapter ")
                    .with_context(|| format!("malformed chapter heading: {source}"))?;
                let (ordinal, title) = rest
                    .split_once(": ")
                    .with_context(|| format!("malformed chapter heading: {source}"))?;
                let ordinal = ordinal
                    .trim()
                    .parse()
                    .with_context(|| format!("parse chapter ordinal: {source}"))?;
                self.outline.chapters.push(OutlineChapter {
                    ordinal,
                    title: title.trim().to_owned(),
                    ..OutlineChapter::default()
                });
                self.target = Target::Preamble;
            }
            Some(HeadingLevel::H3) => {
                self.flush(false)?;
                let (address, title) = heading_text(source)
                    .split_once(' ')
                    .with_context(|| format!("malformed section heading: {source}"))?;
                current_chapter(&mut self.outline, source)?
                    .sections
                    .push(OutlineSection {
                        address: address.to_owned(),
                        title: title.trim().to_owned(),
                        ..OutlineSection::default()
                    });
                self.target = Target::Section;
            }
            Some(HeadingLevel::H4) => {
                self.flush(false)?;
                let content_type = supplement_type(heading_text(source))
                    .with_context(|| format!("unknown supplement heading: {source}"))?;
                current_section(&mut self.outline, source)?
                    .supplements
                    .push((content_type, String::new()));
                self.target = Target::Supplement;
            }
            Some(level) => anyhow::bail!("unexpected {level:?} heading: {source}"),
            None => match self.target {
                Target::Preamble if source == OBJECTIVES_LABEL && !self.outline.chapters.is_empty() => {
                    self.pending.clear();
                    self.target = Target::Objectives;
                }
                Target::Objectives => {
                    current_chapter(&mut self.outline, source)?.learning_objectives.extend(
                        source
                            .lines()
                            .filter_map(|line| line.trim().strip_prefix("- "))
                            .map(str::to_owned),
                    );
                    self.target = Target::Preamble;
                }
                _ => self.pending.push(block.range),
            },
        }
        Ok(())
    }
}

/// Parses Markdown written by [`render`] back into an [`Outline`].
pub fn reimport(markdown: &str) -> anyhow::Result<Outline> {
    let mut state = Reimport {
        markdown,
        outline: Outline::default(),
        target: Target::Preamble,
        pending: Vec::new(),
    };
    for block in top_level_blocks(markdown) {
        state.block(block)?;
    }
    state.flush(true)?;
    Ok(state.outline)
}

fn current_chapter<'a>(outline: &'a mut Outline, source: &str) -> anyhow::Result<&'a mut OutlineChapter> {
    outline
        .chapters
        .last_mut()
        .with_context(|| format!("content before first chapter: {source}"))
}

fn current_section<'a>(outline: &'a mut Outline, source: &str) -> anyhow::Result<&'a mut OutlineSection> {
    current_chapter(outline, source)?
        .sections
        .last_mut()
        .with_context(|| format!("content before first section: {source}"))
}

fn supplement_type(label: &str) -> Option<ContentType> {
    [ContentType::Example, ContentType::Exercise]
        .into_iter()
        .find(|t| t.label() == label)
}
