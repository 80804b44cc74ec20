//! Fills a planned document with prose, section by section.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{PipelineConfig, QualityConfig, RetryConfig, WordBand, WordBands};
use crate::enrich::{Enricher, source_reliability};
use crate::error::SynthesisError;
use crate::formats::{
    Audience, Chapter, ContentDepth, ContentType, Document, Section, Snippet, Supplement,
    WritingStyle, find_excluded, strip_excluded, word_count,
};
use crate::validate::{ContentValidator, Rejection, Unit, ValidationResult};

/// Position of a unit inside a document, rendered as "Chapter 3, Section 2".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitAddress {
    pub chapter: u32,
    pub section: Option<u32>,
}

impl UnitAddress {
    pub fn chapter(chapter: u32) -> Self {
        Self {
            chapter,
            section: None,
        }
    }

    pub fn section(chapter: u32, section: u32) -> Self {
        Self {
            chapter,
            section: Some(section),
        }
    }
}

impl fmt::Display for UnitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.section {
            Some(section) => write!(f, "Chapter {}, Section {section}", self.chapter),
            None => write!(f, "Chapter {}", self.chapter),
        }
    }
}

/// Everything a prose engine needs to write one section.
#[derive(Debug, Clone)]
pub struct SectionBrief {
    pub topic: String,
    pub chapter_title: String,
    pub section_title: String,
    pub address: UnitAddress,
    pub content_type: ContentType,
    pub audience: Audience,
    pub depth: ContentDepth,
    pub style: WritingStyle,
    pub snippets: Vec<Snippet>,
    pub excluded: Vec<String>,
    pub instructions: Option<String>,
    pub word_band: WordBand,
    /// 1-based attempt number for this unit.
    pub attempt: u32,
}

#[async_trait]
pub trait ProseEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn compose(&self, brief: &SectionBrief) -> anyhow::Result<String>;

    /// Text for an example or exercise block appended after a section.
    async fn compose_supplement(
        &self,
        brief: &SectionBrief,
        kind: ContentType,
    ) -> anyhow::Result<String> {
        Ok(template_supplement(brief, kind))
    }
}

#[derive(Debug)]
pub enum UnitFailure {
    Transient(anyhow::Error),
    Rejected(Rejection),
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitFailure::Transient(err) => write!(f, "{err:#}"),
            UnitFailure::Rejected(rejection) => write!(f, "rejected: {rejection}"),
        }
    }
}

/// Remaining retries for one unit. Transient and rejection failures share it.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    remaining: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            remaining: max_retries,
            attempts: 0,
        }
    }

    /// Starts the next attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Charges one failure against the budget.
    pub fn record(&mut self, unit: &UnitAddress, failure: &UnitFailure) -> Result<(), SynthesisError> {
        if self.remaining == 0 {
            return Err(SynthesisError::Fatal {
                unit: unit.to_string(),
                reason: failure.to_string(),
            });
        }
        self.remaining -= 1;
        Ok(())
    }
}

#[async_trait]
pub trait SynthesisObserver: Send + Sync {
    /// Called exactly once per accepted section, after it is written into `document`.
    async fn section_completed(&self, document: &Document, unit: &UnitAddress) -> anyhow::Result<()>;
}

pub struct NoopObserver;

#[async_trait]
impl SynthesisObserver for NoopObserver {
    async fn section_completed(&self, _document: &Document, _unit: &UnitAddress) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Synthesizer {
    engine: Arc<dyn ProseEngine>,
    enricher: Enricher,
    bands: WordBands,
    quality: QualityConfig,
    retry: RetryConfig,
    max_snippets: usize,
}

impl Synthesizer {
    pub fn new(engine: Arc<dyn ProseEngine>, enricher: Enricher, config: &PipelineConfig) -> Self {
        Self {
            engine,
            enricher,
            bands: config.word_bands,
            quality: config.quality.clone(),
            retry: config.retry,
            max_snippets: config.enrichment.max_snippets_per_section,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Fills every empty section in ordinal order, then derives chapter summaries.
    ///
    /// Cancellation is observed between units. Sections that already carry
    /// content are kept as they are.
    pub async fn synthesize(
        &self,
        document: &mut Document,
        observer: &dyn SynthesisObserver,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        let mut validator =
            ContentValidator::for_document(document, &self.bands).with_quality(&self.quality);
        let mut sources_used = BTreeSet::new();

        for ci in 0..document.chapters.len() {
            let ordinal = document.chapters[ci].ordinal;
            for si in 0..document.chapters[ci].sections.len() {
                if cancel.is_cancelled() {
                    return Err(SynthesisError::Cancelled);
                }
                if document.chapters[ci].sections[si].is_filled() {
                    continue;
                }

                let address = UnitAddress::section(ordinal, document.chapters[ci].sections[si].index);
                let section = self
                    .synthesize_section(document, ci, si, &address, &validator)
                    .await?;
                sources_used.extend(section.citations.iter().cloned());
                validator.accept(&section);
                document.chapters[ci].sections[si] = section;

                tracing::debug!(document_id = %document.id, unit = %address, "section accepted");
                observer
                    .section_completed(document, &address)
                    .await
                    .map_err(SynthesisError::Observer)?;
            }

            if cancel.is_cancelled() {
                return Err(SynthesisError::Cancelled);
            }
            let summary =
                summarize_chapter(&document.chapters[ci], &document.parameters.excluded_topics);
            document.chapters[ci].summary = summary;
            if let ValidationResult::Rejected(rejection) =
                validator.validate(Unit::Chapter(&document.chapters[ci]))
            {
                return Err(SynthesisError::Fatal {
                    unit: UnitAddress::chapter(ordinal).to_string(),
                    reason: format!("rejected: {rejection}"),
                });
            }
        }

        let sources: Vec<serde_json::Value> = sources_used
            .iter()
            .map(|name| {
                let label = source_reliability(name);
                serde_json::json!({
                    "name": name,
                    "reliability": label.reliability,
                    "authority": label.authority,
                })
            })
            .collect();
        document.set_metadata("sources", sources);
        Ok(())
    }

    async fn synthesize_section(
        &self,
        document: &Document,
        ci: usize,
        si: usize,
        address: &UnitAddress,
        validator: &ContentValidator,
    ) -> Result<Section, SynthesisError> {
        let params = &document.parameters;
        let chapter = &document.chapters[ci];
        let planned = &chapter.sections[si];

        let query = format!("{} {}", chapter.title, planned.title);
        let snippets = self
            .enricher
            .gather(&query, &params.required_sources, self.max_snippets)
            .await;

        let mut brief = SectionBrief {
            topic: params.topic.clone(),
            chapter_title: chapter.title.clone(),
            section_title: planned.title.clone(),
            address: *address,
            content_type: planned.content_type,
            audience: params.target_audience,
            depth: params.content_depth,
            style: params.writing_style,
            snippets,
            excluded: params.excluded_topics.clone(),
            instructions: params.custom_instructions.clone(),
            word_band: validator.band(),
            attempt: 0,
        };

        let mut budget = RetryBudget::new(self.retry.max_retries);
        let mut section = planned.clone();
        loop {
            brief.attempt = budget.begin_attempt();
            let failure = match self.engine.compose(&brief).await {
                Ok(text) => {
                    section.set_content(text.trim().to_owned());
                    match validator.validate(Unit::Section(&section)) {
                        ValidationResult::Accepted => break,
                        ValidationResult::Rejected(rejection) => UnitFailure::Rejected(rejection),
                    }
                }
                Err(err) => UnitFailure::Transient(err),
            };
            tracing::warn!(
                document_id = %document.id,
                unit = %address,
                attempt = brief.attempt,
                remaining = budget.remaining(),
                reason = %failure,
                "section attempt failed"
            );
            budget.record(address, &failure)?;
        }

        section.citations = cited_sources(&brief.snippets);

        let has_text = chapter.sections.iter().any(|s| s.content_type == ContentType::Text);
        let is_last = si + 1 == chapter.sections.len();
        let mut kinds = Vec::new();
        if params.include_examples
            && (section.content_type == ContentType::Text || (!has_text && is_last))
        {
            kinds.push(ContentType::Example);
        }
        if params.include_exercises && is_last {
            kinds.push(ContentType::Exercise);
        }
        for kind in kinds {
            let supplement = self
                .synthesize_supplement(&mut brief, kind, &mut budget, validator)
                .await?;
            section.supplements.push(supplement);
        }

        Ok(section)
    }

    async fn synthesize_supplement(
        &self,
        brief: &mut SectionBrief,
        kind: ContentType,
        budget: &mut RetryBudget,
        validator: &ContentValidator,
    ) -> Result<Supplement, SynthesisError> {
        loop {
            brief.attempt = budget.begin_attempt();
            let failure = match self.engine.compose_supplement(brief, kind).await {
                Ok(text) => {
                    let supplement = Supplement {
                        content_type: kind,
                        content: text.trim().to_owned(),
                    };
                    match validator.validate_supplement(&supplement) {
                        ValidationResult::Accepted => return Ok(supplement),
                        ValidationResult::Rejected(rejection) => UnitFailure::Rejected(rejection),
                    }
                }
                Err(err) => UnitFailure::Transient(err),
            };
            tracing::warn!(
                unit = %brief.address,
                kind = kind.as_str(),
                attempt = brief.attempt,
                reason = %failure,
                "supplement attempt failed"
            );
            budget.record(&brief.address, &failure)?;
        }
    }
}

/// Section titles plus the first sentence of each section.
/// Distinct source names behind a section, in sorted order.
fn cited_sources(snippets: &[Snippet]) -> Vec<String> {
    snippets
        .iter()
        .map(|s| s.source_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn summarize_chapter(chapter: &Chapter, excluded: &[String]) -> String {
    let titles: Vec<&str> = chapter.sections.iter().map(|s| s.title.as_str()).collect();
    let mut summary = format!("{} covered {}.", chapter.title, join_list(&titles));
    for section in &chapter.sections {
        if let Some(sentence) = first_sentence(&section.content) {
            summary.push(' ');
            summary.push_str(&sentence);
        }
    }
    strip_excluded(excluded, &summary)
}

fn first_sentence(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut chars = text.char_indices().peekable();
    let mut end = text.len();
    while let Some((idx, c)) = chars.next() {
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && at_boundary {
            end = idx + c.len_utf8();
            break;
        }
    }
    Some(text[..end].split_whitespace().collect::<Vec<_>>().join(" "))
}

fn join_list(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => (*one).to_owned(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

/// Offline engine that assembles prose from templates.
///
/// Output is deterministic for a given brief, lands inside the brief's word
/// band and never contains an excluded term.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine;

#[async_trait]
impl ProseEngine for TemplateEngine {
    fn name(&self) -> &str {
        "template"
    }

    async fn compose(&self, brief: &SectionBrief) -> anyhow::Result<String> {
        Ok(template_prose(brief))
    }
}

const BODY_TEMPLATES: &[&str] = &[
    "{lead} {section} connects to the wider study of {topic} in ways worth tracing step by step.",
    "{depth} the central ideas of {section} can be stated precisely and then checked against examples.",
    "A useful habit is to ask what problem {section} solves and which assumptions it quietly relies on.",
    "Each idea here rests on definitions introduced earlier in {chapter}, so it pays to revisit them when something feels unclear.",
    "Readers often find that {section} becomes clearer once it is compared with neighbouring ideas in {topic}.",
    "{lead} the vocabulary of {section} matters, because precise terms make later reasoning shorter and safer.",
    "Practitioners return to {section} repeatedly, which is why the fundamentals deserve careful attention now.",
    "{depth} it helps to separate what is observed from what is inferred when working through {section}.",
];

/// Longest title phrase spliced into template sentences verbatim.
const MAX_REFERENCE_WORDS: u32 = 6;

fn template_prose(brief: &SectionBrief) -> String {
    let section = reference(subject_of(&brief.section_title), "this section");
    let chapter = reference(brief.chapter_title.clone(), "this chapter");
    let topic = reference(brief.topic.clone(), "the subject");
    let fill = |template: &str| {
        template
            .replace("{lead}", style_lead(brief.style))
            .replace("{depth}", depth_lead(brief.depth))
            .replace("{section}", &section)
            .replace("{chapter}", &chapter)
            .replace("{topic}", &topic)
    };

    let mut sentences = vec![
        opening(brief, &section, &chapter),
        format!(
            "The discussion is written for a {} audience, {}.",
            brief.audience.label(),
            brief.audience.register()
        ),
    ];
    for snippet in &brief.snippets {
        if let Some(sentence) = first_sentence(&snippet.excerpt) {
            sentences.push(format!("According to {}, {sentence}", source_label(&snippet.source_name)));
        }
    }
    if let Some(instructions) = &brief.instructions {
        sentences.push(format!("Guidance followed here: {instructions}."));
    }

    let target = brief.word_band.target();
    let mut accepted = Vec::new();
    let mut words = 0u32;
    let push = |sentence: String, accepted: &mut Vec<String>, words: &mut u32| {
        let clean = strip_excluded(&brief.excluded, &sentence);
        if clean.trim().is_empty() || find_excluded(&brief.excluded, &clean).is_some() {
            return;
        }
        *words += word_count(&clean);
        accepted.push(clean);
    };
    for sentence in sentences {
        push(sentence, &mut accepted, &mut words);
    }

    let offset = (brief.address.section.unwrap_or(0) as usize + brief.attempt as usize).saturating_sub(1);
    let mut round = 0usize;
    while words < target {
        let idx = (offset + round) % BODY_TEMPLATES.len();
        let mut sentence = fill(BODY_TEMPLATES[idx]);
        if round >= BODY_TEMPLATES.len() {
            sentence = format!("Point {}: {sentence}", round + 1);
        }
        let before = words;
        push(sentence, &mut accepted, &mut words);
        round += 1;
        if words == before && round > 4 * BODY_TEMPLATES.len() {
            break;
        }
    }

    let text = accepted
        .chunks(4)
        .map(|paragraph| paragraph.join(" "))
        .collect::<Vec<_>>()
        .join("\n\n");
    cap_words(&text, brief.word_band.max)
}

fn opening(brief: &SectionBrief, section: &str, chapter: &str) -> String {
    match brief.content_type {
        ContentType::Introduction => format!(
            "This section ({}) introduces {chapter} and sets out the ideas the rest of the chapter builds on.",
            brief.address
        ),
        ContentType::Conclusion => format!(
            "This section ({}) draws together the main threads of {chapter} and points to what comes next.",
            brief.address
        ),
        ContentType::Example => format!(
            "This section ({}) works through a concrete case of {section}.",
            brief.address
        ),
        ContentType::Exercise => format!(
            "This section ({}) offers practice with {section}.",
            brief.address
        ),
        ContentType::Text | ContentType::Summary => format!(
            "This section ({}) develops {section} as part of {chapter}.",
            brief.address
        ),
    }
}

/// `phrase`, or `fallback` when the phrase is too long to repeat in prose.
fn reference(phrase: String, fallback: &str) -> String {
    if word_count(&phrase) > MAX_REFERENCE_WORDS {
        fallback.to_owned()
    } else {
        phrase
    }
}

fn style_lead(style: WritingStyle) -> &'static str {
    match style {
        WritingStyle::Formal => "It should be noted that",
        WritingStyle::Conversational => "You might notice that",
        WritingStyle::Technical => "Formally,",
        WritingStyle::Academic => "As the literature emphasises,",
        WritingStyle::Casual => "Here's the thing:",
    }
}

fn depth_lead(depth: ContentDepth) -> &'static str {
    match depth {
        ContentDepth::Shallow => "At a high level,",
        ContentDepth::Medium => "In more detail,",
        ContentDepth::Deep => "Examined closely,",
    }
}

fn source_label(name: &str) -> &str {
    match name {
        "wikipedia" => "Wikipedia",
        "arxiv" => "arXiv",
        other => other,
    }
}

/// The part of a section title after its `"Overview: "`-style prefix.
fn subject_of(title: &str) -> String {
    match title.split_once(": ") {
        Some((base, rest)) => format!("{} of {rest}", base.to_lowercase()),
        None => title.to_owned(),
    }
}

fn cap_words(text: &str, max: u32) -> String {
    if word_count(text) <= max {
        return text.to_owned();
    }
    let mut out = String::new();
    let mut count = 0;
    for paragraph in text.split("\n\n") {
        let mut kept = Vec::new();
        for word in paragraph.split_whitespace() {
            if count == max {
                break;
            }
            kept.push(word);
            count += 1;
        }
        if kept.is_empty() {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&kept.join(" "));
    }
    out
}

fn template_supplement(brief: &SectionBrief, kind: ContentType) -> String {
    let section = subject_of(&brief.section_title);
    let text = match kind {
        ContentType::Exercise => format!(
            "1. Summarize the main idea of {section} in two sentences.\n\
             2. Explain how {section} relates to the rest of {chapter}.\n\
             3. Describe a situation where a {audience} reader would apply {section}.",
            chapter = brief.chapter_title,
            audience = brief.audience.label(),
        ),
        _ => format!(
            "Consider how {section} plays out in practice. Start from a familiar situation, \
             name the ideas from {chapter} that apply, and follow them step by step to a conclusion \
             a {audience} reader could check independently.",
            chapter = brief.chapter_title,
            audience = brief.audience.label(),
        ),
    };
    strip_excluded(&brief.excluded, &text)
}
