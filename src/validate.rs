use std::collections::HashMap;
use std::fmt;

use crate::config::{QualityConfig, WordBand, WordBands};
use crate::formats::{Audience, Chapter, Document, Section, Supplement, find_excluded, word_count};

/// What the validator inspects.
#[derive(Debug, Clone, Copy)]
pub enum Unit<'a> {
    Section(&'a Section),
    Chapter(&'a Chapter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    WordCount { words: u32, band: WordBand },
    ExcludedTopic { term: String },
    Duplicate { address: String },
    MissingSummary,
    SectionCount { expected: u32, actual: u32 },
    EmptySection { address: String },
    Flagged { term: String },
    TooComplex { average: u32, limit: u32, audience: Audience },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => f.write_str("content is empty"),
            Rejection::WordCount { words, band } => write!(
                f,
                "word count {words} outside {}..={}",
                band.min, band.max
            ),
            Rejection::ExcludedTopic { term } => write!(f, "mentions excluded topic `{term}`"),
            Rejection::Duplicate { address } => {
                write!(f, "duplicates content of section {address}")
            }
            Rejection::MissingSummary => f.write_str("chapter summary is empty"),
            Rejection::SectionCount { expected, actual } => {
                write!(f, "expected {expected} sections, found {actual}")
            }
            Rejection::EmptySection { address } => write!(f, "section {address} has no content"),
            Rejection::Flagged { term } => write!(f, "contains flagged term `{term}`"),
            Rejection::TooComplex {
                average,
                limit,
                audience,
            } => write!(
                f,
                "average sentence length {average} words exceeds {limit} for a {} audience",
                audience.label()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted,
    Rejected(Rejection),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted)
    }
}

/// Per-document acceptance checks.
///
/// Remembers accepted section contents so a later section that repeats an
/// earlier one verbatim is rejected.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    band: WordBand,
    excluded: Vec<String>,
    sections_per_chapter: u32,
    topic: String,
    audience: Audience,
    /// Lowercase word sequences that reject a unit.
    flagged: Vec<Vec<String>>,
    sentence_limit: Option<u32>,
    /// Normalized content of accepted sections, mapped to their address.
    accepted: HashMap<String, String>,
}

impl ContentValidator {
    pub fn for_document(document: &Document, bands: &WordBands) -> Self {
        let params = &document.parameters;
        let mut validator = Self {
            band: bands.for_depth(params.content_depth),
            excluded: params.excluded_topics.clone(),
            sections_per_chapter: params.sections_per_chapter,
            topic: params.topic.clone(),
            audience: params.target_audience,
            flagged: Vec::new(),
            sentence_limit: None,
            accepted: HashMap::new(),
        };
        // A resumed document keeps its already-filled sections as prior art.
        for section in document.chapters.iter().flat_map(|c| c.sections.iter()) {
            if section.is_filled() {
                validator.accept(section);
            }
        }
        validator
    }

    /// Adds the flagged-term and sentence-length rules. Terms the topic itself
    /// names stay allowed.
    pub fn with_quality(mut self, quality: &QualityConfig) -> Self {
        let topic = words_of(&self.topic);
        self.flagged = quality
            .flagged_terms
            .iter()
            .map(String::as_str)
            .map(words_of)
            .filter(|term| !term.is_empty() && !contains_run(&topic, term))
            .collect();
        self.sentence_limit = Some(quality.max_avg_sentence_words.for_audience(self.audience));
        self
    }

    pub fn band(&self) -> WordBand {
        self.band
    }

    pub fn validate(&self, unit: Unit<'_>) -> ValidationResult {
        let outcome = match unit {
            Unit::Section(section) => self.check_section(section),
            Unit::Chapter(chapter) => self.check_chapter(chapter),
        };
        match outcome {
            Ok(()) => ValidationResult::Accepted,
            Err(rejection) => ValidationResult::Rejected(rejection),
        }
    }

    /// Records an accepted section for the duplicate check.
    pub fn accept(&mut self, section: &Section) {
        self.accepted
            .entry(normalize(&section.content))
            .or_insert_with(|| section.address.clone());
    }

    pub fn validate_supplement(&self, supplement: &Supplement) -> ValidationResult {
        if supplement.content.trim().is_empty() {
            return ValidationResult::Rejected(Rejection::Empty);
        }
        if let Some(term) = find_excluded(&self.excluded, &supplement.content) {
            return ValidationResult::Rejected(Rejection::ExcludedTopic {
                term: term.to_owned(),
            });
        }
        match self.check_flagged(&supplement.content) {
            Ok(()) => ValidationResult::Accepted,
            Err(rejection) => ValidationResult::Rejected(rejection),
        }
    }

    fn check_section(&self, section: &Section) -> Result<(), Rejection> {
        if section.content.trim().is_empty() {
            return Err(Rejection::Empty);
        }
        let words = word_count(&section.content);
        if !self.band.contains(words) {
            return Err(Rejection::WordCount {
                words,
                band: self.band,
            });
        }
        if let Some(term) = find_excluded(&self.excluded, &section.content) {
            return Err(Rejection::ExcludedTopic {
                term: term.to_owned(),
            });
        }
        self.check_flagged(&section.content)?;
        self.check_complexity(&section.content)?;
        if let Some(address) = self.accepted.get(&normalize(&section.content))
            && *address != section.address
        {
            return Err(Rejection::Duplicate {
                address: address.clone(),
            });
        }
        Ok(())
    }

    fn check_chapter(&self, chapter: &Chapter) -> Result<(), Rejection> {
        let actual = chapter.sections.len() as u32;
        if actual != self.sections_per_chapter {
            return Err(Rejection::SectionCount {
                expected: self.sections_per_chapter,
                actual,
            });
        }
        if let Some(section) = chapter.sections.iter().find(|s| !s.is_filled()) {
            return Err(Rejection::EmptySection {
                address: section.address.clone(),
            });
        }
        if chapter.summary.trim().is_empty() {
            return Err(Rejection::MissingSummary);
        }
        if let Some(term) = find_excluded(&self.excluded, &chapter.summary) {
            return Err(Rejection::ExcludedTopic {
                term: term.to_owned(),
            });
        }
        self.check_flagged(&chapter.summary)
    }

    fn check_flagged(&self, content: &str) -> Result<(), Rejection> {
        if self.flagged.is_empty() {
            return Ok(());
        }
        let words = words_of(content);
        match self.flagged.iter().find(|term| contains_run(&words, term)) {
            Some(term) => Err(Rejection::Flagged {
                term: term.join(" "),
            }),
            None => Ok(()),
        }
    }

    fn check_complexity(&self, content: &str) -> Result<(), Rejection> {
        let Some(limit) = self.sentence_limit else {
            return Ok(());
        };
        let lengths: Vec<u32> = content
            .split(['.', '!', '?'])
            .map(word_count)
            .filter(|&words| words > 0)
            .collect();
        if lengths.is_empty() {
            return Ok(());
        }
        let sentences = lengths.len() as u64;
        let words: u64 = lengths.iter().map(|&w| u64::from(w)).sum();
        if words > u64::from(limit) * sentences {
            return Err(Rejection::TooComplex {
                average: u32::try_from(words.div_ceil(sentences)).unwrap_or(u32::MAX),
                limit,
                audience: self.audience,
            });
        }
        Ok(())
    }
}

/// Lowercase alphanumeric words, punctuation dropped.
fn words_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_run(words: &[String], run: &[String]) -> bool {
    !run.is_empty() && words.windows(run.len()).any(|window| window == run)
}

fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}
