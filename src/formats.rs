use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::export::FormatId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Elementary,
    MiddleSchool,
    HighSchool,
    Undergraduate,
    Graduate,
    Professional,
    General,
}

impl Audience {
    pub const ALL: [Audience; 7] = [
        Audience::Elementary,
        Audience::MiddleSchool,
        Audience::HighSchool,
        Audience::Undergraduate,
        Audience::Graduate,
        Audience::Professional,
        Audience::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Elementary => "elementary",
            Audience::MiddleSchool => "middle_school",
            Audience::HighSchool => "high_school",
            Audience::Undergraduate => "undergraduate",
            Audience::Graduate => "graduate",
            Audience::Professional => "professional",
            Audience::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = enum_key(raw);
        Self::ALL.into_iter().find(|v| v.as_str() == key)
    }

    /// How prose should address this reader.
    pub fn register(self) -> &'static str {
        match self {
            Audience::Elementary => "using simple language and basic concepts",
            Audience::MiddleSchool => "using age-appropriate language and examples",
            Audience::HighSchool => "using appropriate academic language and concepts",
            Audience::Undergraduate => "using college-level academic language",
            Audience::Graduate => "using advanced academic language with in-depth analysis",
            Audience::Professional => "using industry terminology and practical applications",
            Audience::General => "using accessible language for general readers",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Audience::Elementary => "elementary school",
            Audience::MiddleSchool => "middle school",
            Audience::HighSchool => "high school",
            Audience::Undergraduate => "undergraduate",
            Audience::Graduate => "graduate",
            Audience::Professional => "professional",
            Audience::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ContentDepth {
    Shallow,
    Medium,
    Deep,
}

impl ContentDepth {
    pub const ALL: [ContentDepth; 3] = [ContentDepth::Shallow, ContentDepth::Medium, ContentDepth::Deep];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentDepth::Shallow => "shallow",
            ContentDepth::Medium => "medium",
            ContentDepth::Deep => "deep",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = enum_key(raw);
        Self::ALL.into_iter().find(|v| v.as_str() == key)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WritingStyle {
    Formal,
    Conversational,
    Technical,
    Academic,
    Casual,
}

impl WritingStyle {
    pub const ALL: [WritingStyle; 5] = [
        WritingStyle::Formal,
        WritingStyle::Conversational,
        WritingStyle::Technical,
        WritingStyle::Academic,
        WritingStyle::Casual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WritingStyle::Formal => "formal",
            WritingStyle::Conversational => "conversational",
            WritingStyle::Technical => "technical",
            WritingStyle::Academic => "academic",
            WritingStyle::Casual => "casual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = enum_key(raw);
        Self::ALL.into_iter().find(|v| v.as_str() == key)
    }
}

fn enum_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// Wire shape of a generation request, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawGenerationRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub num_chapters: Option<i64>,
    #[serde(default)]
    pub sections_per_chapter: Option<i64>,
    #[serde(default)]
    pub content_depth: Option<String>,
    #[serde(default)]
    pub writing_style: Option<String>,
    #[serde(default)]
    pub include_examples: Option<bool>,
    #[serde(default)]
    pub include_exercises: Option<bool>,
    #[serde(default)]
    pub required_sources: Vec<String>,
    #[serde(default)]
    pub excluded_topics: Vec<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

impl RawGenerationRequest {
    pub fn new(topic: impl Into<String>, num_chapters: i64) -> Self {
        Self {
            topic: Some(topic.into()),
            num_chapters: Some(num_chapters),
            ..Self::default()
        }
    }

    pub fn default_sections_per_chapter() -> i64 {
        3
    }
    pub fn default_include_examples() -> bool {
        true
    }
    pub fn default_include_exercises() -> bool {
        false
    }
    pub fn default_audience() -> Audience {
        Audience::General
    }
    pub fn default_depth() -> ContentDepth {
        ContentDepth::Medium
    }
    pub fn default_style() -> WritingStyle {
        WritingStyle::Formal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: String,
    pub target_audience: Audience,
    pub num_chapters: u32,
    pub sections_per_chapter: u32,
    pub content_depth: ContentDepth,
    pub writing_style: WritingStyle,
    pub include_examples: bool,
    pub include_exercises: bool,
    pub required_sources: Vec<String>,
    pub excluded_topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl GenerationRequest {
    pub fn to_raw(&self) -> RawGenerationRequest {
        RawGenerationRequest {
            topic: Some(self.topic.clone()),
            target_audience: Some(self.target_audience.as_str().to_owned()),
            num_chapters: Some(i64::from(self.num_chapters)),
            sections_per_chapter: Some(i64::from(self.sections_per_chapter)),
            content_depth: Some(self.content_depth.as_str().to_owned()),
            writing_style: Some(self.writing_style.as_str().to_owned()),
            include_examples: Some(self.include_examples),
            include_exercises: Some(self.include_exercises),
            required_sources: self.required_sources.clone(),
            excluded_topics: self.excluded_topics.clone(),
            custom_instructions: self.custom_instructions.clone(),
        }
    }

    pub fn total_sections(&self) -> u64 {
        u64::from(self.num_chapters) * u64::from(self.sections_per_chapter)
    }

    /// First excluded topic found in `text`, compared case-insensitively.
    pub fn excluded_term_in(&self, text: &str) -> Option<&str> {
        find_excluded(&self.excluded_topics, text)
    }
}

pub fn find_excluded<'a>(excluded: &'a [String], text: &str) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    excluded
        .iter()
        .find(|term| haystack.contains(&term.to_lowercase()))
        .map(String::as_str)
}

/// Drops words that carry an excluded term, line by line.
///
/// A word is dropped when it contains a term or is one of the words of a
/// multi-word term. Callers still re-check with [`find_excluded`] since a
/// term may straddle punctuation.
pub fn strip_excluded(excluded: &[String], text: &str) -> String {
    if excluded.is_empty() {
        return text.to_owned();
    }
    let terms: Vec<String> = excluded.iter().map(|t| t.to_lowercase()).collect();
    let term_words: Vec<&str> = terms
        .iter()
        .filter(|t| t.contains(char::is_whitespace))
        .flat_map(|t| t.split_whitespace())
        .collect();

    text.lines()
        .map(|line| {
            line.split_whitespace()
                .filter(|word| {
                    let bare = word
                        .trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase();
                    let lower = word.to_lowercase();
                    !terms.iter().any(|t| lower.contains(t.as_str()))
                        && !term_words.contains(&bare.as_str())
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Generating,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Generating => "generating",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Draft, DocumentStatus::Generating)
                | (DocumentStatus::Generating, DocumentStatus::Completed)
                | (DocumentStatus::Generating, DocumentStatus::Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Example,
    Exercise,
    Summary,
    Introduction,
    Conclusion,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Example => "example",
            ContentType::Exercise => "exercise",
            ContentType::Summary => "summary",
            ContentType::Introduction => "introduction",
            ContentType::Conclusion => "conclusion",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContentType::Text => "Text",
            ContentType::Example => "Example",
            ContentType::Exercise => "Exercise",
            ContentType::Summary => "Summary",
            ContentType::Introduction => "Introduction",
            ContentType::Conclusion => "Conclusion",
        }
    }
}

/// A delimited unit appended after a section's prose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Supplement {
    pub content_type: ContentType,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub address: String,
    pub index: u32,
    pub title: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supplements: Vec<Supplement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

impl Section {
    pub fn set_content(&mut self, content: String) {
        self.word_count = word_count(&content);
        self.content = content;
    }

    pub fn is_filled(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

pub fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    pub ordinal: u32,
    pub title: String,
    pub sections: Vec<Section>,
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl Chapter {
    pub fn word_count(&self) -> u32 {
        self.sections.iter().map(|s| s.word_count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: DocumentStatus,
    pub parameters: GenerationRequest,
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub exported_formats: BTreeSet<FormatId>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Document {
    pub fn transition(&mut self, next: DocumentStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError {
                document_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_exported(&self) -> bool {
        self.status == DocumentStatus::Completed && !self.exported_formats.is_empty()
    }

    pub fn total_sections(&self) -> u64 {
        self.chapters.iter().map(|c| c.sections.len() as u64).sum()
    }

    pub fn filled_sections(&self) -> u64 {
        self.chapters
            .iter()
            .flat_map(|c| c.sections.iter())
            .filter(|s| s.is_filled())
            .count() as u64
    }

    pub fn chapter(&self, ordinal: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.ordinal == ordinal)
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_owned(), value.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub document_id: String,
    pub status: DocumentStatus,
    pub fraction_complete: f64,
    pub message: String,
    pub completed_units: u64,
    pub total_units: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportArtifact {
    pub document_id: String,
    pub format: FormatId,
    pub produced_at: DateTime<Utc>,
    pub byte_size: u64,
    pub locator: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snippet {
    pub source_name: String,
    pub excerpt: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parsing_accepts_loose_spellings() {
        assert_eq!(Audience::parse("Middle School"), Some(Audience::MiddleSchool));
        assert_eq!(Audience::parse("high-school"), Some(Audience::HighSchool));
        assert_eq!(ContentDepth::parse(" DEEP "), Some(ContentDepth::Deep));
        assert_eq!(WritingStyle::parse("poetic"), None);
    }

    #[test]
    fn status_edges_follow_generation_flow() {
        use DocumentStatus::*;
        assert!(Draft.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
        assert!(Generating.can_transition_to(Failed));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Generating));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn find_excluded_is_case_insensitive() {
        let excluded = vec!["Quantum".to_owned()];
        assert_eq!(find_excluded(&excluded, "intro to QUANTUM bits"), Some("Quantum"));
        assert_eq!(find_excluded(&excluded, "classical bits"), None);
    }

    #[test]
    fn strip_excluded_removes_single_and_multi_word_terms() {
        let excluded = vec!["quantum".to_owned(), "Machine Learning".to_owned()];
        assert_eq!(strip_excluded(&excluded, "Quantum computing"), "computing");
        assert_eq!(
            strip_excluded(&excluded, "Basics of machine learning, today\nnext line"),
            "Basics of today\nnext line"
        );
        assert_eq!(strip_excluded(&[], "unchanged  text"), "unchanged  text");
    }

    #[test]
    fn section_word_count_tracks_content() {
        let mut section = Section {
            address: "1.1".to_owned(),
            index: 1,
            title: "Overview".to_owned(),
            content_type: ContentType::Introduction,
            content: String::new(),
            word_count: 0,
            supplements: Vec::new(),
            citations: Vec::new(),
        };
        section.set_content("one two  three\nfour".to_owned());
        assert_eq!(section.word_count, 4);
        assert!(section.is_filled());
    }
}
