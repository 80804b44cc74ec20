use std::collections::HashSet;

use crate::error::ValidationError;
use crate::formats::{
    Audience, ContentDepth, GenerationRequest, RawGenerationRequest, WritingStyle,
};

pub const TOPIC_MIN_CHARS: usize = 1;
pub const TOPIC_MAX_CHARS: usize = 200;
pub const CHAPTERS_RANGE: (i64, i64) = (1, 100);
pub const SECTIONS_RANGE: (i64, i64) = (1, 20);

/// Normalizes a raw request into an immutable [`GenerationRequest`].
///
/// Pure: the same input always yields the same result, and validating the
/// raw form of an accepted request returns that request unchanged.
pub fn validate(raw: &RawGenerationRequest) -> Result<GenerationRequest, ValidationError> {
    let topic = raw
        .topic
        .as_deref()
        .ok_or(ValidationError::MissingField("topic"))?
        .trim()
        .to_owned();
    let len = topic.chars().count();
    if !(TOPIC_MIN_CHARS..=TOPIC_MAX_CHARS).contains(&len) {
        return Err(ValidationError::TopicLength {
            len,
            min: TOPIC_MIN_CHARS,
            max: TOPIC_MAX_CHARS,
        });
    }

    let target_audience = parse_enum(
        "target_audience",
        raw.target_audience.as_deref(),
        Audience::parse,
        &Audience::ALL.map(Audience::as_str),
    )?
    .unwrap_or_else(RawGenerationRequest::default_audience);
    let content_depth = parse_enum(
        "content_depth",
        raw.content_depth.as_deref(),
        ContentDepth::parse,
        &ContentDepth::ALL.map(ContentDepth::as_str),
    )?
    .unwrap_or_else(RawGenerationRequest::default_depth);
    let writing_style = parse_enum(
        "writing_style",
        raw.writing_style.as_deref(),
        WritingStyle::parse,
        &WritingStyle::ALL.map(WritingStyle::as_str),
    )?
    .unwrap_or_else(RawGenerationRequest::default_style);

    let num_chapters = raw
        .num_chapters
        .ok_or(ValidationError::MissingField("num_chapters"))?;
    let num_chapters = check_range("num_chapters", num_chapters, CHAPTERS_RANGE)?;
    let sections_per_chapter = check_range(
        "sections_per_chapter",
        raw.sections_per_chapter
            .unwrap_or_else(RawGenerationRequest::default_sections_per_chapter),
        SECTIONS_RANGE,
    )?;

    let custom_instructions = raw
        .custom_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    Ok(GenerationRequest {
        topic,
        target_audience,
        num_chapters,
        sections_per_chapter,
        content_depth,
        writing_style,
        include_examples: raw
            .include_examples
            .unwrap_or_else(RawGenerationRequest::default_include_examples),
        include_exercises: raw
            .include_exercises
            .unwrap_or_else(RawGenerationRequest::default_include_exercises),
        required_sources: canonical_list(&raw.required_sources),
        excluded_topics: canonical_list(&raw.excluded_topics),
        custom_instructions,
    })
}

fn parse_enum<T>(
    field: &'static str,
    value: Option<&str>,
    parse: fn(&str) -> Option<T>,
    expected: &[&'static str],
) -> Result<Option<T>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    parse(value).map(Some).ok_or_else(|| ValidationError::InvalidEnumValue {
        field,
        value: value.to_owned(),
        expected: expected.to_vec(),
    })
}

fn check_range(field: &'static str, value: i64, (min, max): (i64, i64)) -> Result<u32, ValidationError> {
    if !(min..=max).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        value,
        min,
        max,
    })
}

/// Trimmed, non-empty, case-insensitively unique, sorted by lowercase form.
///
/// The first spelling of each entry (after sorting by the original spelling
/// as a tiebreak) wins, so the output does not depend on input order.
pub fn canonical_list(items: &[String]) -> Vec<String> {
    let mut trimmed: Vec<String> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    trimmed.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });

    let mut seen = HashSet::new();
    trimmed.retain(|item| seen.insert(item.to_lowercase()));
    trimmed
}
