use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::PlanningError;
use crate::formats::{
    Chapter, ContentDepth, ContentType, Document, DocumentStatus, GenerationRequest, Section,
    find_excluded, strip_excluded,
};

/// Title candidates tried per unit before giving up.
pub const MAX_TITLE_ATTEMPTS: usize = 4;

const CHAPTER_THEMES: &[&str] = &[
    "Foundations",
    "Core Concepts",
    "Methods",
    "Applications",
    "Analysis",
    "Case Studies",
    "Current Developments",
    "Future Directions",
];

const TEXT_SECTION_THEMES: &[&str] = &[
    "Key Principles",
    "Working Methods",
    "Common Patterns",
    "Practical Use",
    "Open Problems",
    "Connections",
];

/// Builds the draft skeleton for a validated request.
pub fn plan(request: &GenerationRequest) -> Result<Document, PlanningError> {
    let excluded = &request.excluded_topics;
    let subject = TitleSubject::new(&request.topic, excluded);
    let sections_per_chapter = request.sections_per_chapter;

    let mut chapters = Vec::with_capacity(request.num_chapters as usize);
    for ordinal in 1..=request.num_chapters {
        let (theme, part) = chapter_theme(ordinal);
        let unit = format!("Chapter {ordinal}");
        let title = pick_title(
            &unit,
            excluded,
            [
                Some(format!("{theme} of {}{part}", subject.original)),
                subject.stripped.as_deref().map(|s| format!("{theme} of {s}{part}")),
                Some(format!("Chapter {ordinal}: {theme}{part}")),
                Some(format!("Unit {ordinal}")),
            ],
        )?;

        let mut sections = Vec::with_capacity(sections_per_chapter as usize);
        for index in 1..=sections_per_chapter {
            let address = format!("{ordinal}.{index}");
            let content_type = slot_content_type(index, sections_per_chapter);
            let base = section_theme(content_type, index);
            let unit = format!("Chapter {ordinal}, Section {index}");
            let section_title = pick_title(
                &unit,
                excluded,
                [
                    Some(format!("{base}: {}", subject.original)),
                    subject.stripped.as_deref().map(|s| format!("{base}: {s}")),
                    Some(format!("{address} {base}")),
                    Some(format!("Section {address}")),
                ],
            )?;
            sections.push(Section {
                address,
                index,
                title: section_title,
                content_type,
                content: String::new(),
                word_count: 0,
                supplements: Vec::new(),
                citations: Vec::new(),
            });
        }

        let learning_objectives = learning_objectives(&title, request.content_depth);
        chapters.push(Chapter {
            ordinal,
            title,
            sections,
            learning_objectives,
            summary: String::new(),
        });
    }

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "planned_at".to_owned(),
        serde_json::Value::String(Utc::now().to_rfc3339()),
    );
    metadata.insert(
        "excluded_topics".to_owned(),
        serde_json::json!(request.excluded_topics),
    );

    let document = Document {
        id: uuid::Uuid::new_v4().to_string(),
        title: request.topic.clone(),
        description: describe(request),
        status: DocumentStatus::Draft,
        parameters: request.clone(),
        chapters,
        exported_formats: Default::default(),
        metadata,
    };
    tracing::debug!(
        document_id = %document.id,
        chapters = document.chapters.len(),
        sections = document.total_sections(),
        "planned document"
    );
    Ok(document)
}

/// Content type by slot position within a chapter.
pub fn slot_content_type(index: u32, slots: u32) -> ContentType {
    if index == 1 {
        ContentType::Introduction
    } else if index == slots {
        ContentType::Conclusion
    } else {
        ContentType::Text
    }
}

pub fn learning_objectives(chapter_title: &str, depth: ContentDepth) -> Vec<String> {
    let mut objectives = vec![
        format!("Understand the fundamental concepts of {chapter_title}"),
        format!("Apply the principles covered in {chapter_title} to practical scenarios"),
        format!("Analyze the key components discussed in {chapter_title}"),
    ];
    if depth == ContentDepth::Deep {
        objectives.push(format!("Evaluate advanced applications of {chapter_title}"));
    }
    objectives
}

struct TitleSubject {
    original: String,
    stripped: Option<String>,
}

impl TitleSubject {
    fn new(topic: &str, excluded: &[String]) -> Self {
        let stripped = strip_excluded(excluded, topic);
        let stripped = stripped.trim();
        Self {
            original: topic.to_owned(),
            stripped: (!stripped.is_empty() && stripped != topic).then(|| stripped.to_owned()),
        }
    }
}

/// Theme for a chapter plus a numeral suffix once the themes wrap around.
fn chapter_theme(ordinal: u32) -> (&'static str, String) {
    let idx = (ordinal as usize - 1) % CHAPTER_THEMES.len();
    let round = (ordinal as usize - 1) / CHAPTER_THEMES.len();
    let part = match round {
        0 => String::new(),
        n => format!(" {}", roman(n + 1)),
    };
    (CHAPTER_THEMES[idx], part)
}

fn section_theme(content_type: ContentType, index: u32) -> &'static str {
    match content_type {
        ContentType::Introduction => "Overview",
        ContentType::Conclusion => "Key Takeaways",
        _ => TEXT_SECTION_THEMES[(index as usize - 2) % TEXT_SECTION_THEMES.len()],
    }
}

fn roman(mut n: usize) -> String {
    const NUMERALS: &[(usize, &str)] = &[
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for &(value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

fn pick_title(
    unit: &str,
    excluded: &[String],
    candidates: [Option<String>; MAX_TITLE_ATTEMPTS],
) -> Result<String, PlanningError> {
    let mut last_term = None;
    for candidate in candidates.into_iter().flatten() {
        match find_excluded(excluded, &candidate) {
            None => return Ok(candidate),
            Some(term) => {
                tracing::debug!(unit, candidate = %candidate, term, "title rejected");
                last_term = Some(term.to_owned());
            }
        }
    }
    Err(PlanningError::PlanningExhausted {
        unit: unit.to_owned(),
        term: last_term.unwrap_or_default(),
    })
}

fn describe(request: &GenerationRequest) -> String {
    format!(
        "A {}-chapter {} textbook on {} for a {} audience, written in a {} style.",
        request.num_chapters,
        request.content_depth.as_str(),
        request.topic,
        request.target_audience.label(),
        request.writing_style.as_str(),
    )
}
