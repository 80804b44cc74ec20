use serde::{Deserialize, Serialize};

use crate::export::{chapter_blocks, markdown};
use crate::formats::{Document, DocumentStatus};

/// Read-only excerpt of a document, available at any status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preview {
    pub document_id: String,
    pub title: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    pub preview: String,
    /// Characters in the full Markdown rendering.
    pub content_length: usize,
    pub full_content_available: bool,
}

/// Builds a preview of the whole document or of one chapter.
///
/// Returns `None` when `chapter` names a chapter the document does not have.
pub fn preview(document: &Document, chapter: Option<u32>, max_chars: usize) -> Option<Preview> {
    let content = match chapter {
        Some(ordinal) => markdown::render_blocks(chapter_blocks(document.chapter(ordinal)?)),
        None => markdown::render(document),
    };
    let content_length = content.chars().count();
    let excerpt = match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content,
    };
    Some(Preview {
        document_id: document.id.clone(),
        title: document.title.clone(),
        status: document.status,
        chapter,
        preview: excerpt,
        content_length,
        full_content_available: content_length <= max_chars,
    })
}
