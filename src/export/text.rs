use crate::export::{Block, blocks, paragraphs, wrap};
use crate::formats::Document;

const WIDTH: usize = 78;

pub fn render(document: &Document) -> String {
    let mut out = String::new();
    for block in blocks(document) {
        match block {
            Block::Title(title) => {
                let title = title.to_uppercase();
                let rule = "=".repeat(title.chars().count().min(WIDTH));
                push_block(&mut out, &format!("{title}\n{rule}"));
            }
            Block::Description(text) => {
                if !text.trim().is_empty() {
                    push_block(&mut out, &fill(text, ""));
                }
            }
            Block::ChapterHeading { ordinal, title } => {
                let heading = format!("CHAPTER {ordinal}: {title}");
                let rule = "-".repeat(heading.chars().count().min(WIDTH));
                out.push('\n');
                push_block(&mut out, &format!("{heading}\n{rule}"));
            }
            Block::Objectives(items) => {
                let list = items
                    .iter()
                    .map(|item| fill(item, "  * "))
                    .collect::<Vec<_>>()
                    .join("\n");
                push_block(&mut out, &format!("Learning objectives:\n{list}"));
            }
            Block::SectionHeading { address, title } => {
                push_block(&mut out, &format!("{address} {title}"));
            }
            Block::Paragraph { text, .. } => push_block(&mut out, &fill(text, "")),
            Block::Supplement { content_type, text } => {
                push_block(&mut out, &format!("[{}]", content_type.label()));
                for paragraph in paragraphs(text) {
                    push_block(&mut out, &fill(paragraph, "    "));
                }
            }
            Block::ChapterSummary(text) => {
                push_block(&mut out, &fill(&format!("Summary: {}", text.trim()), ""));
            }
        }
    }
    out
}

/// Wraps `text` and prefixes every line with `indent`.
fn fill(text: &str, indent: &str) -> String {
    let width = WIDTH.saturating_sub(indent.chars().count()).max(20);
    wrap(text, width)
        .into_iter()
        .map(|line| format!("{indent}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_block(out: &mut String, text: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(text);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::completed_document;

    #[test]
    fn plain_text_has_no_markup_and_short_lines() {
        let text = render(&completed_document());
        assert!(text.starts_with("CELL BIOLOGY\n============\n"));
        assert!(text.contains("CHAPTER 2: "));
        assert!(text.contains("[Example]"));
        assert!(text.contains("Membranes & organelles <matter>."));
        assert!(!text.contains("**"));
        assert!(text.lines().all(|line| line.chars().count() <= WIDTH));
    }
}
