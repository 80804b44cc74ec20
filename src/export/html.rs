use pulldown_cmark::{Event, Options, Parser};

use crate::export::{markdown, xml_escape};
use crate::formats::Document;

pub(crate) const LANG: &str = "en";

const STYLE: &str = r#"body { font-family: Georgia, serif; max-width: 46em; margin: 2em auto; padding: 0 1.2em; line-height: 1.6; color: #222; }
h1 { border-bottom: 2px solid #444; padding-bottom: 0.3em; }
h2 { margin-top: 2.4em; }
h4 { margin-bottom: 0.2em; color: #555; text-transform: uppercase; font-size: 0.85em; letter-spacing: 0.05em; }
h4 + p { border-left: 4px solid #ddd; padding-left: 1em; }
"#;

pub fn render(document: &Document) -> String {
    let body = markdown_to_html_fragment(&markdown::render(document));
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!("<html lang=\"{}\">\n", xml_escape(LANG)));
    out.push_str("<head>\n");
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(&document.title)));
    out.push_str(&format!(
        "  <meta name=\"description\" content=\"{}\" />\n",
        xml_escape(&document.description)
    ));
    out.push_str("  <style>\n");
    out.push_str(STYLE);
    out.push_str("  </style>\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

/// Markdown to HTML. Raw HTML in the source is emitted as escaped text.
pub(crate) fn markdown_to_html_fragment(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(md, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Rewrites void tags like `<br>` as `<br />` so the output is valid XHTML.
pub(crate) fn ensure_xhtml_void_tags(html: &str) -> String {
    const VOID_TAGS: &[&str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ];

    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel_lt) = html[cursor..].find('<') {
        let lt = cursor + rel_lt;
        out.push_str(&html[cursor..lt]);

        let mut in_quote: Option<u8> = None;
        let mut gt = lt + 1;
        while gt < bytes.len() {
            let b = bytes[gt];
            if let Some(q) = in_quote {
                if b == q {
                    in_quote = None;
                }
            } else if b == b'"' || b == b'\'' {
                in_quote = Some(b);
            } else if b == b'>' {
                break;
            }
            gt += 1;
        }
        if gt >= bytes.len() {
            out.push_str(&html[lt..]);
            return out;
        }

        let raw_tag = &html[lt..=gt];
        let name_start = lt + 1;
        let name_end = html[name_start..gt]
            .find(|c: char| !c.is_ascii_alphabetic())
            .map_or(gt, |idx| name_start + idx);
        let tag_name = html[name_start..name_end].to_ascii_lowercase();

        let tag_without_gt = &html[lt..gt];
        if VOID_TAGS.contains(&tag_name.as_str()) && !tag_without_gt.trim_end().ends_with('/') {
            out.push_str(tag_without_gt);
            out.push_str(" />");
        } else {
            out.push_str(raw_tag);
        }
        cursor = gt + 1;
    }

    out.push_str(&html[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::completed_document;

    #[test]
    fn renders_standalone_page() {
        let html = render(&completed_document());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Cell Biology</title>"));
        assert!(html.contains("<h1>Cell Biology</h1>"));
        assert!(html.contains("<h4>Example</h4>"));
        assert!(html.contains("<strong>Summary:</strong>"));
    }

    #[test]
    fn raw_markup_in_content_is_escaped() {
        let html = render(&completed_document());
        assert!(html.contains("Membranes &amp; organelles &lt;matter&gt;."));
        assert!(!html.contains("<matter>"));
    }

    #[test]
    fn void_tags_are_closed_and_utf8_kept() {
        let out = ensure_xhtml_void_tags("<p>細胞の構造</p><hr><img src=\"x.png\"/><br>");
        assert!(out.contains("細胞の構造"));
        assert!(out.contains("<hr />"));
        assert!(out.contains("<img src=\"x.png\"/>"));
        assert!(out.ends_with("<br />"));
    }
}
