use std::io::{Cursor, Write as _};

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::export::html::{LANG, ensure_xhtml_void_tags, markdown_to_html_fragment};
use crate::export::{Block, chapter_blocks, markdown, xml_escape};
use crate::formats::Document;

#[derive(Debug)]
struct ChapterSpec {
    stem: String,
    title: String,
    xhtml: String,
}

/// Packages `document` as an EPUB 3 book with nav and NCX tables of contents.
pub fn render(document: &Document) -> anyhow::Result<Vec<u8>> {
    let title = document.title.as_str();
    let uuid = uuid::Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let mut chapters = vec![ChapterSpec {
        stem: "title".to_owned(),
        title: title.to_owned(),
        xhtml: chapter_xhtml(
            title,
            markdown::render_blocks([Block::Title(title), Block::Description(&document.description)]),
        ),
    }];
    for chapter in &document.chapters {
        let heading = format!("Chapter {}: {}", chapter.ordinal, chapter.title);
        chapters.push(ChapterSpec {
            stem: format!("ch{:03}", chapter.ordinal),
            xhtml: chapter_xhtml(&heading, markdown::render_blocks(chapter_blocks(chapter))),
            title: heading,
        });
    }

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));

    // `mimetype` must be the first entry and stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(b"application/epub+zip")
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let fixed_entries = [
        ("META-INF/container.xml", render_container_xml()),
        (
            "OEBPS/content.opf",
            render_content_opf(title, &document.description, uuid, &modified, &chapters),
        ),
        ("OEBPS/nav.xhtml", render_nav_xhtml(title, &chapters)),
        ("OEBPS/toc.ncx", render_toc_ncx(title, uuid, &chapters)),
        ("OEBPS/style.css", default_style_css().to_owned()),
    ];
    for (name, contents) in &fixed_entries {
        zip.start_file(*name, deflated_options)
            .with_context(|| format!("epub start_file {name}"))?;
        zip.write_all(contents.as_bytes())
            .with_context(|| format!("epub write {name}"))?;
    }

    for chapter in &chapters {
        zip.start_file(format!("OEBPS/{}.xhtml", chapter.stem), deflated_options)
            .with_context(|| format!("epub start_file chapter: {}", chapter.stem))?;
        zip.write_all(chapter.xhtml.as_bytes())
            .with_context(|| format!("epub write chapter: {}", chapter.stem))?;
    }

    let cursor = zip.finish().context("epub finish zip")?;
    Ok(cursor.into_inner())
}

fn chapter_xhtml(title: &str, md: String) -> String {
    let html = ensure_xhtml_void_tags(&markdown_to_html_fragment(&md));
    wrap_xhtml_document(title, &html)
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_owned()
}

fn default_style_css() -> &'static str {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
h4 { margin-bottom: 0.2em; color: #555; text-transform: uppercase; font-size: 0.85em; }
h4 + p { border-left: 4px solid #ddd; padding-left: 1em; }
"#
}

fn render_nav_xhtml(title: &str, chapters: &[ChapterSpec]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{LANG}\" xml:lang=\"{LANG}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for ch in chapters {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(&ch.stem),
            xml_escape(&ch.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, chapters: &[ChapterSpec]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str(&format!(
        "  <docTitle><text>{}</text></docTitle>\n",
        xml_escape(title)
    ));
    out.push_str("  <navMap>\n");
    for (idx, ch) in chapters.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str(&format!(
            "      <navLabel><text>{}</text></navLabel>\n",
            xml_escape(&ch.title)
        ));
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&ch.stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    title: &str,
    description: &str,
    uuid: uuid::Uuid,
    modified: &str,
    chapters: &[ChapterSpec],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{LANG}\">\n"
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{uuid}</dc:identifier>\n"
    ));
    out.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(title)));
    out.push_str(&format!("    <dc:language>{LANG}</dc:language>\n"));
    if !description.trim().is_empty() {
        out.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(description.trim())
        ));
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <item id=\"{0}\" href=\"{0}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&ch.stem)
        ));
    }
    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&ch.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn wrap_xhtml_document(title: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{LANG}\" xml:lang=\"{LANG}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}
