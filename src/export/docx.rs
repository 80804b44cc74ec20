//! WordprocessingML flow document in an OPC zip package.

use std::io::{Cursor, Write as _};

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::export::{Block, blocks, paragraphs, xml_escape};
use crate::formats::Document;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
  <Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
  <Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
</Types>
"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
</Relationships>
"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>
"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:docDefaults>
    <w:rPrDefault><w:rPr><w:rFonts w:ascii="Georgia" w:hAnsi="Georgia"/><w:sz w:val="22"/></w:rPr></w:rPrDefault>
    <w:pPrDefault><w:pPr><w:spacing w:after="160" w:line="276" w:lineRule="auto"/></w:pPr></w:pPrDefault>
  </w:docDefaults>
  <w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style>
  <w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:rPr><w:b/><w:sz w:val="48"/></w:rPr></w:style>
  <w:style w:type="paragraph" w:styleId="Subtitle"><w:name w:val="Subtitle"/><w:basedOn w:val="Normal"/><w:rPr><w:i/><w:sz w:val="26"/></w:rPr></w:style>
  <w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:pPr><w:keepNext/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="36"/></w:rPr></w:style>
  <w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:pPr><w:keepNext/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="28"/></w:rPr></w:style>
  <w:style w:type="paragraph" w:styleId="Heading3"><w:name w:val="heading 3"/><w:basedOn w:val="Normal"/><w:pPr><w:keepNext/><w:outlineLvl w:val="2"/></w:pPr><w:rPr><w:b/><w:color w:val="555555"/><w:sz w:val="22"/></w:rPr></w:style>
  <w:style w:type="paragraph" w:styleId="ListBullet"><w:name w:val="List Bullet"/><w:basedOn w:val="Normal"/><w:pPr><w:ind w:left="720" w:hanging="360"/></w:pPr></w:style>
  <w:style w:type="paragraph" w:styleId="Quote"><w:name w:val="Quote"/><w:basedOn w:val="Normal"/><w:pPr><w:ind w:left="720"/></w:pPr><w:rPr><w:i/></w:rPr></w:style>
</w:styles>
"#;

pub fn render(document: &Document) -> anyhow::Result<Vec<u8>> {
    let body = render_body(document);
    let core = render_core_properties(document);

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let entries: [(&str, &str); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", PACKAGE_RELS),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
        ("word/styles.xml", STYLES),
        ("word/document.xml", body.as_str()),
        ("docProps/core.xml", core.as_str()),
    ];
    for (name, contents) in entries {
        zip.start_file(name, options)
            .with_context(|| format!("docx start_file {name}"))?;
        zip.write_all(contents.as_bytes())
            .with_context(|| format!("docx write {name}"))?;
    }

    let cursor = zip.finish().context("docx finish zip")?;
    Ok(cursor.into_inner())
}

fn render_body(document: &Document) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    out.push_str(
        "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\n",
    );
    out.push_str("<w:body>\n");

    for block in blocks(document) {
        match block {
            Block::Title(title) => out.push_str(&paragraph(Some("Title"), title)),
            Block::Description(text) => {
                if !text.trim().is_empty() {
                    out.push_str(&paragraph(Some("Subtitle"), text));
                }
            }
            Block::ChapterHeading { ordinal, title } => {
                out.push_str("<w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>\n");
                out.push_str(&paragraph(
                    Some("Heading1"),
                    &format!("Chapter {ordinal}: {title}"),
                ));
            }
            Block::Objectives(items) => {
                out.push_str(&bold_paragraph("Learning objectives"));
                for item in items {
                    out.push_str(&paragraph(Some("ListBullet"), &format!("\u{2022} {item}")));
                }
            }
            Block::SectionHeading { address, title } => {
                out.push_str(&paragraph(Some("Heading2"), &format!("{address} {title}")));
            }
            Block::Paragraph { text, .. } => out.push_str(&paragraph(None, text)),
            Block::Supplement { content_type, text } => {
                out.push_str(&paragraph(Some("Heading3"), content_type.label()));
                for para in paragraphs(text) {
                    out.push_str(&paragraph(Some("Quote"), para));
                }
            }
            Block::ChapterSummary(text) => {
                out.push_str(&format!(
                    "<w:p>{}{}</w:p>\n",
                    run("Summary: ", true),
                    run(text.trim(), false)
                ));
            }
        }
    }

    out.push_str("<w:sectPr><w:pgSz w:w=\"11906\" w:h=\"16838\"/><w:pgMar w:top=\"1440\" w:right=\"1440\" w:bottom=\"1440\" w:left=\"1440\"/></w:sectPr>\n");
    out.push_str("</w:body>\n");
    out.push_str("</w:document>\n");
    out
}

fn paragraph(style: Option<&str>, text: &str) -> String {
    let props = style
        .map(|s| format!("<w:pPr><w:pStyle w:val=\"{s}\"/></w:pPr>"))
        .unwrap_or_default();
    format!("<w:p>{props}{}</w:p>\n", run(text, false))
}

fn bold_paragraph(text: &str) -> String {
    format!("<w:p>{}</w:p>\n", run(text, true))
}

fn run(text: &str, bold: bool) -> String {
    let props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        "<w:r>{props}<w:t xml:space=\"preserve\">{}</w:t></w:r>",
        xml_escape(text)
    )
}

fn render_core_properties(document: &Document) -> String {
    let now = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <dc:title>{title}</dc:title>
  <dc:subject>{subject}</dc:subject>
  <dc:creator>textbookify</dc:creator>
  <dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>
</cp:coreProperties>
"#,
        title = xml_escape(&document.title),
        subject = xml_escape(&document.parameters.topic),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use super::*;
    use crate::export::test_support::completed_document;

    #[test]
    fn package_contains_required_parts() {
        let bytes = render(&completed_document()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        for name in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
        ] {
            assert!(archive.by_name(name).is_ok(), "missing {name}");
        }

        let mut body = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert!(body.contains("<w:pStyle w:val=\"Title\"/>"));
        assert_eq!(body.matches("<w:pStyle w:val=\"Heading1\"/>").count(), 2);
        assert_eq!(body.matches("<w:pStyle w:val=\"Heading2\"/>").count(), 4);
        assert!(body.contains("Membranes &amp; organelles &lt;matter&gt;."));
    }
}
