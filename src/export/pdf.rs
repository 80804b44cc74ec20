//! Paginated A4 output using the standard Helvetica faces.

use anyhow::Context as _;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, Stream, dictionary};

use crate::export::{Block, blocks, paragraphs, wrap};
use crate::formats::Document;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const FOOTER_Y: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Oblique,
}

impl Face {
    fn resource(self) -> &'static [u8] {
        match self {
            Face::Regular => b"F1",
            Face::Bold => b"F2",
            Face::Oblique => b"F3",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Style {
    face: Face,
    size: i64,
    leading: i64,
    indent: i64,
    /// Wrap width in characters.
    width: usize,
}

const TITLE: Style = Style { face: Face::Bold, size: 24, leading: 32, indent: 0, width: 38 };
const SUBTITLE: Style = Style { face: Face::Oblique, size: 12, leading: 17, indent: 0, width: 80 };
const CHAPTER: Style = Style { face: Face::Bold, size: 18, leading: 26, indent: 0, width: 52 };
const SECTION: Style = Style { face: Face::Bold, size: 13, leading: 19, indent: 0, width: 72 };
const LABEL: Style = Style { face: Face::Bold, size: 11, leading: 15, indent: 0, width: 86 };
const BODY: Style = Style { face: Face::Regular, size: 11, leading: 15, indent: 0, width: 86 };
const BULLET: Style = Style { face: Face::Regular, size: 11, leading: 15, indent: 14, width: 82 };
const ASIDE: Style = Style { face: Face::Oblique, size: 11, leading: 15, indent: 20, width: 80 };

#[derive(Debug, Clone)]
enum Item {
    Line { style: Style, text: String },
    Gap(i64),
    PageBreak,
}

pub fn render(document: &Document) -> anyhow::Result<Vec<u8>> {
    let pages = paginate(&layout(document));

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font = |base: &str| {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base,
            "Encoding" => "WinAnsiEncoding",
        }
    };
    let regular_id = doc.add_object(font("Helvetica"));
    let bold_id = doc.add_object(font("Helvetica-Bold"));
    let oblique_id = doc.add_object(font("Helvetica-Oblique"));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
            "F3" => oblique_id,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .context("encode pdf page content")?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(pdf_text(&document.title)),
        "Subject" => Object::string_literal(pdf_text(&document.parameters.topic)),
        "Producer" => Object::string_literal("textbookify"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out).context("write pdf")?;
    Ok(out)
}

fn layout(document: &Document) -> Vec<Item> {
    let mut items = Vec::new();
    for block in blocks(document) {
        match block {
            Block::Title(title) => {
                items.push(Item::Gap(120));
                push_wrapped(&mut items, TITLE, title);
                items.push(Item::Gap(12));
            }
            Block::Description(text) => push_wrapped(&mut items, SUBTITLE, text),
            Block::ChapterHeading { ordinal, title } => {
                items.push(Item::PageBreak);
                push_wrapped(&mut items, CHAPTER, &format!("Chapter {ordinal}: {title}"));
                items.push(Item::Gap(8));
            }
            Block::Objectives(objectives) => {
                push_wrapped(&mut items, LABEL, "Learning objectives");
                for objective in objectives {
                    push_wrapped(&mut items, BULLET, &format!("- {objective}"));
                }
                items.push(Item::Gap(8));
            }
            Block::SectionHeading { address, title } => {
                items.push(Item::Gap(10));
                push_wrapped(&mut items, SECTION, &format!("{address} {title}"));
                items.push(Item::Gap(4));
            }
            Block::Paragraph { text, .. } => {
                push_wrapped(&mut items, BODY, text);
                items.push(Item::Gap(6));
            }
            Block::Supplement { content_type, text } => {
                push_wrapped(&mut items, LABEL, content_type.label());
                for paragraph in paragraphs(text) {
                    push_wrapped(&mut items, ASIDE, paragraph);
                    items.push(Item::Gap(6));
                }
            }
            Block::ChapterSummary(text) => {
                items.push(Item::Gap(10));
                push_wrapped(&mut items, LABEL, "Summary");
                push_wrapped(&mut items, BODY, text);
            }
        }
    }
    items
}

fn push_wrapped(items: &mut Vec<Item>, style: Style, text: &str) {
    items.extend(
        wrap(text, style.width)
            .into_iter()
            .map(|text| Item::Line { style, text }),
    );
}

/// Places items top to bottom, one operation list per page.
fn paginate(items: &[Item]) -> Vec<Vec<Operation>> {
    let top = PAGE_HEIGHT - MARGIN;
    let mut pages: Vec<Vec<Operation>> = vec![Vec::new()];
    let mut y = top;

    for item in items {
        match item {
            Item::PageBreak => {
                if y < top {
                    pages.push(Vec::new());
                    y = top;
                }
            }
            Item::Gap(gap) => {
                if y < top {
                    y -= gap;
                }
            }
            Item::Line { style, text } => {
                if y - style.leading < MARGIN {
                    pages.push(Vec::new());
                    y = top;
                }
                y -= style.leading;
                if let Some(page) = pages.last_mut() {
                    page.extend(text_ops(style.face, style.size, MARGIN + style.indent, y, text));
                }
            }
        }
    }

    let total = pages.len();
    for (idx, page) in pages.iter_mut().enumerate() {
        let label = format!("{} / {total}", idx + 1);
        page.extend(text_ops(Face::Regular, 9, PAGE_WIDTH / 2 - 12, FOOTER_Y, &label));
    }
    pages
}

fn text_ops(face: Face, size: i64, x: i64, y: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(face.resource().to_vec()), Object::Integer(size)],
        ),
        Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]),
        Operation::new("Tj", vec![Object::string_literal(pdf_text(text))]),
        Operation::new("ET", vec![]),
    ]
}

/// WinAnsi bytes for `text`. Characters outside Latin-1 fall back to a
/// close ASCII form or `?`.
fn pdf_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => out.push(b'"'),
            '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{2022}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            '\t' | '\n' | '\r' => out.push(b' '),
            ' '..='~' => out.push(c as u8),
            '\u{A0}'..='\u{FF}' => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}
