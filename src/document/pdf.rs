use super::layout::{self, Font, Page, PageGeometry};
use super::{DocumentRenderer, RenderError};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;
use unicode_normalization::UnicodeNormalization;

/// Built-in renderer: lays HTML markup out as text on paginated PDF pages
/// using the standard base-14 fonts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfRenderer {
    geometry: PageGeometry,
}

impl PdfRenderer {
    /// Creates a renderer for A4 pages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses custom page dimensions.
    #[must_use]
    pub const fn with_geometry(geometry: PageGeometry) -> Self {
        Self { geometry }
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render_document(&self, markup: &str, output_path: &Path) -> Result<(), RenderError> {
        let blocks = layout::parse_blocks(markup)?;
        let pages = layout::paginate(&blocks, &self.geometry);
        trace!(
            "Laid out {} blocks on {} pages for {}",
            blocks.len(),
            pages.len(),
            output_path.display()
        );

        let mut document = build_document(&pages, &self.geometry)?;
        let mut bytes = Vec::new();
        document
            .save_to(&mut bytes)
            .map_err(|e| RenderError::Layout(format!("failed to serialize PDF: {e}")))?;

        write_replacing(output_path, &bytes)?;
        Ok(())
    }
}

/// Writes `bytes` next to `path` and renames the result into place, so a
/// failed write never leaves a truncated document at `path`.
fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let partial = partial_path(path);
    let result = fs::write(&partial, bytes).and_then(|()| fs::rename(&partial, path));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".partial");
    path.with_file_name(name)
}

fn build_document(pages: &[Page], geometry: &PageGeometry) -> Result<Document, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut fonts = Dictionary::new();
    for font in Font::ALL {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource_name(), font_id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => fonts,
    });

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content {
            operations: page_operations(page),
        };
        let encoded = content
            .encode()
            .map_err(|e| RenderError::Layout(format!("failed to encode page content: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = i64::try_from(kids.len()).unwrap_or(i64::MAX);
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(geometry.width.into()),
                Object::Real(geometry.height.into()),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::string_literal(concat!("docmerge ", env!("CARGO_PKG_VERSION"))),
        "CreationDate" => Object::string_literal(
            chrono::Local::now().format("D:%Y%m%d%H%M%S").to_string()
        ),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    Ok(doc)
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut operations = Vec::with_capacity(page.lines.len() * 5);
    for line in &page.lines {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![
                Object::Name(line.font.resource_name().as_bytes().to_vec()),
                Object::Real(line.size.into()),
            ],
        ));
        operations.push(Operation::new(
            "Td",
            vec![Object::Real(line.x.into()), Object::Real(line.y.into())],
        ));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(encode_win_ansi(&line.text))],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    operations
}

/// Encodes text for the WinAnsi font encoding.
///
/// Latin-1 maps directly; a few typographic characters map to their
/// Windows-1252 slots; anything else is NFKD-folded to ASCII or becomes `?`.
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        match c {
            '\t' => bytes.push(b' '),
            _ if (0x20..=0x7e).contains(&code) || (0xa0..=0xff).contains(&code) => {
                bytes.push(code as u8);
            }
            '€' => bytes.push(0x80),
            '‚' => bytes.push(0x82),
            '„' => bytes.push(0x84),
            '…' => bytes.push(0x85),
            '‘' => bytes.push(0x91),
            '’' => bytes.push(0x92),
            '“' => bytes.push(0x93),
            '”' => bytes.push(0x94),
            '•' => bytes.push(0x95),
            '–' => bytes.push(0x96),
            '—' => bytes.push(0x97),
            '™' => bytes.push(0x99),
            _ => {
                let folded: Vec<u8> = std::iter::once(c)
                    .nfkd()
                    .filter(|d| d.is_ascii() && !d.is_ascii_control())
                    .map(|d| d as u8)
                    .collect();
                if folded.is_empty() {
                    bytes.push(b'?');
                } else {
                    bytes.extend(folded);
                }
            }
        }
    }
    bytes
}
