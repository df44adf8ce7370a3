//! HTML markup to positioned text lines.
//!
//! Only document structure is honoured: headings, paragraphs, list items,
//! preformatted blocks, line breaks and forced page breaks. CSS beyond the
//! page-break properties is ignored.

use super::RenderError;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::cell::RefCell;

/// Marks a `<br>` inside collected text; source newlines are plain whitespace.
const LINE_BREAK: char = '\u{2028}';

/// Helvetica advance widths for ASCII 0x20..=0x7E, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];
const DEFAULT_WIDTH: u16 = 556;
const COURIER_WIDTH: u16 = 600;

/// Base-14 fonts used for layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Font {
    Regular,
    Bold,
    Mono,
}

impl Font {
    pub(crate) const ALL: [Self; 3] = [Self::Regular, Self::Bold, Self::Mono];

    pub(crate) const fn resource_name(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
            Self::Mono => "F3",
        }
    }

    pub(crate) const fn base_font(self) -> &'static str {
        match self {
            Self::Regular => "Helvetica",
            Self::Bold => "Helvetica-Bold",
            Self::Mono => "Courier",
        }
    }

    fn char_width(self, c: char) -> f32 {
        let units = match self {
            Self::Mono => COURIER_WIDTH,
            Self::Regular | Self::Bold => {
                let idx = (c as u32).wrapping_sub(0x20) as usize;
                HELVETICA_WIDTHS.get(idx).copied().unwrap_or(DEFAULT_WIDTH)
            }
        };
        // Bold glyphs run slightly wider; overestimating keeps lines in the margins.
        let factor = if self == Self::Bold { 1.06 } else { 1.0 };
        f32::from(units) * factor / 1000.0
    }

    pub(crate) fn text_width(self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c)).sum::<f32>() * size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Paragraph,
    Heading(u8),
    ListItem,
    Preformatted,
}

/// A run of text laid out as one unit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) text: String,
    pub(crate) page_break_before: bool,
}

struct BlockStyle {
    font: Font,
    size: f32,
    indent: f32,
    space_after: f32,
}

impl BlockKind {
    fn style(self) -> BlockStyle {
        let (font, size, indent) = match self {
            Self::Paragraph => (Font::Regular, 11.0, 0.0),
            Self::Heading(1) => (Font::Bold, 20.0, 0.0),
            Self::Heading(2) => (Font::Bold, 16.0, 0.0),
            Self::Heading(3) => (Font::Bold, 13.0, 0.0),
            Self::Heading(_) => (Font::Bold, 11.0, 0.0),
            Self::ListItem => (Font::Regular, 11.0, 14.0),
            Self::Preformatted => (Font::Mono, 9.5, 0.0),
        };
        BlockStyle {
            font,
            size,
            indent,
            space_after: size * 0.6,
        }
    }
}

/// Parses HTML markup into a flat list of blocks.
pub(crate) fn parse_blocks(markup: &str) -> Result<Vec<Block>, RenderError> {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| RenderError::Layout(format!("failed to parse markup: {e}")))?;

    let mut collector = BlockCollector::default();
    collector.walk(&dom.document);
    collector.flush();
    Ok(collector.blocks)
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<Block>,
    current: String,
    kind: Option<BlockKind>,
    pending_break: bool,
}

impl BlockCollector {
    fn walk(&mut self, handle: &Handle) {
        match &handle.data {
            NodeData::Document => self.walk_children(handle),
            NodeData::Element { name, attrs, .. } => {
                let tag = &*name.local;
                if matches!(
                    tag,
                    "head" | "title" | "script" | "style" | "template" | "noscript"
                ) {
                    return;
                }

                let style = inline_style(attrs);
                let break_before = style.contains("page-break-before:always")
                    || style.contains("break-before:page");
                let break_after = style.contains("page-break-after:always")
                    || style.contains("break-after:page");

                match tag {
                    "br" => self.current.push(LINE_BREAK),
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = tag.as_bytes()[1] - b'0';
                        self.block(BlockKind::Heading(level), handle, break_before);
                    }
                    "li" | "dd" => self.block(BlockKind::ListItem, handle, break_before),
                    "pre" => self.block(BlockKind::Preformatted, handle, break_before),
                    "p" | "div" | "section" | "article" | "header" | "footer" | "main"
                    | "nav" | "aside" | "address" | "blockquote" | "figure" | "figcaption"
                    | "ul" | "ol" | "dl" | "dt" | "table" | "tr" | "body" | "html" | "hr" => {
                        self.block(BlockKind::Paragraph, handle, break_before);
                    }
                    "td" | "th" => {
                        self.walk_children(handle);
                        self.current.push(' ');
                    }
                    _ => {
                        if break_before {
                            self.flush();
                            self.pending_break = true;
                        }
                        self.walk_children(handle);
                    }
                }

                if break_after {
                    self.flush();
                    self.pending_break = true;
                }
            }
            NodeData::Text { contents } => self.current.push_str(&contents.borrow()),
            _ => {}
        }
    }

    fn walk_children(&mut self, handle: &Handle) {
        for child in handle.children.borrow().iter() {
            self.walk(child);
        }
    }

    fn block(&mut self, kind: BlockKind, handle: &Handle, break_before: bool) {
        self.flush();
        if break_before {
            self.pending_break = true;
        }
        let outer = self.kind.replace(kind);
        self.walk_children(handle);
        self.flush();
        self.kind = outer;
    }

    /// Closes the text collected so far into a block; empty text is dropped.
    fn flush(&mut self) {
        let raw = std::mem::take(&mut self.current);
        let kind = self.kind.unwrap_or(BlockKind::Paragraph);

        let text = if kind == BlockKind::Preformatted {
            raw.replace(LINE_BREAK, "\n").trim_matches('\n').to_string()
        } else {
            let lines: Vec<String> = raw
                .split(LINE_BREAK)
                .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect();
            lines.join("\n").trim_matches('\n').to_string()
        };

        if text.trim().is_empty() {
            return;
        }

        let text = if kind == BlockKind::ListItem {
            format!("- {text}")
        } else {
            text
        };

        self.blocks.push(Block {
            kind,
            text,
            page_break_before: std::mem::take(&mut self.pending_break),
        });
    }
}

/// Lower-cased `style` attribute with whitespace removed.
fn inline_style(attrs: &RefCell<Vec<html5ever::Attribute>>) -> String {
    attrs
        .borrow()
        .iter()
        .find(|attr| &*attr.name.local == "style")
        .map(|attr| {
            attr.value
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default()
}

/// Page size and margins in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Page width
    pub width: f32,
    /// Page height
    pub height: f32,
    /// Margin applied on all four sides
    pub margin: f32,
}

impl PageGeometry {
    /// ISO A4 with 20 mm margins.
    pub const A4: Self = Self {
        width: 595.28,
        height: 841.89,
        margin: 56.69,
    };

    fn text_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::A4
    }
}

/// One line of text at a baseline position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub(crate) font: Font,
    pub(crate) size: f32,
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Page {
    pub(crate) lines: Vec<Line>,
}

/// Flows blocks onto pages. Always yields at least one page.
pub(crate) fn paginate(blocks: &[Block], geometry: &PageGeometry) -> Vec<Page> {
    let top = geometry.height - geometry.margin;
    let mut pages = Vec::new();
    let mut page = Page::default();
    let mut y = top;

    for block in blocks {
        if block.page_break_before && !page.lines.is_empty() {
            pages.push(std::mem::take(&mut page));
            y = top;
        }

        let style = block.kind.style();
        let leading = style.size * 1.3;
        let max_width = geometry.text_width() - style.indent;

        let lines = if block.kind == BlockKind::Preformatted {
            wrap_preformatted(&block.text, style.font, style.size, max_width)
        } else {
            wrap(&block.text, style.font, style.size, max_width)
        };

        for text in lines {
            if y - leading < geometry.margin && !page.lines.is_empty() {
                pages.push(std::mem::take(&mut page));
                y = top;
            }
            y -= leading;
            page.lines.push(Line {
                font: style.font,
                size: style.size,
                x: geometry.margin + style.indent,
                y,
                text,
            });
        }
        y -= style.space_after;
    }

    pages.push(page);
    pages
}

/// Greedy word wrap honouring hard line breaks; over-long words are split.
pub(crate) fn wrap(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let fits = |s: &str| font.text_width(s, size) <= max_width;
    let mut lines = Vec::new();

    for hard_line in text.split('\n') {
        let mut line = String::new();
        for word in hard_line.split(' ') {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if fits(&candidate) {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for c in word.chars() {
                line.push(c);
                if !fits(&line) && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(c);
                }
            }
        }
        lines.push(line);
    }
    lines
}

/// Breaks preformatted text only where a line overflows, keeping spaces.
pub(crate) fn wrap_preformatted(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for hard_line in text.split('\n') {
        let mut line = String::new();
        for c in hard_line.chars() {
            line.push(c);
            if font.text_width(&line, size) > max_width && line.chars().count() > 1 {
                line.pop();
                lines.push(std::mem::take(&mut line));
                line.push(c);
            }
        }
        lines.push(line);
    }
    lines
}
