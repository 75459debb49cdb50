//! PDF adapter
//!
//! Words are recovered from each page's content stream by following the
//! text-showing operators and the text matrix, with string bytes decoded
//! through the page's fonts. Every page is a progress
//! section and every word a unit. Translations are drawn as an overlay:
//! the original word box is painted white and the translated word is
//! written at the same baseline.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::config::{DocumentOptions, PdfOverlayMode};
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;
use crate::processors::pdf_fonts::{fonts_from_resources, win_ansi_byte, FontDecoder};

const FORMAT: &str = "pdf";

/// Resource name of the overlay font
const OVERLAY_FONT: &str = "FOverlay";

/// Horizontal advance of one glyph, in text space units per point of size
const GLYPH_ADVANCE: f32 = 0.5;

/// TJ adjustments wider than this (thousandths of an em) separate words
const WORD_GAP: f32 = 200.0;

const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// A word and its box in top-left origin page coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct PdfWord {
    pub text: String,
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl PdfWord {
    fn height(&self) -> f32 {
        (self.bottom - self.top).max(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordLocation {
    pub page: usize,
    pub word: usize,
}

#[derive(Debug)]
struct Page {
    id: ObjectId,
    /// Upper edge of the media box, used to flip y
    top_edge: f32,
    words: Vec<PdfWord>,
    translations: Vec<Option<String>>,
}

/// A loaded PDF document
#[derive(Debug)]
pub struct PdfAdapter {
    document: Document,
    original: Vec<u8>,
    pages: Vec<Page>,
    mode: PdfOverlayMode,
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Page attribute, looked up through the page tree when not set on the page
fn inherited<'a>(document: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = document.get_dictionary(page).ok()?;
    // page trees are shallow; the bound guards against reference cycles
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return resolve(document, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = document.get_dictionary(parent).ok()?;
    }
    None
}

fn media_box(document: &Document, page: ObjectId) -> [f32; 4] {
    let values: Option<Vec<f32>> = inherited(document, page, b"MediaBox")
        .and_then(|o| o.as_array().ok())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| resolve(document, item).and_then(number))
                .collect()
        });
    match values.as_deref() {
        Some([x0, y0, x1, y1]) => [*x0, *y0, *x1, *y1],
        _ => DEFAULT_MEDIA_BOX,
    }
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

#[derive(Debug)]
struct PendingWord {
    text: String,
    x0: f32,
    x1: f32,
    baseline: f32,
    height: f32,
}

/// Fonts of one page by resource name
pub type PageFonts = HashMap<Vec<u8>, FontDecoder>;

/// Text state while walking one content stream
struct WordCollector<'a> {
    fonts: &'a PageFonts,
    font: Option<&'a FontDecoder>,
    top_edge: f32,
    font_size: f32,
    leading: f32,
    matrix: Matrix,
    line_matrix: Matrix,
    pending: Option<PendingWord>,
    words: Vec<PdfWord>,
}

impl<'a> WordCollector<'a> {
    fn new(top_edge: f32, fonts: &'a PageFonts) -> Self {
        Self {
            fonts,
            font: None,
            top_edge,
            font_size: 12.0,
            leading: 0.0,
            matrix: IDENTITY,
            line_matrix: IDENTITY,
            pending: None,
            words: Vec::new(),
        }
    }

    fn flush(&mut self) {
        if let Some(word) = self.pending.take() {
            self.words.push(PdfWord {
                text: word.text,
                x0: word.x0,
                top: self.top_edge - (word.baseline + word.height),
                x1: word.x1,
                bottom: self.top_edge - word.baseline,
            });
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.flush();
        let m = self.line_matrix;
        self.line_matrix = [m[0], m[1], m[2], m[3], m[4] + tx * m[0] + ty * m[2], m[5] + tx * m[1] + ty * m[3]];
        self.matrix = self.line_matrix;
    }

    fn advance(&mut self, amount: f32) {
        self.matrix[4] += amount * self.matrix[0];
        self.matrix[5] += amount * self.matrix[1];
    }

    fn show(&mut self, bytes: &[u8]) {
        let glyphs = match self.font {
            Some(font) => font.decode(bytes),
            None => FontDecoder::simple().decode(bytes),
        };
        let scale = self.matrix[2].hypot(self.matrix[3]);
        for glyph in glyphs {
            let x = self.matrix[4];
            self.advance(GLYPH_ADVANCE * self.font_size);

            if glyph.chars().all(|c| c.is_whitespace() || c.is_control()) {
                self.flush();
                continue;
            }

            let end = self.matrix[4];
            let height = self.font_size * scale;
            let baseline = self.matrix[5];
            match self.pending.as_mut() {
                Some(word) => {
                    word.text.push_str(&glyph);
                    word.x1 = end;
                }
                None => {
                    self.pending = Some(PendingWord {
                        text: glyph,
                        x0: x,
                        x1: end,
                        baseline,
                        height,
                    })
                }
            }
        }
    }

    fn apply(&mut self, operation: &Operation) {
        let operands = &operation.operands;
        let num = |i: usize| operands.get(i).and_then(number).unwrap_or(0.0);

        match operation.operator.as_str() {
            "BT" => {
                self.flush();
                self.matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "ET" => self.flush(),
            "Tf" => {
                let fonts = self.fonts;
                self.font = match operands.first() {
                    Some(Object::Name(name)) => fonts.get(name),
                    _ => None,
                };
                self.font_size = num(1);
            }
            "TL" => self.leading = num(0),
            "Td" => self.move_line(num(0), num(1)),
            "TD" => {
                self.leading = -num(1);
                self.move_line(num(0), num(1));
            }
            "Tm" if operands.len() >= 6 => {
                self.flush();
                self.line_matrix = [num(0), num(1), num(2), num(3), num(4), num(5)];
                self.matrix = self.line_matrix;
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                let Some(Object::Array(items)) = operands.first() else {
                    return;
                };
                for item in items {
                    match item {
                        Object::String(bytes, _) => self.show(bytes),
                        other => {
                            if let Some(adjust) = number(other) {
                                if -adjust > WORD_GAP {
                                    self.flush();
                                }
                                self.advance(-adjust / 1000.0 * self.font_size);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<PdfWord> {
        self.flush();
        self.words
    }
}

/// Words of one decoded content stream
pub fn extract_words(content: &Content, top_edge: f32, fonts: &PageFonts) -> Vec<PdfWord> {
    let mut collector = WordCollector::new(top_edge, fonts);
    for operation in &content.operations {
        collector.apply(operation);
    }
    collector.finish()
}

/// Encode for the overlay font; characters WinAnsiEncoding lacks become `?`
fn win_ansi_bytes(text: &str) -> Vec<u8> {
    text.chars().map(|c| win_ansi_byte(c).unwrap_or(b'?')).collect()
}

/// Overlay operations for one page
fn overlay_operations(page: &Page) -> Vec<Operation> {
    let mut operations = vec![Operation::new("Q", vec![]), Operation::new("q", vec![])];

    for (word, translation) in page.words.iter().zip(&page.translations) {
        let Some(text) = translation else {
            continue;
        };
        let size = word.height();
        let baseline = page.top_edge - word.bottom;
        let width = (word.x1 - word.x0).max(size * GLYPH_ADVANCE * text.chars().count() as f32);

        operations.push(Operation::new("g", vec![1.into()]));
        operations.push(Operation::new(
            "re",
            vec![
                word.x0.into(),
                (baseline - size * 0.2).into(),
                width.into(),
                (size * 1.2).into(),
            ],
        ));
        operations.push(Operation::new("f", vec![]));
        operations.push(Operation::new("g", vec![0.into()]));
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(OVERLAY_FONT.as_bytes().to_vec()), size.into()],
        ));
        operations.push(Operation::new(
            "Tm",
            vec![
                1.into(),
                0.into(),
                0.into(),
                1.into(),
                word.x0.into(),
                baseline.into(),
            ],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(win_ansi_bytes(text))]));
        operations.push(Operation::new("ET", vec![]));
    }

    operations.push(Operation::new("Q", vec![]));
    operations
}

impl PdfAdapter {
    /// Extracted words, page by page
    pub fn words(&self) -> impl Iterator<Item = (usize, &PdfWord)> {
        self.pages
            .iter()
            .enumerate()
            .flat_map(|(p, page)| page.words.iter().map(move |w| (p, w)))
    }

    fn overlay_font(&mut self) -> ObjectId {
        self.document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        })
    }

    /// Attach the overlay font to a page, copying inherited resources onto
    /// the page so sibling pages are unaffected
    fn add_font_resource(&mut self, page: ObjectId, font: ObjectId) -> DocumentResult<()> {
        let mut resources = inherited(&self.document, page, b"Resources")
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default();
        let mut fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|o| resolve(&self.document, o))
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default();
        fonts.set(OVERLAY_FONT, Object::Reference(font));
        resources.set("Font", Object::Dictionary(fonts));

        let dict = self
            .document
            .get_object_mut(page)
            .and_then(Object::as_dict_mut)
            .map_err(|e| DocumentError::serialize(FORMAT, e))?;
        dict.set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    /// Wrap the page's existing content in `q`/`Q` and append `operations`
    fn append_content(&mut self, page: ObjectId, operations: Vec<Operation>) -> DocumentResult<()> {
        let overlay = Content { operations }
            .encode()
            .map_err(|e| DocumentError::serialize(FORMAT, e))?;
        let save = self
            .document
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay = self.document.add_object(Stream::new(Dictionary::new(), overlay));

        let dict = self
            .document
            .get_object_mut(page)
            .and_then(Object::as_dict_mut)
            .map_err(|e| DocumentError::serialize(FORMAT, e))?;

        let mut contents = vec![Object::Reference(save)];
        match dict.get(b"Contents") {
            Ok(Object::Reference(id)) => contents.push(Object::Reference(*id)),
            Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
            _ => {}
        }
        contents.push(Object::Reference(overlay));
        dict.set("Contents", Object::Array(contents));
        Ok(())
    }
}

impl DocumentAdapter for PdfAdapter {
    type Location = WordLocation;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], options: &DocumentOptions) -> DocumentResult<Self> {
        let document = Document::load_mem(bytes).map_err(|e| DocumentError::load(FORMAT, e))?;

        let mut pages = Vec::new();
        for (number, id) in document.get_pages() {
            let top_edge = media_box(&document, id)[3];
            let raw = document
                .get_page_content(id)
                .map_err(|e| DocumentError::load(FORMAT, format!("page {}: {}", number, e)))?;
            let content = Content::decode(&raw)
                .map_err(|e| DocumentError::load(FORMAT, format!("page {}: {}", number, e)))?;
            let fonts = inherited(&document, id, b"Resources")
                .and_then(|o| o.as_dict().ok())
                .map(|resources| fonts_from_resources(&document, resources))
                .unwrap_or_default();
            let words = extract_words(&content, top_edge, &fonts);
            debug!("PDF page {}: {} words", number, words.len());

            pages.push(Page {
                id,
                top_edge,
                translations: vec![None; words.len()],
                words,
            });
        }

        Ok(Self {
            document,
            original: bytes.to_vec(),
            pages,
            mode: options.pdf_overlay,
        })
    }

    fn plan(&self) -> ProgressPlan {
        ProgressPlan::Sectioned {
            sizes: self.pages.iter().map(|p| p.words.len()).collect(),
        }
    }

    fn units(&self) -> Vec<TranslationUnit<WordLocation>> {
        let mut units = Vec::new();
        for (p, page) in self.pages.iter().enumerate() {
            for (w, word) in page.words.iter().enumerate() {
                let location = WordLocation { page: p, word: w };
                units.push(TranslationUnit::new(word.text.clone(), location).in_section(p));
            }
        }
        units
    }

    fn write_back(&mut self, location: &WordLocation, text: String) -> DocumentResult<()> {
        let slot = self
            .pages
            .get_mut(location.page)
            .and_then(|p| p.translations.get_mut(location.word))
            .ok_or_else(|| DocumentError::serialize(FORMAT, format!("unknown word {:?}", location)))?;
        *slot = Some(text);
        Ok(())
    }

    fn serialize(mut self) -> DocumentResult<Vec<u8>> {
        let overlays: Vec<(ObjectId, Vec<Operation>)> = self
            .pages
            .iter()
            .filter(|p| p.translations.iter().any(Option::is_some))
            .map(|p| (p.id, overlay_operations(p)))
            .collect();

        if self.mode == PdfOverlayMode::Discard {
            warn!(
                "PDF overlay mode is 'discard': {} page overlay(s) built and dropped, returning original pages",
                overlays.len()
            );
            return Ok(self.original);
        }

        if !overlays.is_empty() {
            let font = self.overlay_font();
            for (page, operations) in overlays {
                self.add_font_resource(page, font)?;
                self.append_content(page, operations)?;
            }
        }

        let mut output = Vec::new();
        self.document
            .save_to(&mut output)
            .map_err(|e| DocumentError::serialize(FORMAT, e))?;
        Ok(output)
    }

    fn unit_message(&self, unit: &TranslationUnit<WordLocation>, _: usize, _: usize) -> String {
        self.section_message(unit.section)
    }

    fn section_message(&self, section: usize) -> String {
        format!("Translating page {}...", section + 1)
    }
}
