//! Word document adapter
//!
//! Units are the body paragraphs in document order followed by every table
//! cell, table by table and row by row. Progress counts table slots against
//! the grid width so merged cells still account for the columns they span.

use quick_xml::events::Event;
use tracing::debug;

use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;
use crate::processors::ooxml::{get_attr, local_name, Package, TextBlock, XmlPart};

const FORMAT: &str = "docx";
const DOCUMENT_PART: &str = "word/document.xml";

/// Where a unit's text lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocxLocation {
    Paragraph { index: usize, block: usize },
    Cell {
        table: usize,
        row: usize,
        col: usize,
        block: usize,
    },
}

impl DocxLocation {
    fn block(&self) -> usize {
        match self {
            DocxLocation::Paragraph { block, .. } | DocxLocation::Cell { block, .. } => *block,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CellRef {
    block: usize,
    span: usize,
}

#[derive(Debug, Clone, Default)]
struct Table {
    grid_cols: usize,
    rows: Vec<Vec<CellRef>>,
}

impl Table {
    /// Slots the table contributes to progress
    fn width(&self) -> usize {
        if self.grid_cols > 0 {
            return self.grid_cols;
        }
        self.rows
            .iter()
            .map(|row| row.iter().map(|c| c.span).sum::<usize>())
            .max()
            .unwrap_or(0)
    }
}

/// Open element context while walking `document.xml`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Body,
    Table(usize),
    Grid(usize),
    Row(usize),
    Cell(usize, usize),
    CellProps(usize),
    Paragraph(Option<usize>),
    Text(Option<usize>),
    Other,
}

/// A loaded `.docx` package
#[derive(Debug)]
pub struct DocxAdapter {
    package: Package,
    document: XmlPart,
    blocks: Vec<TextBlock>,
    paragraphs: Vec<usize>,
    tables: Vec<Table>,
}

impl DocxAdapter {
    fn scan(document: &XmlPart) -> (Vec<TextBlock>, Vec<usize>, Vec<Table>) {
        let mut blocks: Vec<TextBlock> = Vec::new();
        let mut paragraphs = Vec::new();
        let mut tables: Vec<Table> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();

        for (index, event) in document.events().iter().enumerate() {
            match event {
                Event::Start(e) | Event::Empty(e) => {
                    let parent = stack.last().copied();
                    let name = local_name(e.name().as_ref()).to_vec();
                    let frame = match (name.as_slice(), parent) {
                        (b"body", _) => Frame::Body,
                        (b"p", Some(Frame::Body)) => {
                            let mut block = TextBlock::default();
                            block.open_paragraph();
                            blocks.push(block);
                            paragraphs.push(blocks.len() - 1);
                            Frame::Paragraph(Some(blocks.len() - 1))
                        }
                        (b"p", Some(Frame::Cell(_, block))) => {
                            blocks[block].open_paragraph();
                            Frame::Paragraph(Some(block))
                        }
                        (b"p", _) => Frame::Paragraph(None),
                        (b"t", _) => Frame::Text(
                            stack.iter().rev().find_map(|f| match f {
                                Frame::Paragraph(owner) => Some(*owner),
                                _ => None,
                            })
                            .flatten(),
                        ),
                        (b"tbl", Some(Frame::Body)) => {
                            tables.push(Table::default());
                            Frame::Table(tables.len() - 1)
                        }
                        (b"tblGrid", Some(Frame::Table(table))) => Frame::Grid(table),
                        (b"gridCol", Some(Frame::Grid(table))) => {
                            tables[table].grid_cols += 1;
                            Frame::Other
                        }
                        (b"tr", Some(Frame::Table(table))) => {
                            tables[table].rows.push(Vec::new());
                            Frame::Row(table)
                        }
                        (b"tc", Some(Frame::Row(table))) => {
                            blocks.push(TextBlock::default());
                            let block = blocks.len() - 1;
                            if let Some(row) = tables[table].rows.last_mut() {
                                row.push(CellRef { block, span: 1 });
                            }
                            Frame::Cell(table, block)
                        }
                        (b"tcPr", Some(Frame::Cell(table, _))) => Frame::CellProps(table),
                        (b"gridSpan", Some(Frame::CellProps(table))) => {
                            let span = get_attr(e, b"w:val")
                                .or_else(|| get_attr(e, b"val"))
                                .and_then(|v| v.parse::<usize>().ok())
                                .unwrap_or(1)
                                .max(1);
                            if let Some(cell) =
                                tables[table].rows.last_mut().and_then(|row| row.last_mut())
                            {
                                cell.span = span;
                            }
                            Frame::Other
                        }
                        _ => Frame::Other,
                    };
                    if matches!(event, Event::Start(_)) {
                        stack.push(frame);
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(_) | Event::CData(_) => {
                    if let Some(Frame::Text(Some(block))) = stack.last() {
                        blocks[*block].push_segment(index);
                    }
                }
                _ => {}
            }
        }

        (blocks, paragraphs, tables)
    }
}

impl DocumentAdapter for DocxAdapter {
    type Location = DocxLocation;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], _options: &DocumentOptions) -> DocumentResult<Self> {
        let package = Package::read(bytes, FORMAT)?;
        let document = XmlPart::parse(package.require(DOCUMENT_PART, FORMAT)?, FORMAT)?;
        let (blocks, paragraphs, tables) = Self::scan(&document);

        Ok(Self {
            package,
            document,
            blocks,
            paragraphs,
            tables,
        })
    }

    fn plan(&self) -> ProgressPlan {
        let cells: usize = self
            .tables
            .iter()
            .map(|table| table.rows.len() * table.width())
            .sum();
        ProgressPlan::Linear {
            total: self.paragraphs.len() + cells,
        }
    }

    fn units(&self) -> Vec<TranslationUnit<DocxLocation>> {
        let mut units: Vec<TranslationUnit<DocxLocation>> = self
            .paragraphs
            .iter()
            .enumerate()
            .map(|(index, &block)| {
                TranslationUnit::new(
                    self.blocks[block].text(&self.document),
                    DocxLocation::Paragraph { index, block },
                )
            })
            .collect();

        for (t, table) in self.tables.iter().enumerate() {
            let width = table.width();
            for (r, row) in table.rows.iter().enumerate() {
                let used: usize = row.iter().map(|c| c.span).sum();
                let last = row.len().saturating_sub(1);
                for (c, cell) in row.iter().enumerate() {
                    let mut weight = cell.span;
                    if c == last {
                        weight += width.saturating_sub(used);
                    }
                    units.push(
                        TranslationUnit::new(
                            self.blocks[cell.block].text(&self.document),
                            DocxLocation::Cell {
                                table: t,
                                row: r,
                                col: c,
                                block: cell.block,
                            },
                        )
                        .with_weight(weight),
                    );
                }
            }
        }

        units
    }

    fn write_back(&mut self, location: &DocxLocation, text: String) -> DocumentResult<()> {
        let block = self.blocks.get(location.block()).ok_or_else(|| {
            DocumentError::serialize(FORMAT, format!("unknown location {:?}", location))
        })?;
        if !block.write(&mut self.document, text) {
            debug!("No text run to hold the translation at {:?}", location);
        }
        Ok(())
    }

    fn serialize(mut self) -> DocumentResult<Vec<u8>> {
        let document = self.document.to_bytes(FORMAT)?;
        self.package.set_part(DOCUMENT_PART, document);
        self.package.write(FORMAT)
    }

    fn unit_message(&self, unit: &TranslationUnit<DocxLocation>, _: usize, _: usize) -> String {
        match unit.location {
            DocxLocation::Paragraph { .. } => "Translating document content...".to_string(),
            DocxLocation::Cell { .. } => "Translating tables...".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ooxml::test_support::{build_package, read_part};

    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn docx(body: &str) -> Vec<u8> {
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {}><w:body>{}<w:sectPr/></w:body></w:document>"#,
            NS, body
        );
        build_package(&[
            ("[Content_Types].xml", "<Types/>"),
            (DOCUMENT_PART, &document),
        ])
    }

    fn load(body: &str) -> DocxAdapter {
        DocxAdapter::load(&docx(body), &DocumentOptions::default()).unwrap()
    }

    #[test]
    fn test_paragraphs_then_cells() {
        let adapter = load(concat!(
            r#"<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tblGrid><w:gridCol/><w:gridCol/></w:tblGrid>"#,
            r#"<w:tr><w:tc><w:p><w:r><w:t>A</w:t></w:r></w:p><w:p><w:r><w:t>B</w:t></w:r></w:p></w:tc>"#,
            r#"<w:tc><w:p/></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><w:r><w:t>After</w:t></w:r></w:p>"#,
        ));

        let texts: Vec<String> = adapter.units().into_iter().map(|u| u.text).collect();
        assert_eq!(texts, vec!["Hello world", "After", "A\nB", ""]);
        assert_eq!(adapter.plan(), ProgressPlan::Linear { total: 4 });
    }

    #[test]
    fn test_grid_span_weights_fill_the_row() {
        let adapter = load(concat!(
            r#"<w:tbl><w:tblGrid><w:gridCol/><w:gridCol/><w:gridCol/></w:tblGrid>"#,
            r#"<w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p><w:r><w:t>Wide</w:t></w:r></w:p></w:tc>"#,
            r#"<w:tc><w:p><w:r><w:t>Narrow</w:t></w:r></w:p></w:tc></w:tr>"#,
            r#"<w:tr><w:tc><w:p><w:r><w:t>Only</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
        ));

        let weights: Vec<usize> = adapter.units().iter().map(|u| u.weight).collect();
        assert_eq!(weights, vec![2, 1, 3]);
        assert_eq!(adapter.plan().total_units(), 6);
    }

    #[test]
    fn test_write_back_uses_first_run() {
        let mut adapter = load(concat!(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Hel</w:t></w:r><w:r><w:t>lo</w:t></w:r></w:p>"#,
        ));
        let units = adapter.units();
        adapter
            .write_back(&units[0].location, "Bonjour".to_string())
            .unwrap();

        let bytes = adapter.serialize().unwrap();
        let document = read_part(&bytes, DOCUMENT_PART);
        assert!(document.contains("<w:rPr><w:b/></w:rPr><w:t>Bonjour</w:t>"));
        assert!(document.contains("<w:t></w:t>"));

        let reloaded = DocxAdapter::load(&bytes, &DocumentOptions::default()).unwrap();
        assert_eq!(reloaded.units()[0].text, "Bonjour");
    }

    #[test]
    fn test_textbox_paragraphs_are_not_units() {
        let adapter = load(concat!(
            r#"<w:p><w:r><w:t>Outer</w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p></w:txbxContent></w:r></w:p>"#,
        ));
        let units = adapter.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Outer");
    }

    #[test]
    fn test_missing_document_part() {
        let bytes = build_package(&[("[Content_Types].xml", "<Types/>")]);
        let err = DocxAdapter::load(&bytes, &DocumentOptions::default()).unwrap_err();
        assert!(matches!(err, DocumentError::Load { format: "docx", .. }));
    }

    #[test]
    fn test_unit_messages() {
        let adapter = load(concat!(
            r#"<w:p><w:r><w:t>P</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>C</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
        ));
        let units = adapter.units();
        assert_eq!(adapter.unit_message(&units[0], 1, 2), "Translating document content...");
        assert_eq!(adapter.unit_message(&units[1], 2, 2), "Translating tables...");
    }
}
