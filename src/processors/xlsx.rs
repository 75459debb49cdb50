//! Excel workbook adapter
//!
//! Every worksheet is a progress section. Units are the non-empty string
//! cells of each sheet in document order; formulas, numbers and booleans are
//! left alone. Translated cells are rewritten as inline strings so a shared
//! string used by several cells is never changed behind another cell's back.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;
use crate::processors::ooxml::{
    get_attr, get_relationship_id, local_name, read_relationships, Package, XmlPart,
};

const FORMAT: &str = "xlsx";
const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// A string cell: sheet index plus the event range of its `<c>` element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub sheet: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
struct Sheet {
    name: String,
    part_name: String,
    part: XmlPart,
    cells: Vec<(CellLocation, String)>,
}

/// A loaded `.xlsx` package
#[derive(Debug)]
pub struct XlsxAdapter {
    package: Package,
    sheets: Vec<Sheet>,
}

/// Sheet names and part names in workbook order
fn workbook_sheets(package: &Package) -> DocumentResult<Vec<(String, String)>> {
    let workbook = XmlPart::parse(package.require(WORKBOOK_PART, FORMAT)?, FORMAT)?;
    let rels = read_relationships(package, WORKBOOK_RELS, "xl", FORMAT)?;

    let mut sheets = Vec::new();
    for event in workbook.events() {
        if let Event::Start(e) | Event::Empty(e) = event {
            if local_name(e.name().as_ref()) != b"sheet" {
                continue;
            }
            let name = get_attr(e, b"name").unwrap_or_default();
            let target = get_relationship_id(e)
                .and_then(|id| rels.get(&id).cloned())
                .ok_or_else(|| {
                    DocumentError::load(FORMAT, format!("sheet '{}' has no part", name))
                })?;
            sheets.push((name, target));
        }
    }
    Ok(sheets)
}

/// Plain text of every `<si>` item, phonetic runs excluded
fn shared_strings(package: &Package) -> DocumentResult<Vec<String>> {
    let Some(bytes) = package.part(SHARED_STRINGS_PART) else {
        return Ok(Vec::new());
    };
    let part = XmlPart::parse(bytes, FORMAT)?;

    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic = 0usize;

    for (index, event) in part.events().iter().enumerate() {
        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic += 1,
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) if local_name(e.name().as_ref()) == b"si" => {
                strings.push(String::new());
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"si" => strings.extend(current.take()),
                b"rPh" => phonetic = phonetic.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(_) | Event::CData(_) if in_text && phonetic == 0 => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&part.text_at(index));
                }
            }
            _ => {}
        }
    }
    Ok(strings)
}

#[derive(Debug, Default)]
struct CellScan {
    start: usize,
    kind: Option<String>,
    has_formula: bool,
    value: String,
    inline: String,
    in_value: bool,
    in_inline_text: bool,
    phonetic: usize,
}

impl CellScan {
    fn string_value(&self, shared: &[String]) -> Option<String> {
        if self.has_formula {
            return None;
        }
        let text = match self.kind.as_deref() {
            Some("s") => shared.get(self.value.trim().parse::<usize>().ok()?)?.clone(),
            Some("inlineStr") => self.inline.clone(),
            Some("str") => self.value.clone(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// String cells of one worksheet, in document order
fn scan_sheet(part: &XmlPart, sheet: usize, shared: &[String]) -> Vec<(CellLocation, String)> {
    let mut cells = Vec::new();
    let mut cell: Option<CellScan> = None;

    for (index, event) in part.events().iter().enumerate() {
        match event {
            Event::Start(e) => {
                let qname = e.name();
                let name = local_name(qname.as_ref());
                if name == b"c" {
                    cell = Some(CellScan {
                        start: index,
                        kind: get_attr(e, b"t"),
                        ..CellScan::default()
                    });
                    continue;
                }
                match (name, cell.as_mut()) {
                    (b"f", Some(c)) => c.has_formula = true,
                    (b"v", Some(c)) => c.in_value = true,
                    (b"rPh", Some(c)) => c.phonetic += 1,
                    (b"t", Some(c)) => c.in_inline_text = true,
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let (b"f", Some(c)) = (local_name(e.name().as_ref()), cell.as_mut()) {
                    c.has_formula = true;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"c" => {
                if let Some(done) = cell.take() {
                    if let Some(text) = done.string_value(shared) {
                        let location = CellLocation {
                            sheet,
                            start: done.start,
                            end: index,
                        };
                        cells.push((location, text));
                    }
                }
            }
            Event::End(e) => match (local_name(e.name().as_ref()), cell.as_mut()) {
                (b"v", Some(c)) => c.in_value = false,
                (b"rPh", Some(c)) => c.phonetic = c.phonetic.saturating_sub(1),
                (b"t", Some(c)) => c.in_inline_text = false,
                _ => {}
            },
            Event::Text(_) | Event::CData(_) => {
                if let Some(c) = cell.as_mut() {
                    if c.in_value {
                        c.value.push_str(&part.text_at(index));
                    } else if c.in_inline_text && c.phonetic == 0 {
                        c.inline.push_str(&part.text_at(index));
                    }
                }
            }
            _ => {}
        }
    }

    cells
}

/// `<c>` rewritten as an inline string cell holding `text`
fn inline_string_cell(original: &BytesStart, text: &str) -> Vec<Event<'static>> {
    let name = String::from_utf8_lossy(original.name().as_ref()).into_owned();
    let prefix = match name.rfind(':') {
        Some(pos) => name[..=pos].to_string(),
        None => String::new(),
    };
    let is_name = format!("{}is", prefix);
    let t_name = format!("{}t", prefix);

    let mut start = BytesStart::new(name.clone());
    for attr in original.attributes().flatten() {
        if attr.key.as_ref() != b"t" {
            start.push_attribute(attr);
        }
    }
    start.push_attribute(("t", "inlineStr"));

    let mut text_start = BytesStart::new(t_name.clone());
    text_start.push_attribute(("xml:space", "preserve"));

    vec![
        Event::Start(start),
        Event::Start(BytesStart::new(is_name.clone())),
        Event::Start(text_start),
        Event::Text(BytesText::new(text).into_owned()),
        Event::End(BytesEnd::new(t_name)),
        Event::End(BytesEnd::new(is_name)),
        Event::End(BytesEnd::new(name)),
    ]
}

impl DocumentAdapter for XlsxAdapter {
    type Location = CellLocation;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], _options: &DocumentOptions) -> DocumentResult<Self> {
        let package = Package::read(bytes, FORMAT)?;
        let shared = shared_strings(&package)?;

        let mut sheets = Vec::new();
        for (index, (name, part_name)) in workbook_sheets(&package)?.into_iter().enumerate() {
            let part = XmlPart::parse(package.require(&part_name, FORMAT)?, FORMAT)?;
            let cells = scan_sheet(&part, index, &shared);
            sheets.push(Sheet {
                name,
                part_name,
                part,
                cells,
            });
        }

        Ok(Self { package, sheets })
    }

    fn plan(&self) -> ProgressPlan {
        ProgressPlan::Sectioned {
            sizes: self.sheets.iter().map(|s| s.cells.len()).collect(),
        }
    }

    fn units(&self) -> Vec<TranslationUnit<CellLocation>> {
        self.sheets
            .iter()
            .enumerate()
            .flat_map(|(index, sheet)| {
                sheet.cells.iter().map(move |(location, text)| {
                    TranslationUnit::new(text.clone(), *location).in_section(index)
                })
            })
            .collect()
    }

    fn write_back(&mut self, location: &CellLocation, text: String) -> DocumentResult<()> {
        let sheet = self.sheets.get_mut(location.sheet).ok_or_else(|| {
            DocumentError::serialize(FORMAT, format!("unknown sheet {}", location.sheet))
        })?;
        let replacement = match sheet.part.events().get(location.start) {
            Some(Event::Start(e)) => inline_string_cell(e, &text),
            _ => {
                return Err(DocumentError::serialize(
                    FORMAT,
                    format!("no cell at {:?}", location),
                ))
            }
        };
        sheet
            .part
            .replace_element(location.start, location.end, replacement);
        Ok(())
    }

    fn serialize(mut self) -> DocumentResult<Vec<u8>> {
        for sheet in &self.sheets {
            let bytes = sheet.part.to_bytes(FORMAT)?;
            self.package.set_part(&sheet.part_name, bytes);
        }
        self.package.write(FORMAT)
    }

    fn unit_message(&self, unit: &TranslationUnit<CellLocation>, _: usize, _: usize) -> String {
        self.section_message(unit.section)
    }

    fn section_message(&self, section: usize) -> String {
        let name = self
            .sheets
            .get(section)
            .map(|s| s.name.as_str())
            .unwrap_or_default();
        format!("Translating sheet {}...", name)
    }
}
