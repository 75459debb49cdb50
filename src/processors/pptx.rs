//! PowerPoint presentation adapter
//!
//! Every slide is a progress section and every top-level shape on it is a
//! unit, text or not. A shape's text is its paragraphs joined with `\n`.

use quick_xml::events::Event;
use tracing::debug;

use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;
use crate::processors::ooxml::{
    get_relationship_id, local_name, read_relationships, Package, TextBlock, XmlPart,
};

const FORMAT: &str = "pptx";
const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeLocation {
    pub slide: usize,
    pub shape: usize,
}

#[derive(Debug)]
struct Slide {
    part_name: String,
    part: XmlPart,
    shapes: Vec<TextBlock>,
}

/// A loaded `.pptx` package
#[derive(Debug)]
pub struct PptxAdapter {
    package: Package,
    slides: Vec<Slide>,
}

/// Slide part names in presentation order
fn slide_parts(package: &Package) -> DocumentResult<Vec<String>> {
    let presentation = XmlPart::parse(package.require(PRESENTATION_PART, FORMAT)?, FORMAT)?;
    let rels = read_relationships(package, PRESENTATION_RELS, "ppt", FORMAT)?;

    let mut in_list = false;
    let mut slides = Vec::new();
    for event in presentation.events() {
        match event {
            Event::Start(e) if local_name(e.name().as_ref()) == b"sldIdLst" => in_list = true,
            Event::End(e) if local_name(e.name().as_ref()) == b"sldIdLst" => in_list = false,
            Event::Start(e) | Event::Empty(e)
                if in_list && local_name(e.name().as_ref()) == b"sldId" =>
            {
                let target = get_relationship_id(e)
                    .and_then(|id| rels.get(&id).cloned())
                    .ok_or_else(|| {
                        DocumentError::load(FORMAT, format!("slide {} has no part", slides.len() + 1))
                    })?;
                slides.push(target);
            }
            _ => {}
        }
    }
    Ok(slides)
}

/// Top-level shapes of a slide with their text runs
fn scan_slide(part: &XmlPart) -> Vec<TextBlock> {
    let mut shapes: Vec<TextBlock> = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    // depth of the open top-level shape, if any
    let mut shape_depth: Option<usize> = None;
    let mut in_text_run = false;

    for (index, event) in part.events().iter().enumerate() {
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(e.name().as_ref()).to_vec();
                let empty = matches!(event, Event::Empty(_));

                let top_level = name == b"sp"
                    && stack.len() >= 2
                    && stack[stack.len() - 1] == b"spTree"
                    && stack[stack.len() - 2] == b"cSld";
                if top_level {
                    shapes.push(TextBlock::default());
                    if !empty {
                        shape_depth = Some(stack.len());
                    }
                } else if shape_depth.is_some() && stack.iter().any(|n| n == b"txBody") {
                    if name == b"p" {
                        if let Some(shape) = shapes.last_mut() {
                            shape.open_paragraph();
                        }
                    } else if name == b"t" && !empty {
                        in_text_run = true;
                    }
                }

                if !empty {
                    stack.push(name);
                }
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    if name == b"t" {
                        in_text_run = false;
                    }
                }
                if shape_depth == Some(stack.len()) {
                    shape_depth = None;
                }
            }
            Event::Text(_) | Event::CData(_) if in_text_run => {
                if let Some(shape) = shapes.last_mut() {
                    shape.push_segment(index);
                }
            }
            _ => {}
        }
    }

    shapes
}

impl DocumentAdapter for PptxAdapter {
    type Location = ShapeLocation;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], _options: &DocumentOptions) -> DocumentResult<Self> {
        let package = Package::read(bytes, FORMAT)?;

        let mut slides = Vec::new();
        for part_name in slide_parts(&package)? {
            let part = XmlPart::parse(package.require(&part_name, FORMAT)?, FORMAT)?;
            let shapes = scan_slide(&part);
            slides.push(Slide {
                part_name,
                part,
                shapes,
            });
        }

        Ok(Self { package, slides })
    }

    fn plan(&self) -> ProgressPlan {
        ProgressPlan::Sectioned {
            sizes: self.slides.iter().map(|s| s.shapes.len()).collect(),
        }
    }

    fn units(&self) -> Vec<TranslationUnit<ShapeLocation>> {
        let mut units = Vec::new();
        for (s, slide) in self.slides.iter().enumerate() {
            for (i, shape) in slide.shapes.iter().enumerate() {
                units.push(
                    TranslationUnit::new(shape.text(&slide.part), ShapeLocation { slide: s, shape: i })
                        .in_section(s),
                );
            }
        }
        units
    }

    fn write_back(&mut self, location: &ShapeLocation, text: String) -> DocumentResult<()> {
        let slide = self.slides.get_mut(location.slide).ok_or_else(|| {
            DocumentError::serialize(FORMAT, format!("unknown slide {}", location.slide))
        })?;
        let shape = slide.shapes.get(location.shape).ok_or_else(|| {
            DocumentError::serialize(FORMAT, format!("unknown shape {:?}", location))
        })?;
        if !shape.write(&mut slide.part, text) {
            debug!("Shape {:?} has no text run, translation dropped", location);
        }
        Ok(())
    }

    fn serialize(mut self) -> DocumentResult<Vec<u8>> {
        for slide in &self.slides {
            let bytes = slide.part.to_bytes(FORMAT)?;
            self.package.set_part(&slide.part_name, bytes);
        }
        self.package.write(FORMAT)
    }

    fn unit_message(&self, unit: &TranslationUnit<ShapeLocation>, _: usize, _: usize) -> String {
        self.section_message(unit.section)
    }

    fn section_message(&self, section: usize) -> String {
        format!("Translating slide {}...", section + 1)
    }
}
