//! Shared plumbing for Office Open XML packages (docx, xlsx, pptx)
//!
//! A package is a ZIP archive of XML parts. Parts that need editing are
//! loaded into an [`XmlPart`]: a flat, owned list of quick-xml events.
//! Event indices act as stable addresses for write-back; edits are kept on
//! the side and applied when the part is written.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::errors::{DocumentError, DocumentResult};

/// In-memory copy of a ZIP package, entry order preserved
#[derive(Debug, Clone)]
pub struct Package {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

impl Package {
    pub fn read(bytes: &[u8], format: &'static str) -> DocumentResult<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocumentError::load(format, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| DocumentError::load(format, e))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| DocumentError::load(format, e))?;
            entries.push(Entry {
                name: file.name().to_string(),
                is_dir: file.is_dir(),
                data,
            });
        }

        Ok(Self { entries })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// Fetch a part that must exist
    pub fn require(&self, name: &str, format: &'static str) -> DocumentResult<&[u8]> {
        self.part(name)
            .ok_or_else(|| DocumentError::load(format, format!("missing part {}", name)))
    }

    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(Entry {
                name: name.to_string(),
                data,
                is_dir: false,
            }),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn write(&self, format: &'static str) -> DocumentResult<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in &self.entries {
            if entry.is_dir {
                writer
                    .add_directory(entry.name.as_str(), options)
                    .map_err(|e| DocumentError::serialize(format, e))?;
                continue;
            }
            writer
                .start_file(entry.name.as_str(), options)
                .map_err(|e| DocumentError::serialize(format, e))?;
            writer
                .write_all(&entry.data)
                .map_err(|e| DocumentError::serialize(format, e))?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| DocumentError::serialize(format, e))?;
        Ok(cursor.into_inner())
    }
}

/// An XML part as a flat event list plus pending edits
#[derive(Debug, Clone)]
pub struct XmlPart {
    events: Vec<Event<'static>>,
    text_edits: HashMap<usize, String>,
    element_edits: HashMap<usize, (usize, Vec<Event<'static>>)>,
}

impl XmlPart {
    pub fn parse(bytes: &[u8], format: &'static str) -> DocumentResult<Self> {
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(false);

        let mut events = Vec::new();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(event) => events.push(event.into_owned()),
                Err(e) => {
                    return Err(DocumentError::load(
                        format,
                        format!("XML error at position {}: {}", reader.buffer_position(), e),
                    ))
                }
            }
            buf.clear();
        }

        Ok(Self {
            events,
            text_edits: HashMap::new(),
            element_edits: HashMap::new(),
        })
    }

    pub fn events(&self) -> &[Event<'static>] {
        &self.events
    }

    /// Unescaped content of a text event, empty for anything else
    pub fn text_at(&self, index: usize) -> String {
        match self.events.get(index) {
            Some(Event::Text(t)) => t
                .unescape()
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned()),
            Some(Event::CData(c)) => String::from_utf8_lossy(c).into_owned(),
            _ => String::new(),
        }
    }

    /// Replace the content of the text event at `index`
    pub fn set_text(&mut self, index: usize, text: String) {
        self.text_edits.insert(index, text);
    }

    /// Replace events `start..=end` with `replacement`
    pub fn replace_element(&mut self, start: usize, end: usize, replacement: Vec<Event<'static>>) {
        self.element_edits.insert(start, (end, replacement));
    }

    pub fn to_bytes(&self, format: &'static str) -> DocumentResult<Vec<u8>> {
        let mut writer = Writer::new(Vec::with_capacity(self.events.len() * 16));
        let mut index = 0;

        while index < self.events.len() {
            let result = if let Some((end, replacement)) = self.element_edits.get(&index) {
                let written = replacement
                    .iter()
                    .try_for_each(|event| writer.write_event(event));
                index = end + 1;
                written
            } else if let Some(text) = self.text_edits.get(&index) {
                index += 1;
                writer.write_event(Event::Text(BytesText::new(text)))
            } else {
                index += 1;
                writer.write_event(&self.events[index - 1])
            };
            result.map_err(|e| DocumentError::serialize(format, e))?;
        }

        Ok(writer.into_inner())
    }
}

/// Text gathered from runs spread over one or more paragraphs
///
/// Each segment is the index of a text event and the paragraph it sits in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBlock {
    segments: Vec<(usize, usize)>,
    paragraphs: usize,
}

impl TextBlock {
    /// Start a new paragraph within the block
    pub fn open_paragraph(&mut self) {
        self.paragraphs += 1;
    }

    /// Attach a text event to the current paragraph
    pub fn push_segment(&mut self, event: usize) {
        let paragraph = self.paragraphs.saturating_sub(1);
        self.segments.push((event, paragraph));
    }

    /// Paragraph texts joined with `\n`
    pub fn text(&self, part: &XmlPart) -> String {
        let mut paragraphs = vec![String::new(); self.paragraphs.max(1)];
        for &(event, paragraph) in &self.segments {
            paragraphs[paragraph].push_str(&part.text_at(event));
        }
        paragraphs.join("\n")
    }

    /// Write `text` back into the block's runs
    ///
    /// When `text` has one line per paragraph, each line goes to the first run
    /// of its paragraph. Otherwise the whole text goes to the very first run.
    /// All other runs are emptied. Returns `false` when the block has no run
    /// to write into.
    pub fn write(&self, part: &mut XmlPart, text: String) -> bool {
        if self.segments.is_empty() {
            return false;
        }

        let mut values = vec![String::new(); self.segments.len()];
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() == self.paragraphs.max(1) {
            let mut holder = 0;
            for (paragraph, line) in lines.into_iter().enumerate() {
                match self.segments.iter().position(|&(_, p)| p == paragraph) {
                    Some(segment) => {
                        holder = segment;
                        values[segment] = line.to_string();
                    }
                    // paragraph without runs: keep its text with the previous one
                    None if !line.is_empty() => {
                        if !values[holder].is_empty() {
                            values[holder].push('\n');
                        }
                        values[holder].push_str(line);
                    }
                    None => {}
                }
            }
        } else {
            values[0] = text;
        }

        for (&(event, _), value) in self.segments.iter().zip(values) {
            part.set_text(event, value);
        }
        true
    }
}

/// Local part of a possibly prefixed XML name
pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Extract an attribute value by exact key
pub fn get_attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Extract a relationship id attribute (`r:id`, whatever the prefix)
pub fn get_relationship_id(e: &BytesStart) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| {
            let key = a.key.as_ref();
            key.contains(&b':') && local_name(key) == b"id"
        })
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Map of relationship id to resolved part name
pub fn read_relationships(
    package: &Package,
    rels_name: &str,
    base_dir: &str,
    format: &'static str,
) -> DocumentResult<HashMap<String, String>> {
    let Some(bytes) = package.part(rels_name) else {
        return Ok(HashMap::new());
    };
    let part = XmlPart::parse(bytes, format)?;

    let mut rels = HashMap::new();
    for event in part.events() {
        if let Event::Start(e) | Event::Empty(e) = event {
            if local_name(e.name().as_ref()) != b"Relationship" {
                continue;
            }
            if let (Some(id), Some(target)) = (get_attr(e, b"Id"), get_attr(e, b"Target")) {
                rels.insert(id, resolve_target(base_dir, &target));
            }
        }
    }

    Ok(rels)
}

/// Resolve a relationship target against the directory of its source part
pub fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for piece in target.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for in-memory packages used by the adapter tests

    use std::io::{Cursor, Read, Write};
    use zip::write::FileOptions;
    use zip::{ZipArchive, ZipWriter};

    pub fn build_package(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in parts {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        content
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("ppt/slides", "../media/a.png"), "ppt/media/a.png");
        assert_eq!(resolve_target("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"w:p"), b"p");
        assert_eq!(local_name(b"p"), b"p");
    }

    #[test]
    fn test_xml_part_edits_roundtrip() {
        let xml = br#"<root><a>one</a><b x="1">two &amp; three</b><c/></root>"#;
        let mut part = XmlPart::parse(xml, "test").unwrap();

        let text_index = part
            .events()
            .iter()
            .position(|e| matches!(e, Event::Text(t) if t.as_ref() == b"one"))
            .unwrap();
        assert_eq!(part.text_at(text_index + 3), "two & three");

        part.set_text(text_index, "uno <1>".to_string());
        let out = String::from_utf8(part.to_bytes("test").unwrap()).unwrap();
        assert_eq!(out, r#"<root><a>uno &lt;1&gt;</a><b x="1">two &amp; three</b><c/></root>"#);
    }

    #[test]
    fn test_replace_element() {
        let xml = b"<r><x>1</x><y/></r>";
        let mut part = XmlPart::parse(xml, "test").unwrap();
        // <r>, <x>, 1, </x>, <y/>, </r>
        part.replace_element(1, 3, vec![Event::Empty(BytesStart::new("z"))]);
        let out = String::from_utf8(part.to_bytes("test").unwrap()).unwrap();
        assert_eq!(out, "<r><z/><y/></r>");
    }

    #[test]
    fn test_malformed_xml_is_a_load_error() {
        let err = XmlPart::parse(b"<a><b></a>", "docx").unwrap_err();
        assert!(matches!(err, DocumentError::Load { format: "docx", .. }));
    }

    #[test]
    fn test_package_roundtrip_keeps_order() {
        let bytes = build_package(&[("b.xml", "<b/>"), ("a.xml", "<a/>")]);
        let mut package = Package::read(&bytes, "test").unwrap();
        package.set_part("a.xml", b"<a>changed</a>".to_vec());

        let out = package.write("test").unwrap();
        let names: Vec<String> = Package::read(&out, "test")
            .unwrap()
            .names()
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec!["b.xml", "a.xml"]);
        assert_eq!(read_part(&out, "a.xml"), "<a>changed</a>");
    }

    #[test]
    fn test_not_a_zip_is_a_load_error() {
        assert!(matches!(
            Package::read(b"plain text", "xlsx"),
            Err(DocumentError::Load { format: "xlsx", .. })
        ));
    }

    #[test]
    fn test_text_block_join_and_write() {
        let xml = b"<p><t>Hel</t><t>lo</t></p><p><t>World</t></p>";
        let mut part = XmlPart::parse(xml, "test").unwrap();
        let mut block = TextBlock::default();
        let texts: Vec<usize> = part
            .events()
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Text(_)))
            .map(|(i, _)| i)
            .collect();
        block.open_paragraph();
        block.push_segment(texts[0]);
        block.push_segment(texts[1]);
        block.open_paragraph();
        block.push_segment(texts[2]);

        assert_eq!(block.text(&part), "Hello\nWorld");
        assert!(block.write(&mut part, "Hallo Welt".to_string()));
        let out = String::from_utf8(part.to_bytes("test").unwrap()).unwrap();
        assert_eq!(out, "<p><t>Hallo Welt</t><t></t></p><p><t></t></p>");

        assert!(block.write(&mut part, "Hallo\nWelt".to_string()));
        let out = String::from_utf8(part.to_bytes("test").unwrap()).unwrap();
        assert_eq!(out, "<p><t>Hallo</t><t></t></p><p><t>Welt</t></p>");
        assert_eq!(block.text(&part), "Hallo\nWelt");
    }
}
