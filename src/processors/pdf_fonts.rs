//! Character decoding for PDF text strings
//!
//! A string shown with `Tj`/`TJ` is a sequence of character codes whose
//! meaning depends on the current font. Composite (Type0) fonts use two-byte
//! codes, simple fonts one byte. When the font carries a `/ToUnicode` CMap
//! that mapping wins; otherwise two-byte codes are read as Unicode scalars
//! (the Identity-H convention) and single bytes through WinAnsiEncoding.

use lopdf::{Dictionary, Document, Object};
use std::collections::HashMap;
use tracing::{debug, trace};

/// WinAnsiEncoding for bytes 0x80..=0x9F; everything else matches Latin-1
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

/// Ranges wider than this in a CMap are ignored
const MAX_RANGE: u32 = 0xFFFF;

/// Character for a WinAnsiEncoding byte
pub fn win_ansi_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => WIN_ANSI_HIGH[usize::from(byte - 0x80)].unwrap_or('\u{FFFD}'),
        _ => char::from(byte),
    }
}

/// WinAnsiEncoding byte for a character, if the encoding has one
pub fn win_ansi_byte(c: char) -> Option<u8> {
    let code = u32::from(c);
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return u8::try_from(code).ok();
    }
    WIN_ANSI_HIGH
        .iter()
        .position(|entry| *entry == Some(c))
        .and_then(|i| u8::try_from(0x80 + i).ok())
}

/// Decodes strings shown with one font
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDecoder {
    code_width: usize,
    to_unicode: HashMap<u32, String>,
}

impl Default for FontDecoder {
    fn default() -> Self {
        Self::simple()
    }
}

impl FontDecoder {
    /// Single-byte font without a ToUnicode map
    pub fn simple() -> Self {
        Self {
            code_width: 1,
            to_unicode: HashMap::new(),
        }
    }

    pub fn new(code_width: usize, to_unicode: HashMap<u32, String>) -> Self {
        Self {
            code_width: code_width.clamp(1, 2),
            to_unicode,
        }
    }

    /// Decoder for a font dictionary
    pub fn from_font(document: &Document, font: &Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|subtype| subtype == b"Type0")
            .unwrap_or(false);

        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|object| match object {
                Object::Reference(id) => document.get_object(*id).ok(),
                other => Some(other),
            })
            .and_then(|object| object.as_stream().ok())
            .map(|stream| {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                parse_to_unicode(&data)
            })
            .unwrap_or_default();

        Self::new(if composite { 2 } else { 1 }, to_unicode)
    }

    /// Text of each character code in `bytes`, in order
    pub fn decode(&self, bytes: &[u8]) -> Vec<String> {
        bytes
            .chunks(self.code_width)
            .map(|chunk| {
                let code = code_of(chunk);
                if let Some(text) = self.to_unicode.get(&code) {
                    return text.clone();
                }
                match chunk {
                    [byte] => win_ansi_char(*byte).to_string(),
                    _ => char::from_u32(code)
                        .unwrap_or('\u{FFFD}')
                        .to_string(),
                }
            })
            .collect()
    }
}

/// Decoders for the fonts in a page's resource dictionary, keyed by name
pub fn fonts_from_resources(document: &Document, resources: &Dictionary) -> HashMap<Vec<u8>, FontDecoder> {
    let fonts = resources.get(b"Font").ok().and_then(|object| match object {
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        other => other.as_dict().ok(),
    });
    let Some(fonts) = fonts else {
        return HashMap::new();
    };

    let mut decoders = HashMap::new();
    for (name, object) in fonts.iter() {
        let font = match object {
            Object::Reference(id) => document.get_dictionary(*id).ok(),
            other => other.as_dict().ok(),
        };
        if let Some(font) = font {
            let decoder = FontDecoder::from_font(document, font);
            debug!(
                "Font /{}: {}-byte codes, {} ToUnicode entries",
                String::from_utf8_lossy(name),
                decoder.code_width,
                decoder.to_unicode.len()
            );
            decoders.insert(name.clone(), decoder);
        }
    }
    decoders
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Array(Vec<Vec<u8>>),
}

/// Bytes of a hex string body, an odd trailing digit padded with 0
fn hex_bytes(digits: &str) -> Vec<u8> {
    let digits: Vec<u8> = digits
        .chars()
        .filter_map(|c| c.to_digit(16))
        .filter_map(|d| u8::try_from(d).ok())
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

/// Hex strings and arrays of hex strings, in order; everything else skipped
fn tokenize(section: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut array: Option<Vec<Vec<u8>>> = None;
    let mut rest = section;

    while let Some(pos) = rest.find(&['<', '[', ']'][..]) {
        let (marker, after) = (rest.as_bytes()[pos], &rest[pos + 1..]);
        match marker {
            b'<' => {
                let Some(end) = after.find('>') else {
                    break;
                };
                let bytes = hex_bytes(&after[..end]);
                match array.as_mut() {
                    Some(items) => items.push(bytes),
                    None => tokens.push(Token::Hex(bytes)),
                }
                rest = &after[end + 1..];
            }
            b'[' => {
                array = Some(Vec::new());
                rest = after;
            }
            _ => {
                if let Some(items) = array.take() {
                    tokens.push(Token::Array(items));
                }
                rest = after;
            }
        }
    }
    tokens
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// UTF-16BE destination string of a CMap entry
fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// `dst` with its last UTF-16 unit moved `offset` code points on
fn offset_text(dst: &[u8], offset: u32) -> String {
    let mut bytes = dst.to_vec();
    let len = bytes.len();
    if len >= 2 {
        let last = u32::from(u16::from_be_bytes([bytes[len - 2], bytes[len - 1]])) + offset;
        let [_, _, hi, lo] = (last & 0xFFFF).to_be_bytes();
        bytes[len - 2] = hi;
        bytes[len - 1] = lo;
    } else if len == 1 {
        bytes[0] = bytes[0].wrapping_add(u8::try_from(offset & 0xFF).unwrap_or(0));
    }
    utf16_text(&bytes)
}

/// Bodies between `begin` and `end` markers
fn sections<'a>(content: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(begin) {
        let body = &rest[start + begin.len()..];
        let Some(stop) = body.find(end) else {
            break;
        };
        found.push(&body[..stop]);
        rest = &body[stop + end.len()..];
    }
    found
}

/// Code to text mapping of a ToUnicode CMap (`bfchar` and `bfrange` entries)
pub fn parse_to_unicode(data: &[u8]) -> HashMap<u32, String> {
    let content = String::from_utf8_lossy(data);
    let mut map = HashMap::new();

    for section in sections(&content, "beginbfchar", "endbfchar") {
        let tokens = tokenize(section);
        for pair in tokens.chunks(2) {
            if let [Token::Hex(src), Token::Hex(dst)] = pair {
                map.insert(code_of(src), utf16_text(dst));
            }
        }
    }

    for section in sections(&content, "beginbfrange", "endbfrange") {
        let tokens = tokenize(section);
        for triple in tokens.chunks(3) {
            let [Token::Hex(lo), Token::Hex(hi), dst] = triple else {
                continue;
            };
            let (lo, hi) = (code_of(lo), code_of(hi));
            if hi < lo || hi - lo > MAX_RANGE {
                trace!("Skipping CMap range {:X}..{:X}", lo, hi);
                continue;
            }
            match dst {
                Token::Hex(start) => {
                    for code in lo..=hi {
                        map.insert(code, offset_text(start, code - lo));
                    }
                }
                Token::Array(items) => {
                    for (code, item) in (lo..=hi).zip(items) {
                        map.insert(code, utf16_text(item));
                    }
                }
            }
        }
    }

    map
}
