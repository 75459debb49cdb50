//! Plain text adapter
//!
//! Paragraphs are separated by blank lines; text without any blank line is
//! taken line by line instead. Output always joins paragraphs with a blank
//! line, so single-newline input comes back double spaced.

use tracing::debug;

use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::orchestrator::{DocumentAdapter, TranslationUnit};
use crate::core::progress::ProgressPlan;

const FORMAT: &str = "txt";
const PARAGRAPH_BREAK: &str = "\n\n";

/// A decoded text file split into paragraphs
#[derive(Debug, Clone)]
pub struct TextAdapter {
    paragraphs: Vec<String>,
}

/// UTF-8, or ISO-8859-1 when the bytes are not valid UTF-8
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Input is not UTF-8, decoding as ISO-8859-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// Trimmed, non-empty paragraphs of `text`
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let separator = if text.contains(PARAGRAPH_BREAK) {
        PARAGRAPH_BREAK
    } else {
        "\n"
    };
    text.split(separator)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl DocumentAdapter for TextAdapter {
    type Location = usize;
    const FORMAT: &'static str = FORMAT;

    fn load(bytes: &[u8], _options: &DocumentOptions) -> DocumentResult<Self> {
        Ok(Self {
            paragraphs: split_paragraphs(&decode_text(bytes)),
        })
    }

    fn plan(&self) -> ProgressPlan {
        ProgressPlan::Linear {
            total: self.paragraphs.len(),
        }
    }

    fn units(&self) -> Vec<TranslationUnit<usize>> {
        self.paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| TranslationUnit::new(p.clone(), i))
            .collect()
    }

    fn write_back(&mut self, location: &usize, text: String) -> DocumentResult<()> {
        let slot = self.paragraphs.get_mut(*location).ok_or_else(|| {
            DocumentError::serialize(FORMAT, format!("unknown paragraph {}", location))
        })?;
        *slot = text;
        Ok(())
    }

    fn serialize(self) -> DocumentResult<Vec<u8>> {
        Ok(self.paragraphs.join(PARAGRAPH_BREAK).into_bytes())
    }

    fn unit_message(&self, _: &TranslationUnit<usize>, visited: usize, total: usize) -> String {
        format!("Translating paragraph {} of {}...", visited, total)
    }

    fn passthrough_when_empty(&self) -> bool {
        true
    }
}
