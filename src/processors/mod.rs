//! Format adapters and the document entry point

pub mod docx;
pub mod html;
pub mod ooxml;
pub mod pdf;
pub mod pdf_fonts;
pub mod pptx;
pub mod text;
pub mod xlsx;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::client::Translator;
use crate::core::config::DocumentOptions;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::models::AggregateMetrics;
use crate::core::orchestrator::DocumentJob;
use crate::core::progress::ProgressSink;

pub use docx::DocxAdapter;
pub use html::HtmlAdapter;
pub use pdf::PdfAdapter;
pub use pptx::PptxAdapter;
pub use text::TextAdapter;
pub use xlsx::XlsxAdapter;

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Docx,
    Xlsx,
    Pptx,
    Pdf,
    Html,
    Text,
}

impl DocumentKind {
    /// Detect the format from a file name's extension (case-insensitive)
    pub fn from_filename(filename: &str) -> DocumentResult<Self> {
        let extension = Path::new(filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "docx" => Ok(DocumentKind::Docx),
            "xlsx" => Ok(DocumentKind::Xlsx),
            "pptx" => Ok(DocumentKind::Pptx),
            "pdf" => Ok(DocumentKind::Pdf),
            "html" | "htm" => Ok(DocumentKind::Html),
            "txt" => Ok(DocumentKind::Text),
            _ => Err(DocumentError::UnsupportedFormat { extension }),
        }
    }

    /// Canonical extension of the translated output
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Docx => "docx",
            DocumentKind::Xlsx => "xlsx",
            DocumentKind::Pptx => "pptx",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Html => "html",
            DocumentKind::Text => "txt",
        }
    }

    /// MIME type used when serving the output
    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            DocumentKind::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Html => "text/html; charset=utf-8",
            DocumentKind::Text => "text/plain; charset=utf-8",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// `<stem>_translated_<target>.<ext>`, lower-cased, restricted to characters
/// that are safe in a URL path and a `Content-Disposition` header
pub fn output_filename(filename: &str, kind: DocumentKind, target_lang: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let name = format!("{}_translated_{}.{}", stem, target_lang, kind.extension());
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Check size and format, then translate with the matching adapter
pub async fn translate_document(
    bytes: &[u8],
    filename: &str,
    source_lang: &str,
    target_lang: &str,
    translator: &dyn Translator,
    sink: &dyn ProgressSink,
    options: DocumentOptions,
) -> DocumentResult<(Vec<u8>, AggregateMetrics)> {
    if bytes.len() > options.max_file_size {
        return Err(DocumentError::SizeLimit {
            size: bytes.len(),
            limit: options.max_file_size,
        });
    }

    let kind = DocumentKind::from_filename(filename)?;
    info!("Translating {} ({}, {} bytes)", filename, kind, bytes.len());

    let job = DocumentJob::new(source_lang, target_lang, translator, sink).with_options(options);
    match kind {
        DocumentKind::Docx => job.run::<DocxAdapter>(bytes).await,
        DocumentKind::Xlsx => job.run::<XlsxAdapter>(bytes).await,
        DocumentKind::Pptx => job.run::<PptxAdapter>(bytes).await,
        DocumentKind::Pdf => job.run::<PdfAdapter>(bytes).await,
        DocumentKind::Html => job.run::<HtmlAdapter>(bytes).await,
        DocumentKind::Text => job.run::<TextAdapter>(bytes).await,
    }
}

fn is_supported(path: &Path) -> bool {
    path.file_name()
        .map(|name| DocumentKind::from_filename(&name.to_string_lossy()).is_ok())
        .unwrap_or(false)
}

/// Supported documents directly inside `dir`
pub fn find_documents(dir: &Path) -> DocumentResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DocumentError::FileError {
            path: dir.display().to_string(),
            message: "Not a directory".to_string(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| DocumentError::FileError {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Supported documents anywhere below `dir`
pub fn find_documents_recursive(dir: &Path) -> DocumentResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DocumentError::FileError {
            path: dir.display().to_string(),
            message: "Not a directory".to_string(),
        });
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    files.sort();
    Ok(files)
}
