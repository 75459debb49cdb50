//! docweave - structure-preserving document translation
//!
//! Translates the text of DOCX, XLSX, PPTX, PDF, HTML and plain text files
//! while keeping their structure, reporting progress and token usage along
//! the way. A CLI and an HTTP service are built on the same job driver.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod processors;
pub mod server;

// Re-export key types for convenience
pub use crate::core::{
    cache::{translator_from_env, CachedTranslator},
    client::{HttpTranslator, Translator},
    config::{DocumentOptions, PdfOverlayMode, ServiceConfig, TranslatorConfig},
    errors::{DocumentError, TranslationError},
    models::{AggregateMetrics, JobStatus, ProgressState, UsageMetrics},
    orchestrator::{DocumentAdapter, DocumentJob, TranslationUnit},
    progress::{NoopSink, ProgressSink},
};

pub use crate::processors::{translate_document, DocumentKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
