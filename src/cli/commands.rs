//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::core::cache::translator_from_env;
use crate::core::client::Translator;
use crate::core::config::ServiceConfig;
use crate::core::languages::{is_supported, supported_languages};
use crate::core::models::AggregateMetrics;
use crate::core::progress::ProgressSink;
use crate::processors::{
    find_documents, find_documents_recursive, output_filename, translate_document, DocumentKind,
};

/// Commands for the document translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate documents (.docx .xlsx .pptx .pdf .html .htm .txt)
    Translate {
        /// Input file or directory (required)
        #[arg(short, long)]
        file: PathBuf,

        /// Output file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source language code
        #[arg(short, long)]
        source_lang: String,

        /// Target language code
        #[arg(short, long)]
        target_lang: String,

        /// Recursively translate subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Translate a single piece of text
    Text {
        /// Text to translate
        text: String,

        /// Source language code
        #[arg(short, long)]
        source_lang: String,

        /// Target language code
        #[arg(short, long)]
        target_lang: String,
    },

    /// List supported languages
    Languages,

    /// Start HTTP API server
    Server {
        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8000)
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}

/// Drives an indicatif bar from job progress
struct BarSink {
    bar: ProgressBar,
}

impl ProgressSink for BarSink {
    fn report(&self, percent: u8, message: &str) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(message.to_string());
    }
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% ({eta}) {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn check_language(code: &str) {
    if !is_supported(code) {
        warn!("Language code '{}' is not in the supported table", code);
    }
}

/// Where the translation of `input` goes
fn output_path(
    input: &Path,
    root: &Path,
    output_dir: &Path,
    kind: DocumentKind,
    target_lang: &str,
) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative_dir = input
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .unwrap_or_else(|| Path::new(""));
    output_dir
        .join(relative_dir)
        .join(output_filename(&name, kind, target_lang))
}

fn print_metrics(metrics: &AggregateMetrics) {
    println!(
        "   Tokens: {} ({} in / {} out), {:.2}s, {:.2} tok/s",
        metrics.total_tokens,
        metrics.input_tokens,
        metrics.output_tokens,
        metrics.processing_time,
        metrics.tokens_per_second
    );
}

/// Handle document translation command
pub async fn handle_translate(
    file: PathBuf,
    output: Option<PathBuf>,
    source_lang: String,
    target_lang: String,
    recursive: bool,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    check_language(&source_lang);
    check_language(&target_lang);

    // Directory input: output is a directory mirroring the input tree
    let (files, root, output_dir) = if file.is_dir() {
        let files = if recursive {
            find_documents_recursive(&file)?
        } else {
            find_documents(&file)?
        };
        let output_dir = output.clone().unwrap_or_else(|| file.join("translated"));
        (files, file.clone(), Some(output_dir))
    } else {
        let root = file.parent().map(Path::to_path_buf).unwrap_or_default();
        (vec![file.clone()], root, None)
    };

    if files.is_empty() {
        anyhow::bail!("No supported documents found in {}", file.display());
    }

    info!("Starting document translation");
    info!("Input: {}", file.display());
    info!("Languages: {} -> {}", source_lang, target_lang);
    info!("Documents: {}", files.len());

    let translator = translator_from_env()?;
    let options = ServiceConfig::from_env()?.document_options();

    let mut processed = 0;
    let mut failed = 0;

    for file_path in files {
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = match DocumentKind::from_filename(&filename) {
            Ok(kind) => kind,
            Err(e) => {
                failed += 1;
                eprintln!("Error processing {}: {}", file_path.display(), e);
                continue;
            }
        };
        let target = match (&output_dir, &output) {
            (Some(dir), _) => output_path(&file_path, &root, dir, kind, &target_lang),
            (None, Some(path)) => path.clone(),
            (None, None) => output_path(&file_path, &root, &root, kind, &target_lang),
        };

        let bytes = std::fs::read(&file_path)?;
        let sink = BarSink { bar: progress_bar()? };
        sink.bar.set_message(format!("Processing: {}", file_path.display()));

        let result = translate_document(
            &bytes,
            &filename,
            &source_lang,
            &target_lang,
            translator.as_ref(),
            &sink,
            options,
        )
        .await;

        match result {
            Ok((translated, metrics)) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, translated)?;
                sink.bar.finish_with_message("Completed");
                println!("✅ {} -> {}", file_path.display(), target.display());
                print_metrics(&metrics);
                processed += 1;
            }
            Err(e) => {
                failed += 1;
                sink.bar.abandon_with_message(format!("Failed: {}", e));
                eprintln!("Error processing {}: {}", file_path.display(), e);
            }
        }
    }

    let duration = start_time.elapsed();
    info!(
        "Completed: {} processed, {} failed in {:?}",
        processed, failed, duration
    );

    println!("\n✅ Translation completed!");
    println!("   Processed: {}", processed);
    println!("   Failed: {}", failed);
    println!("   Time: {:?}", duration);

    if processed == 0 {
        anyhow::bail!("No document could be translated");
    }

    Ok(())
}

/// Handle single text translation command
pub async fn handle_text(
    text: String,
    source_lang: String,
    target_lang: String,
) -> anyhow::Result<()> {
    check_language(&source_lang);
    check_language(&target_lang);

    let translator = translator_from_env()?;
    let (translation, usage) = translator
        .translate(&text, &source_lang, &target_lang)
        .await?;

    println!("{}", translation);
    info!(
        "{} tokens in {:.2}s{}",
        usage.total_tokens(),
        usage.processing_time,
        if usage.cached { " (cached)" } else { "" }
    );

    Ok(())
}

/// Handle languages command
pub fn handle_languages() {
    for language in supported_languages() {
        println!("{:<5} {}", language.code, language.name);
    }
}

/// Handle server command
pub async fn handle_server(host: String, port: u16) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    info!("Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📄 Upload documents to http://{}:{}/api/translate/document/", host, port);

    run_server(host, port).await?;

    Ok(())
}
