//! Format-agnostic translation driver
//!
//! A [`DocumentAdapter`] knows how one format is laid out; [`DocumentJob`]
//! walks any adapter the same way: enumerate units once, translate the
//! non-blank ones in order, write results back, report progress after every
//! unit and finally serialize.

use std::fmt::Debug;
use tracing::{debug, info};

use crate::core::client::Translator;
use crate::core::config::DocumentOptions;
use crate::core::errors::DocumentResult;
use crate::core::models::{AggregateMetrics, MetricsAccumulator};
use crate::core::progress::{ProgressPlan, ProgressSink, ProgressTracker};

/// One piece of source text and where its translation goes
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit<L> {
    pub text: String,
    pub location: L,
    /// Section (sheet, slide, page) the unit belongs to; 0 for flat formats
    pub section: usize,
    /// Progress units this visit accounts for
    pub weight: usize,
}

impl<L> TranslationUnit<L> {
    pub fn new(text: impl Into<String>, location: L) -> Self {
        Self {
            text: text.into(),
            location,
            section: 0,
            weight: 1,
        }
    }

    pub fn in_section(mut self, section: usize) -> Self {
        self.section = section;
        self
    }

    pub fn with_weight(mut self, weight: usize) -> Self {
        self.weight = weight;
        self
    }

    /// Blank units are visited but never translated
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A loaded document of one format
pub trait DocumentAdapter: Send + Sized {
    /// Back-reference into the adapter's own storage
    type Location: Debug + Send + Sync;

    /// Short format name used in logs and errors
    const FORMAT: &'static str;

    /// Parse raw bytes
    fn load(bytes: &[u8], options: &DocumentOptions) -> DocumentResult<Self>;

    /// Work layout, fixed before translation starts
    fn plan(&self) -> ProgressPlan;

    /// Every unit in translation order
    fn units(&self) -> Vec<TranslationUnit<Self::Location>>;

    /// Store the translation for one unit
    fn write_back(&mut self, location: &Self::Location, text: String) -> DocumentResult<()>;

    /// Encode the mutated document
    fn serialize(self) -> DocumentResult<Vec<u8>>;

    /// Progress message shown after visiting `unit`
    fn unit_message(&self, unit: &TranslationUnit<Self::Location>, visited: usize, total: usize) -> String;

    /// Progress message for a section that holds no units
    fn section_message(&self, section: usize) -> String {
        format!("Translating section {}...", section + 1)
    }

    /// Return the input untouched when there is nothing to translate
    fn passthrough_when_empty(&self) -> bool {
        false
    }
}

/// One translation run: a language pair, a capability and a sink
pub struct DocumentJob<'a> {
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub translator: &'a dyn Translator,
    pub sink: &'a dyn ProgressSink,
    pub options: DocumentOptions,
}

impl<'a> DocumentJob<'a> {
    pub fn new(
        source_lang: &'a str,
        target_lang: &'a str,
        translator: &'a dyn Translator,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            source_lang,
            target_lang,
            translator,
            sink,
            options: DocumentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DocumentOptions) -> Self {
        self.options = options;
        self
    }

    /// Load `bytes` with adapter `A` and translate it
    pub async fn run<A: DocumentAdapter>(
        &self,
        bytes: &[u8],
    ) -> DocumentResult<(Vec<u8>, AggregateMetrics)> {
        let adapter = A::load(bytes, &self.options)?;
        self.run_loaded(adapter, bytes).await
    }

    /// Translate an already loaded adapter; `original` is returned as-is when
    /// the adapter asks for passthrough
    pub async fn run_loaded<A: DocumentAdapter>(
        &self,
        mut adapter: A,
        original: &[u8],
    ) -> DocumentResult<(Vec<u8>, AggregateMetrics)> {
        let plan = adapter.plan();
        let units = adapter.units();

        if units.is_empty() && adapter.passthrough_when_empty() {
            info!("No text content found in {} document, returning input unchanged", A::FORMAT);
            return Ok((original.to_vec(), AggregateMetrics::default()));
        }

        let total = plan.total_units();
        info!(
            "Translating {} document: {} units in {} section(s), {} -> {}",
            A::FORMAT,
            total,
            plan.section_count(),
            self.source_lang,
            self.target_lang
        );

        let mut tracker = ProgressTracker::new(plan);
        let mut metrics = MetricsAccumulator::new();
        let unit_count = units.len();

        for (index, unit) in units.iter().enumerate() {
            for (section, percent) in tracker.enter_section(unit.section) {
                self.sink.report(percent, &adapter.section_message(section));
            }

            if unit.is_blank() {
                debug!("Skipping blank unit at {:?}", unit.location);
            } else {
                let (translated, usage) = self
                    .translator
                    .translate(&unit.text, self.source_lang, self.target_lang)
                    .await?;
                adapter.write_back(&unit.location, translated)?;
                metrics.add(&usage);
            }

            if let Some(percent) = tracker.advance(unit.section, unit.weight) {
                let message = adapter.unit_message(unit, index + 1, unit_count);
                self.sink.report(percent, &message);
            }
        }

        for (section, percent) in tracker.finish() {
            self.sink.report(percent, &adapter.section_message(section));
        }

        let calls = metrics.calls();
        let output = adapter.serialize()?;
        let metrics = metrics.finish();

        info!(
            "Finished {} document: {} of {} units translated, {} tokens in {:.2}s ({:.2} tok/s)",
            A::FORMAT,
            calls,
            unit_count,
            metrics.total_tokens,
            metrics.processing_time,
            metrics.tokens_per_second
        );

        Ok((output, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{DocumentError, TranslationError};
    use crate::core::models::UsageMetrics;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Flat list of strings, one unit each
    struct Lines {
        lines: Vec<String>,
    }

    impl DocumentAdapter for Lines {
        type Location = usize;
        const FORMAT: &'static str = "lines";

        fn load(bytes: &[u8], _: &DocumentOptions) -> DocumentResult<Self> {
            let text = std::str::from_utf8(bytes).map_err(|e| DocumentError::load("lines", e))?;
            Ok(Self {
                lines: text.split('|').map(str::to_string).collect(),
            })
        }

        fn plan(&self) -> ProgressPlan {
            ProgressPlan::Linear { total: self.lines.len() }
        }

        fn units(&self) -> Vec<TranslationUnit<usize>> {
            self.lines
                .iter()
                .enumerate()
                .map(|(i, l)| TranslationUnit::new(l.clone(), i))
                .collect()
        }

        fn write_back(&mut self, location: &usize, text: String) -> DocumentResult<()> {
            self.lines[*location] = text;
            Ok(())
        }

        fn serialize(self) -> DocumentResult<Vec<u8>> {
            Ok(self.lines.join("|").into_bytes())
        }

        fn unit_message(&self, _: &TranslationUnit<usize>, visited: usize, total: usize) -> String {
            format!("line {} of {}", visited, total)
        }
    }

    struct Tagged {
        fail_on: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Translator for Tagged {
        async fn translate(
            &self,
            text: &str,
            _: &str,
            target: &str,
        ) -> crate::core::errors::Result<(String, UsageMetrics)> {
            self.calls.lock().push(text.to_string());
            if self.fail_on.as_deref() == Some(text) {
                return Err(TranslationError::Failed("boom".to_string()));
            }
            Ok((
                format!("{}:{}", target, text),
                UsageMetrics {
                    input_tokens: 2,
                    output_tokens: 3,
                    processing_time: 0.25,
                    cached: true,
                },
            ))
        }

        fn name(&self) -> String {
            "tagged".to_string()
        }
    }

    #[tokio::test]
    async fn test_translates_and_skips_blank_units() {
        let translator = Tagged {
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        };
        let reports = Mutex::new(Vec::new());
        let sink = |p: u8, m: &str| reports.lock().push((p, m.to_string()));
        let job = DocumentJob::new("en", "fr", &translator, &sink);

        let (bytes, metrics) = job.run::<Lines>(b"a| |b|").await.unwrap();

        assert_eq!(String::from_utf8(bytes).unwrap(), "fr:a| |fr:b|");
        assert_eq!(translator.calls.lock().as_slice(), &["a", "b"]);
        assert_eq!(metrics.total_tokens, 10);
        assert_eq!(metrics.processing_time, 0.5);
        assert_eq!(metrics.tokens_per_second, 20.0);
        assert!(!metrics.cached);

        let percents: Vec<u8> = reports.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![25, 50, 75, 99]);
        assert_eq!(reports.lock()[1].1, "line 2 of 4");
    }

    #[tokio::test]
    async fn test_failure_aborts_job() {
        let translator = Tagged {
            fail_on: Some("c".to_string()),
            calls: Mutex::new(Vec::new()),
        };
        let job = DocumentJob::new("en", "fr", &translator, &crate::core::progress::NoopSink);

        let result = job.run::<Lines>(b"a|b|c|d").await;
        assert!(matches!(result, Err(DocumentError::Translation(_))));
        assert_eq!(translator.calls.lock().len(), 3);
    }
}
