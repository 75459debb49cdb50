//! Core data models for translation jobs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage accounting for a single capability call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Seconds spent producing this result
    pub processing_time: f64,
    pub cached: bool,
}

impl UsageMetrics {
    /// Usage record for a cache hit: no tokens, no time
    pub fn cache_hit() -> Self {
        Self {
            cached: true,
            ..Self::default()
        }
    }

    /// Sum of input and output tokens
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Merge another record into this one (batch accounting)
    pub fn absorb(&mut self, other: &UsageMetrics) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.processing_time += other.processing_time.max(0.0);
        self.cached = self.cached && other.cached;
    }
}

/// Final job-level metrics
///
/// Produced once by [`MetricsAccumulator::finish`] and never mutated after.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub tokens_per_second: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub processing_time: f64,
    pub cached: bool,
}

/// Running totals for one job
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    input_tokens: u64,
    output_tokens: u64,
    processing_time: f64,
    calls: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the usage of one translated unit
    pub fn add(&mut self, usage: &UsageMetrics) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.processing_time += usage.processing_time.max(0.0);
        self.calls += 1;
    }

    /// Number of capability calls recorded so far
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Compute throughput and round time-based fields to two decimals
    pub fn finish(self) -> AggregateMetrics {
        let total_tokens = self.input_tokens + self.output_tokens;
        let tokens_per_second = if self.processing_time > 0.0 {
            total_tokens as f64 / self.processing_time
        } else {
            0.0
        };

        AggregateMetrics {
            tokens_per_second: round2(tokens_per_second),
            total_tokens,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            processing_time: round2(self.processing_time),
            // Document jobs never report an aggregate cache hit.
            cached: false,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Externally observable state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AggregateMetrics>,
}

impl ProgressState {
    pub fn starting() -> Self {
        Self {
            status: JobStatus::Starting,
            progress: 0,
            message: String::new(),
            download_url: None,
            metrics: None,
        }
    }

    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Processing,
            progress: progress.min(100),
            message: message.into(),
            download_url: None,
            metrics: None,
        }
    }

    pub fn completed(download_url: String, metrics: AggregateMetrics) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: 100,
            message: "Translation completed".to_string(),
            download_url: Some(download_url),
            metrics: Some(metrics),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            progress: 0,
            message: message.into(),
            download_url: None,
            metrics: None,
        }
    }
}

/// Request handed to a translation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }
}
