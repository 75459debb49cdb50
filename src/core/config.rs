//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Default OpenAI-compatible endpoint used by the HTTP translator
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name sent to the endpoint
const DEFAULT_MODEL: &str = "m2m100_418M";

/// Reference upload limit: 10 MiB
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Configuration for the HTTP translation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub api_key: String,
    pub api_endpoint: String,
    pub model: String,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    /// Number of cached translations kept in memory, 0 disables caching
    pub cache_capacity: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("TRANSLATOR_API_KEY").unwrap_or_default(),
            api_endpoint: std::env::var("TRANSLATOR_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            model: DEFAULT_MODEL.to_string(),
            max_concurrent: 8,
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_ms: 60000,
            cache_capacity: 4096,
        }
    }
}

impl TranslatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("TRANSLATOR_API_KEY").unwrap_or_default();

        let api_endpoint = std::env::var("TRANSLATOR_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let model = std::env::var("TRANSLATOR_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let max_concurrent = std::env::var("MAX_CONCURRENT")
            .unwrap_or_else(|_| "8".to_string())
            .parse::<usize>()?;

        let max_retries = std::env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()?;

        let retry_delay_ms = std::env::var("RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()?;

        let timeout_ms = std::env::var("REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse::<u64>()?;

        let cache_capacity = std::env::var("CACHE_CAPACITY")
            .unwrap_or_else(|_| "4096".to_string())
            .parse::<usize>()?;

        let config = Self {
            api_key,
            api_endpoint,
            model,
            max_concurrent,
            max_retries,
            retry_delay_ms,
            timeout_ms,
            cache_capacity,
        };

        info!(
            "Translator backend: {} (model {})",
            config.api_endpoint, config.model
        );
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_endpoint.is_empty() {
            return Err(anyhow::anyhow!("API endpoint is required"));
        }

        if self.model.is_empty() {
            return Err(anyhow::anyhow!("Model name is required"));
        }

        if self.api_key.is_empty() {
            warn!("No API key configured, requests are sent unauthenticated");
        }

        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("max_concurrent must be greater than 0"));
        }

        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// What the PDF adapter does with the translated overlay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfOverlayMode {
    /// Draw the translated words over each page
    #[default]
    Inject,
    /// Build the overlay but emit the original pages unchanged
    Discard,
}

/// Options that shape a document job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    pub max_file_size: usize,
    pub pdf_overlay: PdfOverlayMode,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            pdf_overlay: PdfOverlayMode::default(),
        }
    }
}

/// Configuration of the document translation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub max_file_size: usize,
    pub pdf_overlay: PdfOverlayMode,
    /// Tasks older than this are reclaimed by the sweeper
    pub task_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            pdf_overlay: PdfOverlayMode::default(),
            task_ttl_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// Load from environment (`MAX_FILE_SIZE`, `PDF_OVERLAY`, `TASK_TTL_SECS`,
    /// `CLEANUP_INTERVAL_SECS`), falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_file_size == 0 {
            return Err(anyhow::anyhow!("max_file_size must be greater than 0"));
        }

        if self.task_ttl_secs == 0 {
            return Err(anyhow::anyhow!("task_ttl_secs must be greater than 0"));
        }

        if self.cleanup_interval_secs == 0 {
            return Err(anyhow::anyhow!("cleanup_interval_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Per-job options derived from this configuration
    pub fn document_options(&self) -> DocumentOptions {
        DocumentOptions {
            max_file_size: self.max_file_size,
            pdf_overlay: self.pdf_overlay,
        }
    }
}
