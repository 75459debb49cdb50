//! Translation capability and its HTTP implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::languages::language_name;
use crate::core::models::{TranslationRequest, UsageMetrics};

/// A text translation capability
///
/// Implementations may cache, batch or retry internally; callers treat every
/// error as final.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one piece of text
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, UsageMetrics)>;

    /// Translate several texts, preserving length and order
    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(Vec<String>, UsageMetrics)> {
        let mut translations = Vec::with_capacity(texts.len());
        let mut usage = UsageMetrics {
            cached: !texts.is_empty(),
            ..UsageMetrics::default()
        };

        for text in texts {
            let (translated, call_usage) = self.translate(text, source_lang, target_lang).await?;
            usage.absorb(&call_usage);
            translations.push(translated);
        }

        Ok((translations, usage))
    }

    /// Human readable backend name
    fn name(&self) -> String;
}

#[async_trait]
impl<T: Translator + ?Sized> Translator for Arc<T> {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, UsageMetrics)> {
        (**self).translate(text, source_lang, target_lang).await
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(Vec<String>, UsageMetrics)> {
        (**self).translate_batch(texts, source_lang, target_lang).await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Translator backed by an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: reqwest::Client,
    config: Arc<TranslatorConfig>,
    semaphore: Arc<Semaphore>,
}

impl HttpTranslator {
    /// Create a new HTTP translator
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        Ok(Self {
            client,
            config: Arc::new(config),
            semaphore,
        })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self> {
        let config = TranslatorConfig::from_env()?;
        Self::new(config)
    }

    /// Configuration in use
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Send with exponential backoff on transient failures
    async fn send_with_retry(&self, request: &TranslationRequest) -> Result<(String, UsageMetrics)> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for model {}", attempt, self.config.model);
                sleep(Duration::from_millis(
                    self.config.retry_delay_ms * 2_u64.pow(attempt - 1),
                ))
                .await;
            }

            match self.send_request(request).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("Successfully translated after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let retryable = is_retryable(&e);
                    warn!("Translation request failed: {}", e);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(TranslationError::TimeoutError))
    }

    /// Send actual HTTP request
    async fn send_request(&self, request: &TranslationRequest) -> Result<(String, UsageMetrics)> {
        let started = Instant::now();
        let body = self.request_body(request);

        let mut builder = self
            .client
            .post(&self.config.api_endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TranslationError::TimeoutError
            } else {
                TranslationError::NetworkError {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();

        if status.is_success() {
            let json: serde_json::Value =
                response
                    .json()
                    .await
                    .map_err(|e| TranslationError::InvalidResponseError {
                        message: e.to_string(),
                    })?;

            let (translation, mut usage) = parse_completion(&json)?;
            usage.processing_time = started.elapsed().as_secs_f64();
            Ok((translation, usage))
        } else {
            let status_code = status.as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(TranslationError::RateLimitError { retry_after });
            }

            Err(TranslationError::ApiError {
                status: status_code,
                message: error_text,
            })
        }
    }

    fn request_body(&self, request: &TranslationRequest) -> serde_json::Value {
        let source = language_name(&request.source_lang).unwrap_or(request.source_lang.as_str());
        let target = language_name(&request.target_lang).unwrap_or(request.target_lang.as_str());

        serde_json::json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Translate the user's text from {} to {}. Reply with the translation only.",
                        source, target
                    )
                },
                {
                    "role": "user",
                    "content": request.text
                }
            ],
            "source_language": request.source_lang,
            "target_language": request.target_lang
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, UsageMetrics)> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| TranslationError::Failed(e.to_string()))?;

        let request = TranslationRequest::new(text, source_lang, target_lang);
        self.send_with_retry(&request).await
    }

    fn name(&self) -> String {
        format!("http:{}", self.config.model)
    }
}

/// Pull translation text and token usage out of a chat completion body
fn parse_completion(json: &serde_json::Value) -> Result<(String, UsageMetrics)> {
    let translation = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .ok_or_else(|| TranslationError::InvalidResponseError {
            message: "No translation in response".to_string(),
        })?
        .trim()
        .to_string();

    let usage = UsageMetrics {
        input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        processing_time: 0.0,
        cached: false,
    };

    Ok((translation, usage))
}

fn is_retryable(error: &TranslationError) -> bool {
    match error {
        TranslationError::NetworkError { .. }
        | TranslationError::TimeoutError
        | TranslationError::RateLimitError { .. }
        | TranslationError::InvalidResponseError { .. } => true,
        TranslationError::ApiError { status, .. } => *status >= 500,
        _ => false,
    }
}
