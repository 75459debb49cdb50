//! Custom error types for translation and document jobs

use thiserror::Error;

/// Errors raised by a translation capability
#[derive(Error, Debug)]
pub enum TranslationError {
    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimitError {
        retry_after: Option<u64>,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Request timeout
    #[error("Request timeout")]
    TimeoutError,

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Batch result did not line up with its input
    #[error("Batch length mismatch: sent {expected}, received {actual}")]
    BatchMismatch {
        expected: usize,
        actual: usize,
    },

    /// Catch-all for capability implementations that only carry a message
    #[error("Translation failed: {0}")]
    Failed(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::ConfigError {
            message: err.to_string(),
        }
    }
}

/// Errors raised while running a document job
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Bytes could not be parsed as the declared format
    #[error("Failed to load {format} document: {message}")]
    Load {
        format: &'static str,
        message: String,
    },

    /// Extension is not one of the supported document types
    #[error("Unsupported file type '{extension}'. Only .docx, .xlsx, .pptx, .pdf, .html, .htm and .txt files are supported")]
    UnsupportedFormat {
        extension: String,
    },

    /// Input is larger than the configured maximum
    #[error("File too large ({size} bytes). Maximum size is {limit} bytes")]
    SizeLimit {
        size: usize,
        limit: usize,
    },

    /// The translation capability failed for some unit
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// Mutated structure could not be re-encoded
    #[error("Failed to serialize {format} document: {message}")]
    Serialize {
        format: &'static str,
        message: String,
    },

    /// Unknown or already reclaimed task
    #[error("File not found or translation not completed: {task_id}")]
    NotFound {
        task_id: String,
    },

    /// File access outside of a job (CLI input/output)
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },
}

impl DocumentError {
    /// Shorthand for a load failure
    pub fn load(format: &'static str, message: impl ToString) -> Self {
        DocumentError::Load {
            format,
            message: message.to_string(),
        }
    }

    /// Shorthand for a serialize failure
    pub fn serialize(format: &'static str, message: impl ToString) -> Self {
        DocumentError::Serialize {
            format,
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code, used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::Load { .. } => "load_error",
            DocumentError::UnsupportedFormat { .. } => "unsupported_format",
            DocumentError::SizeLimit { .. } => "size_limit",
            DocumentError::Translation(_) => "translation_error",
            DocumentError::Serialize { .. } => "serialize_error",
            DocumentError::NotFound { .. } => "not_found",
            DocumentError::FileError { .. } => "file_error",
        }
    }
}

/// Result type for translation capability calls
pub type Result<T> = std::result::Result<T, TranslationError>;

/// Result type for document jobs
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;
