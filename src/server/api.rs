//! HTTP API server implementation

use axum::{
    extract::{
        multipart::MultipartError,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Json, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::cache::translator_from_env;
use crate::core::client::Translator;
use crate::core::config::ServiceConfig;
use crate::core::errors::{DocumentError, TranslationError};
use crate::core::languages::{supported_languages, Language};
use crate::core::models::{ProgressState, UsageMetrics};
use crate::server::service::DocumentService;
use crate::server::tasks::spawn_sweeper;

/// Room for multipart framing and the form fields on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state
pub struct AppState {
    pub service: DocumentService,
}

impl AppState {
    pub fn new(translator: Arc<dyn Translator>, config: ServiceConfig) -> Self {
        Self {
            service: DocumentService::new(translator, config),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    translator: String,
}

#[derive(Serialize)]
struct LanguagesResponse {
    languages: Vec<Language>,
}

/// Single text translation request
#[derive(Deserialize)]
pub struct TextTranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Serialize)]
pub struct TextTranslateResponse {
    pub translation: String,
    pub metrics: UsageMetrics,
}

/// Batch translation request
#[derive(Deserialize)]
pub struct BatchTranslateRequest {
    pub texts: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Serialize)]
pub struct BatchTranslateResponse {
    pub translations: Vec<String>,
    pub metrics: UsageMetrics,
}

/// Accepted document upload
#[derive(Serialize)]
pub struct DocumentAccepted {
    pub task_id: String,
    pub message: String,
    pub progress_url: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// Error returned by a handler, rendered as [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl From<DocumentError> for ApiError {
    fn from(err: DocumentError) -> Self {
        let status = match &err {
            DocumentError::UnsupportedFormat { .. } => StatusCode::BAD_REQUEST,
            DocumentError::SizeLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DocumentError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            DocumentError::NotFound { .. } => {
                "File not found or translation not completed".to_string()
            }
            other => other.to_string(),
        };
        Self::new(status, err.code(), message)
    }
}

impl From<TranslationError> for ApiError {
    fn from(err: TranslationError) -> Self {
        warn!("Translation failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "translation_error", err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "size_limit"
        } else {
            "invalid_request"
        };
        Self::new(status, code, err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = if self.status.is_server_error() {
            "api_error"
        } else {
            "invalid_request_error"
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.message,
                code: Some(self.code.to_string()),
                r#type: Some(kind.to_string()),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Health check handler
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ready",
        translator: state.service.translator().name(),
    })
}

async fn languages() -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: supported_languages(),
    })
}

async fn translate_text(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TextTranslateRequest>,
) -> Result<Json<TextTranslateResponse>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::invalid_request("text cannot be empty"));
    }

    let (translation, metrics) = state
        .service
        .translator()
        .translate(&payload.text, &payload.source_lang, &payload.target_lang)
        .await?;

    Ok(Json(TextTranslateResponse {
        translation,
        metrics,
    }))
}

async fn translate_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchTranslateRequest>,
) -> Result<Json<BatchTranslateResponse>, ApiError> {
    if payload.texts.is_empty() {
        return Err(ApiError::invalid_request("texts cannot be empty"));
    }

    let (translations, metrics) = state
        .service
        .translator()
        .translate_batch(&payload.texts, &payload.source_lang, &payload.target_lang)
        .await?;

    if translations.len() != payload.texts.len() {
        return Err(TranslationError::BatchMismatch {
            expected: payload.texts.len(),
            actual: translations.len(),
        }
        .into());
    }

    Ok(Json(BatchTranslateResponse {
        translations,
        metrics,
    }))
}

/// Document upload handler: validates, then translates in the background
async fn translate_document_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentAccepted>), ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut source_lang = None;
    let mut target_lang = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::invalid_request("file has no filename"))?;
                let bytes = field.bytes().await?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("source_lang") => source_lang = Some(field.text().await?),
            Some("target_lang") => target_lang = Some(field.text().await?),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::invalid_request("file is required"))?;
    let source_lang =
        source_lang.ok_or_else(|| ApiError::invalid_request("source_lang is required"))?;
    let target_lang =
        target_lang.ok_or_else(|| ApiError::invalid_request("target_lang is required"))?;

    let task = state
        .service
        .submit(bytes, &filename, &source_lang, &target_lang)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentAccepted {
            progress_url: format!("/api/progress/{}", task.task_id),
            task_id: task.task_id,
            message: "Translation started".to_string(),
        }),
    ))
}

async fn progress(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<ProgressState>, ApiError> {
    state
        .service
        .registry()
        .progress(&task_id)
        .map(Json)
        .ok_or_else(|| DocumentError::NotFound { task_id }.into())
}

/// Serve a finished document once; the task is forgotten afterwards
async fn download(
    State(state): State<Arc<AppState>>,
    Path((task_id, _filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let output = state.service.registry().take_output(&task_id)?;
    info!("Task {} downloaded ({} bytes)", task_id, output.bytes.len());

    let headers = [
        (header::CONTENT_TYPE, output.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output.filename),
        ),
    ];
    Ok((headers, output.bytes).into_response())
}

async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| stream_progress(socket, state, task_id))
}

async fn send_state(socket: &mut WebSocket, state: &ProgressState) -> Result<(), axum::Error> {
    let text = serde_json::to_string(state).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}

/// Push every state change until the task is terminal, then close
async fn stream_progress(mut socket: WebSocket, state: Arc<AppState>, task_id: String) {
    let Some(mut rx) = state.service.registry().subscribe(&task_id) else {
        let _ = send_state(&mut socket, &ProgressState::error("Task not found")).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    loop {
        let current = rx.borrow_and_update().clone();
        if let Err(e) = send_state(&mut socket, &current).await {
            debug!("Progress socket for {} closed: {}", task_id, e);
            return;
        }
        if current.status.is_terminal() || rx.changed().await.is_err() {
            break;
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

/// All API routes over the given state
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.service.config().max_file_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/api/status/", get(status))
        .route("/api/languages/", get(languages))
        .route("/api/translate/", post(translate_text))
        .route("/api/translate/batch/", post(translate_batch))
        .route("/api/translate/document/", post(translate_document_upload))
        .route("/api/progress/:task_id", get(progress))
        .route("/api/download/:task_id/:filename", get(download))
        .route("/ws/translation-progress/:task_id", get(progress_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(host: String, port: u16) -> anyhow::Result<()> {
    let translator = translator_from_env()?;
    let config = ServiceConfig::from_env()?;
    let cleanup_interval = Duration::from_secs(config.cleanup_interval_secs);

    let state = Arc::new(AppState::new(translator, config));
    spawn_sweeper(Arc::clone(state.service.registry()), cleanup_interval);

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
