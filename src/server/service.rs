//! Asynchronous document translation service

use std::sync::Arc;
use tracing::{error, info};

use crate::core::client::Translator;
use crate::core::config::ServiceConfig;
use crate::core::errors::{DocumentError, DocumentResult};
use crate::processors::{output_filename, translate_document, DocumentKind};
use crate::server::tasks::{TaskOutput, TaskRegistry};

/// Progress published once an upload passes validation
const VALIDATED_PERCENT: u8 = 10;

/// Accepts uploads and runs each as a background task
#[derive(Clone)]
pub struct DocumentService {
    registry: Arc<TaskRegistry>,
    translator: Arc<dyn Translator>,
    config: ServiceConfig,
}

/// What the caller gets back for an accepted upload
#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub task_id: String,
    pub output_filename: String,
}

impl DocumentService {
    pub fn new(translator: Arc<dyn Translator>, config: ServiceConfig) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new(config.task_ttl_secs)),
            translator,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Validate the upload and start translating it in the background
    ///
    /// Size and extension problems are returned directly; anything that goes
    /// wrong later ends the task in the `error` state.
    pub fn submit(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> DocumentResult<SubmittedTask> {
        if bytes.len() > self.config.max_file_size {
            return Err(DocumentError::SizeLimit {
                size: bytes.len(),
                limit: self.config.max_file_size,
            });
        }
        let kind = DocumentKind::from_filename(filename)?;

        let task_id = self.registry.create();
        let output_name = output_filename(filename, kind, target_lang);
        info!(
            "Task {} accepted: {} ({} bytes), {} -> {}",
            task_id,
            filename,
            bytes.len(),
            source_lang,
            target_lang
        );
        self.registry
            .update(&task_id, VALIDATED_PERCENT, "File validation completed");

        let registry = Arc::clone(&self.registry);
        let translator = Arc::clone(&self.translator);
        let options = self.config.document_options();
        let filename = filename.to_string();
        let source_lang = source_lang.to_string();
        let target_lang = target_lang.to_string();
        let id = task_id.clone();
        let name = output_name.clone();

        tokio::spawn(async move {
            // Reclaimed before the job started; run nothing.
            let Some(sink) = registry.sink(&id, VALIDATED_PERCENT) else {
                return;
            };

            // The job runs in its own task so a panic surfaces as a JoinError
            let job = tokio::spawn(async move {
                translate_document(
                    &bytes,
                    &filename,
                    &source_lang,
                    &target_lang,
                    translator.as_ref(),
                    &sink,
                    options,
                )
                .await
            });

            match job.await {
                Err(e) => {
                    error!("Task {} aborted: {}", id, e);
                    registry.fail(&id, format!("Translation aborted: {}", e));
                }
                Ok(Ok((output, metrics))) => {
                    info!(
                        "Task {} completed: {} tokens in {:.2}s",
                        id, metrics.total_tokens, metrics.processing_time
                    );
                    registry.complete(
                        &id,
                        TaskOutput {
                            filename: name,
                            content_type: kind.content_type(),
                            bytes: output,
                        },
                        metrics,
                    );
                }
                Ok(Err(e)) => {
                    error!("Task {} failed: {}", id, e);
                    registry.fail(&id, e.to_string());
                }
            }
        });

        Ok(SubmittedTask {
            task_id,
            output_filename: output_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::Result;
    use crate::core::models::{JobStatus, UsageMetrics};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Reverse;

    #[async_trait]
    impl Translator for Reverse {
        async fn translate(&self, text: &str, _: &str, _: &str) -> Result<(String, UsageMetrics)> {
            Ok((
                text.chars().rev().collect(),
                UsageMetrics {
                    input_tokens: 2,
                    output_tokens: 3,
                    processing_time: 0.25,
                    cached: false,
                },
            ))
        }

        fn name(&self) -> String {
            "reverse".to_string()
        }
    }

    struct Panicking;

    #[async_trait]
    impl Translator for Panicking {
        async fn translate(&self, _: &str, _: &str, _: &str) -> Result<(String, UsageMetrics)> {
            panic!("translator bug");
        }

        fn name(&self) -> String {
            "panicking".to_string()
        }
    }

    fn service(max_file_size: usize) -> DocumentService {
        let config = ServiceConfig {
            max_file_size,
            ..ServiceConfig::default()
        };
        DocumentService::new(Arc::new(Reverse), config)
    }

    async fn wait_terminal(service: &DocumentService, task_id: &str) -> JobStatus {
        for _ in 0..200 {
            let state = service.registry().progress(task_id).unwrap();
            if state.status.is_terminal() {
                return state.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never finished", task_id);
    }

    #[tokio::test]
    async fn test_rejects_before_creating_a_task() {
        let service = service(8);
        assert!(matches!(
            service.submit(b"far too large".to_vec(), "a.txt", "en", "fr"),
            Err(DocumentError::SizeLimit { .. })
        ));
        assert!(matches!(
            service.submit(b"small".to_vec(), "a.rtf", "en", "fr"),
            Err(DocumentError::UnsupportedFormat { .. })
        ));
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let service = service(1024);
        let task = service
            .submit(b"abc\n\nxyz".to_vec(), "Notes.TXT", "en", "fr")
            .unwrap();
        assert_eq!(task.output_filename, "notes_translated_fr.txt");

        assert_eq!(wait_terminal(&service, &task.task_id).await, JobStatus::Completed);
        let state = service.registry().progress(&task.task_id).unwrap();
        let metrics = state.metrics.unwrap();
        assert_eq!(metrics.total_tokens, 10);
        assert_eq!(metrics.processing_time, 0.5);
        assert_eq!(metrics.tokens_per_second, 20.0);

        let output = service.registry().take_output(&task.task_id).unwrap();
        assert_eq!(output.bytes, b"cba\n\nzyx");
        assert_eq!(output.content_type, "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_load_failure_ends_in_error() {
        let service = service(1024);
        let task = service
            .submit(b"not a zip archive".to_vec(), "deck.pptx", "en", "fr")
            .unwrap();

        assert_eq!(wait_terminal(&service, &task.task_id).await, JobStatus::Error);
        let state = service.registry().progress(&task.task_id).unwrap();
        assert!(state.message.starts_with("Failed to load pptx document"));
        assert!(service.registry().take_output(&task.task_id).is_err());
    }

    #[tokio::test]
    async fn test_panicking_job_ends_in_error() {
        let service = DocumentService::new(Arc::new(Panicking), ServiceConfig::default());
        let task = service
            .submit(b"hello".to_vec(), "a.txt", "en", "fr")
            .unwrap();

        assert_eq!(wait_terminal(&service, &task.task_id).await, JobStatus::Error);
        let state = service.registry().progress(&task.task_id).unwrap();
        assert!(state.message.starts_with("Translation aborted"));
        assert!(service.registry().take_output(&task.task_id).is_err());
    }

    #[tokio::test]
    async fn test_progress_never_goes_below_validation() {
        let service = service(1024);
        let task = service
            .submit(b"one\n\ntwo\n\nthree".to_vec(), "a.txt", "en", "fr")
            .unwrap();
        let mut rx = service.registry().subscribe(&task.task_id).unwrap();

        let mut seen = vec![rx.borrow_and_update().progress];
        while !rx.borrow().status.is_terminal() {
            rx.changed().await.unwrap();
            let state = rx.borrow_and_update().clone();
            if !state.status.is_terminal() {
                seen.push(state.progress);
            }
        }
        assert_eq!(seen[0], VALIDATED_PERCENT);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", seen);
    }
}
