//! Document task registry
//!
//! Every submitted document gets a task with a watch channel carrying its
//! [`ProgressState`]. Pollers read the latest value, WebSocket clients wait
//! on changes. Once a task is terminal its state never changes again.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::errors::{DocumentError, DocumentResult};
use crate::core::models::{AggregateMetrics, ProgressState};
use crate::core::progress::{ProgressSink, MAX_RUNNING_PERCENT};

/// Finished output waiting for download
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct TaskEntry {
    sender: Arc<watch::Sender<ProgressState>>,
    created_at: DateTime<Utc>,
    output: Option<TaskOutput>,
}

/// Publishes a job's progress into its task
///
/// Job percentages `0..=99` are rescaled onto `floor..=99` so a task that
/// already showed `floor` never moves backwards.
#[derive(Debug, Clone)]
pub struct TaskProgressSink {
    sender: Arc<watch::Sender<ProgressState>>,
    floor: u8,
}

impl TaskProgressSink {
    fn scale(&self, percent: u8) -> u8 {
        let max = u32::from(MAX_RUNNING_PERCENT);
        let floor = u32::from(self.floor.min(MAX_RUNNING_PERCENT));
        let percent = u32::from(percent).min(max);
        let scaled = floor + percent * (max - floor) / max;
        u8::try_from(scaled).unwrap_or(MAX_RUNNING_PERCENT)
    }
}

impl ProgressSink for TaskProgressSink {
    fn report(&self, percent: u8, message: &str) {
        let percent = self.scale(percent);
        self.sender.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            let percent = percent.max(state.progress);
            *state = ProgressState::processing(percent, message);
            true
        });
    }
}

/// All live tasks of the service
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    ttl: chrono::Duration,
}

impl TaskRegistry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
        }
    }

    /// Register a new task in the `starting` state
    pub fn create(&self) -> String {
        let task_id = Uuid::new_v4().to_string();
        let (sender, _) = watch::channel(ProgressState::starting());
        self.tasks.write().insert(
            task_id.clone(),
            TaskEntry {
                sender: Arc::new(sender),
                created_at: Utc::now(),
                output: None,
            },
        );
        debug!("Created task {}", task_id);
        task_id
    }

    fn publish(&self, task_id: &str, state: ProgressState) -> bool {
        let tasks = self.tasks.read();
        let Some(entry) = tasks.get(task_id) else {
            return false;
        };
        entry.sender.send_if_modified(|current| {
            if current.status.is_terminal() {
                return false;
            }
            *current = state;
            true
        })
    }

    /// Set a non-terminal state; ignored once the task is terminal
    pub fn update(&self, task_id: &str, percent: u8, message: &str) -> bool {
        self.publish(task_id, ProgressState::processing(percent, message))
    }

    /// Sink feeding progress reports into the task, starting at `floor`
    pub fn sink(&self, task_id: &str, floor: u8) -> Option<TaskProgressSink> {
        self.tasks.read().get(task_id).map(|entry| TaskProgressSink {
            sender: Arc::clone(&entry.sender),
            floor,
        })
    }

    /// Store the output and mark the task completed
    pub fn complete(&self, task_id: &str, output: TaskOutput, metrics: AggregateMetrics) -> bool {
        let download_url = format!("/api/download/{}/{}", task_id, output.filename);
        let mut tasks = self.tasks.write();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        if entry.sender.borrow().status.is_terminal() {
            return false;
        }
        entry.output = Some(output);
        entry
            .sender
            .send_replace(ProgressState::completed(download_url, metrics));
        true
    }

    /// Mark the task failed; partial output is never stored
    pub fn fail(&self, task_id: &str, message: impl Into<String>) -> bool {
        self.publish(task_id, ProgressState::error(message))
    }

    /// Latest state of a task
    pub fn progress(&self, task_id: &str) -> Option<ProgressState> {
        self.tasks
            .read()
            .get(task_id)
            .map(|entry| entry.sender.borrow().clone())
    }

    /// Receiver that sees every later state change
    pub fn subscribe(&self, task_id: &str) -> Option<watch::Receiver<ProgressState>> {
        self.tasks
            .read()
            .get(task_id)
            .map(|entry| entry.sender.subscribe())
    }

    /// Hand out a completed task's output and forget the task
    pub fn take_output(&self, task_id: &str) -> DocumentResult<TaskOutput> {
        let mut tasks = self.tasks.write();
        let ready = tasks
            .get(task_id)
            .map(|entry| entry.output.is_some())
            .unwrap_or(false);
        if !ready {
            return Err(DocumentError::NotFound {
                task_id: task_id.to_string(),
            });
        }

        tasks
            .remove(task_id)
            .and_then(|entry| entry.output)
            .ok_or_else(|| DocumentError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Drop tasks older than the time-to-live; returns how many went
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, entry| entry.created_at > cutoff);
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

/// Periodically reclaim expired tasks
pub fn spawn_sweeper(registry: Arc<TaskRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_expired();
            if removed > 0 {
                info!("Reclaimed {} expired task(s), {} remaining", removed, registry.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::JobStatus;

    fn output() -> TaskOutput {
        TaskOutput {
            filename: "a_translated_fr.txt".to_string(),
            content_type: "text/plain; charset=utf-8",
            bytes: b"bonjour".to_vec(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let registry = TaskRegistry::new(60);
        let id = registry.create();
        assert_eq!(registry.progress(&id).unwrap().status, JobStatus::Starting);

        registry.update(&id, 10, "File validation completed");
        let sink = registry.sink(&id, 0).unwrap();
        sink.report(55, "Translating page 2...");
        let state = registry.progress(&id).unwrap();
        assert_eq!((state.status, state.progress), (JobStatus::Processing, 55));

        assert!(registry.complete(&id, output(), AggregateMetrics::default()));
        let state = registry.progress(&id).unwrap();
        assert_eq!(state.progress, 100);
        assert_eq!(
            state.download_url.as_deref(),
            Some(format!("/api/download/{}/a_translated_fr.txt", id).as_str())
        );

        // terminal states are final
        sink.report(12, "late");
        assert!(!registry.fail(&id, "late failure"));
        assert_eq!(registry.progress(&id).unwrap().status, JobStatus::Completed);

        assert_eq!(registry.take_output(&id).unwrap().bytes, b"bonjour");
        assert!(matches!(registry.take_output(&id), Err(DocumentError::NotFound { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_task_has_nothing_to_download() {
        let registry = TaskRegistry::new(60);
        let id = registry.create();
        registry.fail(&id, "Translation failed: boom");

        let state = registry.progress(&id).unwrap();
        assert_eq!((state.status, state.progress), (JobStatus::Error, 0));
        assert!(state.metrics.is_none());
        assert!(!registry.complete(&id, output(), AggregateMetrics::default()));
        assert!(matches!(registry.take_output(&id), Err(DocumentError::NotFound { .. })));
        assert!(registry.take_output("missing").is_err());
    }

    #[test]
    fn test_sink_never_drops_below_its_floor() {
        let registry = TaskRegistry::new(60);
        let id = registry.create();
        registry.update(&id, 10, "File validation completed");
        let sink = registry.sink(&id, 10).unwrap();

        let mut seen = Vec::new();
        for percent in [0, 1, 50, 40, 99] {
            sink.report(percent, "Translating...");
            seen.push(registry.progress(&id).unwrap().progress);
        }
        assert_eq!(seen, vec![10, 10, 54, 54, 99]);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let registry = TaskRegistry::new(60);
        let id = registry.create();
        let mut rx = registry.subscribe(&id).unwrap();

        registry.update(&id, 40, "halfway");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().progress, 40);
    }

    #[test]
    fn test_cleanup_expired() {
        let registry = TaskRegistry::new(0);
        registry.create();
        registry.create();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.cleanup_expired(), 2);
        assert_eq!(registry.len(), 0);

        let fresh = TaskRegistry::new(3600);
        fresh.create();
        assert_eq!(fresh.cleanup_expired(), 0);
    }
}
