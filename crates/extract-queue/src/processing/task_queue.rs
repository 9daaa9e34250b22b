//! Task queue for serial document extraction
//!
//! Admission is FIFO. A single worker drains the queue, so at most one task
//! is `processing` at any time. Every status transition is written through to
//! the durable [`StatusStore`]; the in-memory registry is a cache of it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::providers::{CheckpointStore, StatusStore};
use crate::recovery::{run_startup_recovery, RecoveryReport};
use crate::types::{DocumentKey, DocumentStatus, MergedDocument};

use super::batch::BatchSnapshot;
use super::processor::Processor;
use super::task::{PageTiming, SubmitRequest, Task, TaskProgress};
use super::worker::ProcessingWorker;

/// Point-in-time view of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub document_id: String,
    pub project_id: String,
    pub file_name: String,
    pub file_type: String,
    pub batch_id: Option<String>,
    pub status: DocumentStatus,
    /// 0 while processing, 1-based FIFO position while queued
    pub position: Option<usize>,
    pub error: Option<String>,
    /// Size of the retained payload; 0 once the task reached a terminal status
    pub payload_bytes: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub progress: TaskProgress,
    pub page_timings: BTreeMap<u32, PageTiming>,
}

/// The task currently held by the worker
#[derive(Debug, Clone, Serialize)]
pub struct CurrentTask {
    pub document_id: String,
    pub file_name: String,
    pub current_page: u32,
    pub total_pages: u32,
    pub completed_pages: usize,
}

/// Queue-wide view
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub running: bool,
    pub pending_count: usize,
    pub current_task: Option<CurrentTask>,
}

/// Options for an explicit retry
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOptions {
    /// Discard every checkpoint instead of resuming from them
    pub force_full_restart: bool,
}

/// FIFO entry; the run id ties it to one admission of the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub document_id: String,
    pub run_id: Uuid,
}

/// State shared between the queue handle and its worker
pub(crate) struct QueueInner {
    pub tasks: Arc<DashMap<String, Task>>,
    pub fifo: Mutex<VecDeque<QueueEntry>>,
    pub current: Mutex<Option<String>>,
    pub notify: Notify,
    pub processor: RwLock<Option<Arc<dyn Processor>>>,
    /// Held across a registry transition and its durable write, so durable
    /// writes land in transition order
    pub status_gate: tokio::sync::Mutex<()>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub statuses: Arc<dyn StatusStore>,
    pub poll_interval: Duration,
    pub worker_started: AtomicBool,
    pub shutdown: AtomicBool,
    pub worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueInner {
    /// Mirror a transition into the durable status record.
    ///
    /// A failed write is logged; the in-memory transition stands.
    pub async fn persist_status(
        &self,
        key: &DocumentKey,
        status: DocumentStatus,
        error: Option<&str>,
    ) {
        if let Err(e) = self.statuses.write_status(key, status, error).await {
            tracing::error!("Failed to persist status {} for {}: {}", status, key, e);
        }
    }

    fn enqueue(&self, document_id: String, run_id: Uuid) {
        self.fifo.lock().push_back(QueueEntry { document_id, run_id });
        self.notify.notify_one();
    }

    fn position_of(&self, document_id: &str) -> Option<usize> {
        let (status, run_id) = {
            let task = self.tasks.get(document_id)?;
            (task.status, task.run_id)
        };

        match status {
            DocumentStatus::Processing => Some(0),
            DocumentStatus::Queued => {
                let entries = self.pending_entries();
                entries
                    .iter()
                    .filter(|entry| self.is_waiting(entry))
                    .position(|entry| entry.run_id == run_id)
                    .map(|index| index + 1)
            }
            _ => None,
        }
    }

    /// Copy of the FIFO, so registry lookups never run under the FIFO lock
    fn pending_entries(&self) -> Vec<QueueEntry> {
        self.fifo.lock().iter().cloned().collect()
    }

    /// The entry still refers to a queued run of its document
    fn is_waiting(&self, entry: &QueueEntry) -> bool {
        self.tasks
            .get(&entry.document_id)
            .map(|t| t.run_id == entry.run_id && t.status == DocumentStatus::Queued)
            .unwrap_or(false)
    }
}

/// Serial extraction queue.
///
/// Cheap to clone; clones share the registry, the FIFO and the worker.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue over the given collaborators
    pub fn new(
        config: &QueueConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        statuses: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Arc::new(DashMap::new()),
                fifo: Mutex::new(VecDeque::new()),
                current: Mutex::new(None),
                notify: Notify::new(),
                processor: RwLock::new(None),
                status_gate: tokio::sync::Mutex::new(()),
                checkpoints,
                statuses,
                poll_interval: config.poll_interval(),
                worker_started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                worker_handle: Mutex::new(None),
            }),
        }
    }

    /// Create a queue, running the interrupted-document scan first when
    /// `config.recover_on_startup` is set. A failed scan is logged and does
    /// not prevent startup.
    pub async fn start(
        config: &QueueConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        statuses: Arc<dyn StatusStore>,
    ) -> (Self, Option<RecoveryReport>) {
        let report = if config.recover_on_startup {
            run_startup_recovery(statuses.as_ref(), checkpoints.as_ref()).await
        } else {
            None
        };
        (Self::new(config, checkpoints, statuses), report)
    }

    /// Register the extraction engine. There is one per queue; registering
    /// again replaces the previous one for subsequent tasks.
    pub fn set_processor(&self, processor: Arc<dyn Processor>) {
        let mut slot = self.inner.processor.write();
        if slot.is_some() {
            tracing::warn!("Replacing the registered processor");
        }
        *slot = Some(processor);
    }

    /// Builder-style processor registration
    pub fn with_processor(self, processor: Arc<dyn Processor>) -> Self {
        self.set_processor(processor);
        self
    }

    /// Admit a document.
    ///
    /// Returns its position (0 = processing). Resubmitting a queued or
    /// processing document is a no-op returning the existing position. A
    /// paused document is not re-admitted (`None`); use
    /// [`request_resume`](Self::request_resume). A document whose previous
    /// run ended gets a fresh task.
    pub async fn submit(&self, request: SubmitRequest) -> Option<usize> {
        let document_id = request.document_id().to_string();
        let gate = self.inner.status_gate.lock().await;

        let admitted = {
            match self.inner.tasks.entry(document_id.clone()) {
                Entry::Occupied(mut entry) => {
                    let status = entry.get().status;
                    if status == DocumentStatus::Paused {
                        tracing::warn!(
                            "[{}] Submit ignored: document is paused, resume it instead",
                            document_id
                        );
                        return None;
                    }
                    if status.is_live() {
                        None
                    } else {
                        let task = Task::new(request);
                        let admitted = (task.key.clone(), task.run_id);
                        entry.insert(task);
                        Some(admitted)
                    }
                }
                Entry::Vacant(entry) => {
                    let task = Task::new(request);
                    let admitted = (task.key.clone(), task.run_id);
                    entry.insert(task);
                    Some(admitted)
                }
            }
        };

        match admitted {
            Some((key, run_id)) => {
                self.inner
                    .persist_status(&key, DocumentStatus::Queued, None)
                    .await;
                self.inner.enqueue(document_id.clone(), run_id);
                drop(gate);
                self.ensure_worker();
                let position = self.inner.position_of(&document_id);
                tracing::info!(
                    "[{}] Queued (run {}, position {:?})",
                    document_id,
                    run_id,
                    position
                );
                position
            }
            None => {
                let position = self.inner.position_of(&document_id);
                tracing::debug!(
                    "[{}] Already admitted, position {:?}",
                    document_id,
                    position
                );
                position
            }
        }
    }

    /// Explicit retry of a document whose last run ended (or that startup
    /// recovery reset to `pending`).
    ///
    /// When the registry no longer knows the document (e.g. after a restart)
    /// the durable status decides eligibility. Checkpoints are reused unless
    /// `options.force_full_restart` is set.
    pub async fn retry(&self, request: SubmitRequest, options: RetryOptions) -> Option<usize> {
        let document_id = request.document_id().to_string();

        let live_status = self.inner.tasks.get(&document_id).map(|t| t.status);
        let status = match live_status {
            Some(status) => Some(status),
            None => match self.inner.statuses.read_status(&request.key).await {
                Ok(entry) => entry.map(|e| e.status),
                Err(e) => {
                    tracing::error!("[{}] Retry rejected, status unreadable: {}", document_id, e);
                    return None;
                }
            },
        };

        match status {
            Some(status) if status.is_retryable() => {
                tracing::info!(
                    "[{}] Retrying from {} (force_full_restart: {})",
                    document_id,
                    status,
                    options.force_full_restart
                );
                let force = request.force_full_restart || options.force_full_restart;
                self.submit(request.with_force_full_restart(force)).await
            }
            Some(status) => {
                tracing::warn!("[{}] Cannot retry document in status {}", document_id, status);
                None
            }
            None => {
                tracing::warn!("[{}] Cannot retry unknown document", document_id);
                None
            }
        }
    }

    /// Request cancellation.
    ///
    /// Queued and paused tasks are cancelled immediately; a processing task
    /// is flagged and stops at its next page boundary. Any other state
    /// returns `false`.
    pub async fn request_cancel(&self, document_id: &str) -> bool {
        let _gate = self.inner.status_gate.lock().await;
        let cancelled = {
            let Some(mut task) = self.inner.tasks.get_mut(document_id) else {
                return false;
            };
            match task.status {
                DocumentStatus::Queued | DocumentStatus::Paused => {
                    let run_id = task.run_id;
                    task.finish(DocumentStatus::Cancelled, Some("Cancelled by request".to_string()));
                    (task.key.clone(), run_id)
                }
                DocumentStatus::Processing => {
                    task.signal.request_cancel();
                    tracing::info!(
                        "[{}] Cancel requested, honored at next page boundary",
                        document_id
                    );
                    return true;
                }
                _ => return false,
            }
        };

        let (key, run_id) = cancelled;
        self.inner
            .fifo
            .lock()
            .retain(|entry| !(entry.document_id == document_id && entry.run_id == run_id));
        self.inner
            .persist_status(&key, DocumentStatus::Cancelled, Some("Cancelled by request"))
            .await;
        tracing::info!("[{}] Cancelled before processing", document_id);
        true
    }

    /// Request a pause of the processing task at its next page boundary
    pub fn request_pause(&self, document_id: &str) -> bool {
        let Some(task) = self.inner.tasks.get(document_id) else {
            return false;
        };
        if task.status != DocumentStatus::Processing {
            return false;
        }
        task.signal.request_pause();
        tracing::info!("[{}] Pause requested, honored at next page boundary", document_id);
        true
    }

    /// Re-admit a paused task at the back of the FIFO
    pub async fn request_resume(&self, document_id: &str) -> bool {
        let gate = self.inner.status_gate.lock().await;
        let resumed = {
            let Some(mut task) = self.inner.tasks.get_mut(document_id) else {
                return false;
            };
            if !task.requeue_after_pause() {
                return false;
            }
            (task.key.clone(), task.run_id)
        };

        let (key, run_id) = resumed;
        self.inner
            .persist_status(&key, DocumentStatus::Queued, None)
            .await;
        self.inner.enqueue(document_id.to_string(), run_id);
        drop(gate);
        self.ensure_worker();
        tracing::info!("[{}] Resumed, re-queued as run {}", document_id, run_id);
        true
    }

    /// Position of a live document (0 = processing)
    pub fn position(&self, document_id: &str) -> Option<usize> {
        self.inner.position_of(document_id)
    }

    /// Snapshot of one task, if the registry knows it
    pub fn task_status(&self, document_id: &str) -> Option<TaskSnapshot> {
        let position = self.inner.position_of(document_id);
        let task = self.inner.tasks.get(document_id)?;
        Some(TaskSnapshot {
            document_id: task.key.document_id.clone(),
            project_id: task.key.project_id.clone(),
            file_name: task.file_name.clone(),
            file_type: task.file_type.clone(),
            batch_id: task.batch_id.clone(),
            status: task.status,
            position,
            error: task.error.clone(),
            payload_bytes: task.payload.as_ref().map_or(0, |p| p.len()),
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
            progress: task.progress.clone(),
            page_timings: task.page_timings.clone(),
        })
    }

    /// Queue-wide snapshot
    pub fn snapshot(&self) -> QueueSnapshot {
        let pending_count = {
            let entries = self.inner.pending_entries();
            entries.iter().filter(|e| self.inner.is_waiting(e)).count()
        };

        let current_id = self.inner.current.lock().clone();
        let current_task = current_id.and_then(|id| {
            let task = self.inner.tasks.get(&id)?;
            Some(CurrentTask {
                document_id: id.clone(),
                file_name: task.file_name.clone(),
                current_page: task.progress.current_page,
                total_pages: task.progress.total_pages,
                completed_pages: task.progress.completed_count(),
            })
        });

        QueueSnapshot {
            running: self.is_running(),
            pending_count,
            current_task,
        }
    }

    /// Aggregate of every task labelled `batch_id`
    pub fn batch_status(&self, batch_id: &str) -> Option<BatchSnapshot> {
        let tasks: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .filter(|t| t.batch_id.as_deref() == Some(batch_id))
            .map(|t| t.value().clone())
            .collect();
        BatchSnapshot::from_tasks(batch_id, &tasks)
    }

    /// Snapshots of every known task
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let ids: Vec<String> = self.inner.tasks.iter().map(|t| t.key().clone()).collect();
        let mut snapshots: Vec<TaskSnapshot> =
            ids.iter().filter_map(|id| self.task_status(id)).collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Rebuild a document's output from every persisted checkpoint
    pub async fn merged_output(&self, key: &DocumentKey) -> Result<MergedDocument> {
        let pages = self.inner.checkpoints.load_all_pages(key).await?;
        Ok(MergedDocument::from_checkpoints(key.clone(), pages))
    }

    /// Page numbers already checkpointed for a document
    pub async fn completed_pages(&self, key: &DocumentKey) -> Result<BTreeSet<u32>> {
        self.inner.checkpoints.get_completed_pages(key).await
    }

    /// Remove terminal tasks that finished before `now - older_than`.
    ///
    /// Never runs on its own; returns how many entries were removed.
    pub fn evict_finished(&self, older_than: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - older_than;
        let before = self.inner.tasks.len();
        self.inner.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.finished_at.map_or(false, |at| at < cutoff))
        });
        let evicted = before.saturating_sub(self.inner.tasks.len());
        if evicted > 0 {
            tracing::info!("Evicted {} finished tasks from the registry", evicted);
        }
        evicted
    }

    /// Whether the worker is alive
    pub fn is_running(&self) -> bool {
        self.inner.worker_started.load(Ordering::SeqCst)
            && !self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the worker after its current task and wait for it to exit.
    ///
    /// An in-flight processor call is never interrupted.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self.inner.worker_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Worker exited abnormally: {}", e);
            }
        }
    }

    /// Start the worker on first use
    fn ensure_worker(&self) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            tracing::warn!("Queue is shut down; submitted work will not be processed");
            return;
        }
        if self
            .inner
            .worker_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let worker = ProcessingWorker::new(Arc::clone(&self.inner));
            let handle = tokio::spawn(worker.run());
            *self.inner.worker_handle.lock() = Some(handle);
        }
    }
}
