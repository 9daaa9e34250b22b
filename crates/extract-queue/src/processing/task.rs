//! In-memory task model: status, progress, per-page timings and control flags

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{DocumentKey, DocumentStatus};

/// Why a processor should stop at the next page boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Pause,
    Cancel,
}

/// Cooperative stop flags shared between callers and the running processor.
///
/// Flags only go from `false` to `true` within one run; they are reset when a
/// paused task is resumed.
#[derive(Debug, Default)]
pub struct StopSignal {
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    /// Current stop request; cancel wins over pause
    pub fn check(&self) -> Option<StopReason> {
        if self.cancel_requested() {
            Some(StopReason::Cancel)
        } else if self.pause_requested() {
            Some(StopReason::Pause)
        } else {
            None
        }
    }

    fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.pause_requested.store(false, Ordering::SeqCst);
    }
}

/// Live page progress of a task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    pub total_pages: u32,
    pub current_page: u32,
    pub completed_pages: BTreeSet<u32>,
}

impl TaskProgress {
    pub fn completed_count(&self) -> usize {
        self.completed_pages.len()
    }

    /// Page a resumed run starts from
    pub fn resume_page(&self) -> u32 {
        self.completed_pages.last().map_or(1, |last| last + 1)
    }
}

/// Observability-only timing of one page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageTiming {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Request to admit a document into the queue
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub key: DocumentKey,
    pub file_name: String,
    pub file_type: String,
    pub payload: Bytes,
    pub batch_id: Option<String>,
    pub force_full_restart: bool,
}

impl SubmitRequest {
    /// Creates a request with the required fields
    pub fn new(
        project_id: impl Into<String>,
        document_id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: DocumentKey::new(project_id, document_id),
            file_name: file_name.into(),
            file_type: file_type.into(),
            payload: payload.into(),
            batch_id: None,
            force_full_restart: false,
        }
    }

    /// Groups the document under a caller-defined batch label
    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Discards every checkpoint of the document before extraction starts
    pub fn with_force_full_restart(mut self, force: bool) -> Self {
        self.force_full_restart = force;
        self
    }

    pub fn document_id(&self) -> &str {
        &self.key.document_id
    }
}

/// Admitted unit of extraction work for one document
#[derive(Debug, Clone)]
pub struct Task {
    /// Fresh for every admission and every resume
    pub run_id: Uuid,
    pub key: DocumentKey,
    pub file_name: String,
    pub file_type: String,
    pub batch_id: Option<String>,
    /// Dropped as soon as the task reaches a terminal status
    pub payload: Option<Bytes>,
    pub force_full_restart: bool,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub signal: Arc<StopSignal>,
    pub progress: TaskProgress,
    pub page_timings: BTreeMap<u32, PageTiming>,
}

impl Task {
    /// Create a queued task from a submission
    pub fn new(request: SubmitRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            key: request.key,
            file_name: request.file_name,
            file_type: request.file_type,
            batch_id: request.batch_id,
            payload: Some(request.payload),
            force_full_restart: request.force_full_restart,
            status: DocumentStatus::Queued,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            signal: Arc::new(StopSignal::new()),
            progress: TaskProgress::default(),
            page_timings: BTreeMap::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.key.document_id
    }

    /// Apply a state-machine transition; returns `false` if it is not allowed
    pub fn transition(&mut self, to: DocumentStatus) -> bool {
        if !is_valid_transition(self.status, to) {
            return false;
        }
        self.status = to;
        true
    }

    /// Queued → processing, seeding progress with pages carried over from checkpoints
    pub fn start(&mut self, carried_over: BTreeSet<u32>) -> bool {
        if !self.transition(DocumentStatus::Processing) {
            return false;
        }
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
        self.progress.current_page = 0;
        self.progress.completed_pages.extend(carried_over);
        true
    }

    /// Move to a status that ends the current run
    pub fn finish(&mut self, status: DocumentStatus, error: Option<String>) -> bool {
        if !self.transition(status) {
            return false;
        }
        self.error = error;
        self.finished_at = Some(Utc::now());
        if status.is_terminal() {
            self.payload = None;
        }
        true
    }

    /// Paused → queued with cleared flags and a new run id
    pub fn requeue_after_pause(&mut self) -> bool {
        if self.status != DocumentStatus::Paused || !self.transition(DocumentStatus::Queued) {
            return false;
        }
        self.signal.reset();
        self.run_id = Uuid::new_v4();
        self.finished_at = None;
        self.error = None;
        true
    }

    pub fn record_page_started(&mut self, page: u32, total: u32) {
        self.progress.current_page = page;
        self.progress.total_pages = total;
        if !self.progress.completed_pages.contains(&page) {
            self.page_timings.entry(page).or_insert_with(|| PageTiming {
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
            });
        }
    }

    pub fn record_page_completed(&mut self, page: u32) {
        let now = Utc::now();
        self.progress.completed_pages.insert(page);
        let timing = self.page_timings.entry(page).or_insert_with(|| PageTiming {
            started_at: now,
            completed_at: None,
            duration_ms: None,
        });
        timing.completed_at = Some(now);
        timing.duration_ms = u64::try_from((now - timing.started_at).num_milliseconds()).ok();
    }
}

/// The task state machine.
///
/// Re-entering `queued` from a terminal or pending state is an explicit retry.
pub fn is_valid_transition(from: DocumentStatus, to: DocumentStatus) -> bool {
    use DocumentStatus::*;
    match (from, to) {
        (Queued, Processing) | (Queued, Cancelled) => true,
        (Processing, Completed)
        | (Processing, Failed)
        | (Processing, Paused)
        | (Processing, Cancelled)
        | (Processing, Partial) => true,
        (Paused, Queued) | (Paused, Cancelled) => true,
        (Partial, Queued)
        | (Failed, Queued)
        | (Cancelled, Queued)
        | (Completed, Queued)
        | (Pending, Queued) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_task() -> Task {
        Task::new(SubmitRequest::new("proj", "doc", "doc.pdf", "pdf", vec![1u8, 2, 3]))
    }

    #[test]
    fn test_stop_signal_priority() {
        let signal = StopSignal::new();
        assert_eq!(signal.check(), None);
        signal.request_pause();
        assert_eq!(signal.check(), Some(StopReason::Pause));
        signal.request_cancel();
        assert_eq!(signal.check(), Some(StopReason::Cancel));
    }

    #[test]
    fn test_state_machine() {
        use DocumentStatus::*;
        assert!(is_valid_transition(Queued, Processing));
        assert!(is_valid_transition(Processing, Partial));
        assert!(is_valid_transition(Paused, Queued));
        assert!(is_valid_transition(Failed, Queued));
        assert!(!is_valid_transition(Completed, Cancelled));
        assert!(!is_valid_transition(Queued, Paused));
        assert!(!is_valid_transition(Paused, Processing));
        assert!(!is_valid_transition(Processing, Queued));
    }

    #[test]
    fn test_terminal_finish_drops_payload() {
        let mut task = queued_task();
        assert!(task.start(BTreeSet::new()));
        assert!(task.finish(DocumentStatus::Completed, None));
        assert!(task.payload.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_pause_keeps_payload_and_resume_resets_flags() {
        let mut task = queued_task();
        let first_run = task.run_id;
        task.start(BTreeSet::new());
        task.signal.request_pause();
        assert!(task.finish(DocumentStatus::Paused, None));
        assert!(task.payload.is_some());

        assert!(task.requeue_after_pause());
        assert_eq!(task.status, DocumentStatus::Queued);
        assert_eq!(task.signal.check(), None);
        assert_ne!(task.run_id, first_run);
    }

    #[test]
    fn test_progress_and_timings() {
        let mut task = queued_task();
        task.start([1, 2].into_iter().collect());
        assert_eq!(task.progress.resume_page(), 3);

        task.record_page_started(3, 5);
        assert!(task.page_timings.contains_key(&3));
        task.record_page_completed(3);

        assert_eq!(task.progress.completed_count(), 3);
        assert_eq!(task.progress.current_page, 3);
        assert_eq!(task.progress.total_pages, 5);
        let timing = &task.page_timings[&3];
        assert!(timing.completed_at.is_some());
        assert!(timing.duration_ms.is_some());
        assert!(!task.page_timings.contains_key(&1));
    }

    #[test]
    fn test_invalid_finish_is_rejected() {
        let mut task = queued_task();
        assert!(!task.finish(DocumentStatus::Completed, None));
        assert_eq!(task.status, DocumentStatus::Queued);
        assert!(task.payload.is_some());
    }
}
