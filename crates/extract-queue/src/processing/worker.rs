//! Background worker draining the extraction queue one task at a time

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{DocumentKey, DocumentStatus, MergedDocument};

use super::processor::{PageContext, Processor, ProcessorJob};
use super::task::{StopReason, StopSignal};
use super::task_queue::{QueueEntry, QueueInner};

/// What the processor call produced, before stop flags are considered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// `process` returned `Ok(true)`
    Finished,
    /// `process` returned `Ok(false)`, or never started because a stop was
    /// already requested
    Stopped,
    /// An error or a panic, with the error text
    Failed(String),
}

/// Decide the status a run ends in.
///
/// A finished run is completed regardless of late stop requests. Cancel wins
/// over everything else. A pause only counts when the processor actually
/// stopped; an error keeps its text even if a pause arrived meanwhile. A run
/// that saved at least one page ends `partial` instead of `cancelled` or
/// `failed`.
pub fn resolve_outcome(
    run: &RunResult,
    stop: Option<StopReason>,
    completed_pages: usize,
) -> (DocumentStatus, Option<String>) {
    let failed = |message: String| {
        if completed_pages > 0 {
            (DocumentStatus::Partial, Some(message))
        } else {
            (DocumentStatus::Failed, Some(message))
        }
    };

    match (run, stop) {
        (RunResult::Finished, _) => (DocumentStatus::Completed, None),
        (_, Some(StopReason::Cancel)) if completed_pages > 0 => (
            DocumentStatus::Partial,
            Some(format!("Cancelled after {} pages completed", completed_pages)),
        ),
        (_, Some(StopReason::Cancel)) => (
            DocumentStatus::Cancelled,
            Some("Cancelled by request".to_string()),
        ),
        (RunResult::Stopped, Some(StopReason::Pause)) => (DocumentStatus::Paused, None),
        (RunResult::Stopped, None) => failed("Processor reported failure".to_string()),
        (RunResult::Failed(message), _) => failed(message.clone()),
    }
}

/// A task the worker claimed from the FIFO
struct ClaimedTask {
    key: DocumentKey,
    run_id: Uuid,
    file_name: String,
    file_type: String,
    batch_id: Option<String>,
    payload: bytes::Bytes,
    force_full_restart: bool,
    signal: Arc<StopSignal>,
}

/// Single consumer of the queue
pub(crate) struct ProcessingWorker {
    inner: Arc<QueueInner>,
}

impl ProcessingWorker {
    pub fn new(inner: Arc<QueueInner>) -> Self {
        Self { inner }
    }

    /// Drain the FIFO until shutdown, idling on a bounded poll when empty
    pub async fn run(self) {
        tracing::info!(
            "Extraction worker started (poll interval {:?})",
            self.inner.poll_interval
        );

        while !self.inner.shutdown.load(Ordering::SeqCst) {
            let claimed = {
                let _gate = self.inner.status_gate.lock().await;
                let claimed = self.pop_next();
                if let Some(claimed) = &claimed {
                    self.inner
                        .persist_status(&claimed.key, DocumentStatus::Processing, None)
                        .await;
                }
                claimed
            };

            match claimed {
                Some(claimed) => self.process(claimed).await,
                None => {
                    let _ = timeout(self.inner.poll_interval, self.inner.notify.notified()).await;
                }
            }
        }

        tracing::info!("Extraction worker stopped");
    }

    /// Claim the next waiting task, moving it to `processing`.
    ///
    /// Entries whose task was cancelled, evicted or re-admitted under a newer
    /// run are dropped.
    fn pop_next(&self) -> Option<ClaimedTask> {
        loop {
            let entry = self.inner.fifo.lock().pop_front()?;
            match self.claim(&entry) {
                Some(claimed) => {
                    *self.inner.current.lock() = Some(entry.document_id);
                    return Some(claimed);
                }
                None => {
                    tracing::debug!(
                        "[{}] Skipping stale queue entry for run {}",
                        entry.document_id,
                        entry.run_id
                    );
                }
            }
        }
    }

    fn claim(&self, entry: &QueueEntry) -> Option<ClaimedTask> {
        let mut task = self.inner.tasks.get_mut(&entry.document_id)?;
        if task.run_id != entry.run_id || task.status != DocumentStatus::Queued {
            return None;
        }
        let payload = task.payload.clone()?;

        let force_full_restart = task.force_full_restart;
        if force_full_restart {
            task.progress.completed_pages.clear();
            task.page_timings.clear();
            // A later resume must continue from its own checkpoints.
            task.force_full_restart = false;
        }
        if !task.start(BTreeSet::new()) {
            return None;
        }

        Some(ClaimedTask {
            key: task.key.clone(),
            run_id: task.run_id,
            file_name: task.file_name.clone(),
            file_type: task.file_type.clone(),
            batch_id: task.batch_id.clone(),
            payload,
            force_full_restart,
            signal: Arc::clone(&task.signal),
        })
    }

    async fn process(&self, claimed: ClaimedTask) {
        let document_id = claimed.key.document_id.clone();
        let run_id = claimed.run_id;
        tracing::info!(
            "[{}] Processing {} ({}, run {})",
            document_id,
            claimed.file_name,
            claimed.file_type,
            run_id
        );

        let run = match self.prepare_skip_pages(&claimed).await {
            Ok(skip_pages) => {
                if !skip_pages.is_empty() {
                    tracing::info!(
                        "[{}] Resuming with {} checkpointed pages",
                        document_id,
                        skip_pages.len()
                    );
                }
                self.with_run(&document_id, run_id, |task| {
                    task.progress.completed_pages.extend(skip_pages.iter().copied());
                });
                self.invoke(&claimed, skip_pages).await
            }
            Err(e) => RunResult::Failed(format!("Checkpoint store unavailable: {}", e)),
        };

        let completed_pages = self
            .inner
            .tasks
            .get(&document_id)
            .filter(|t| t.run_id == run_id)
            .map_or(0, |t| t.progress.completed_count());

        let (mut status, mut error) = resolve_outcome(&run, claimed.signal.check(), completed_pages);

        if status == DocumentStatus::Completed {
            if let Err(e) = self.finalize(&claimed.key).await {
                tracing::error!("[{}] Finalize failed: {}", document_id, e);
                status = DocumentStatus::Partial;
                error = Some(format!("Finalize failed: {}", e));
            }
        }

        let gate = self.inner.status_gate.lock().await;
        let applied = self.with_run(&document_id, run_id, |task| {
            task.finish(status, error.clone())
        });
        *self.inner.current.lock() = None;

        if applied != Some(true) {
            tracing::warn!(
                "[{}] Run {} ended as {} but the task moved on; result dropped",
                document_id,
                run_id,
                status
            );
            return;
        }

        self.inner
            .persist_status(&claimed.key, status, error.as_deref())
            .await;
        drop(gate);

        match status {
            DocumentStatus::Completed => {
                tracing::info!("[{}] Completed ({} pages)", document_id, completed_pages)
            }
            DocumentStatus::Paused => {
                tracing::info!("[{}] Paused after {} pages", document_id, completed_pages)
            }
            DocumentStatus::Cancelled => tracing::info!("[{}] Cancelled", document_id),
            _ => tracing::warn!(
                "[{}] Ended {}: {}",
                document_id,
                status,
                error.as_deref().unwrap_or("no error recorded")
            ),
        }
    }

    /// Apply a forced restart, then read the pages the processor must skip
    async fn prepare_skip_pages(&self, claimed: &ClaimedTask) -> Result<BTreeSet<u32>> {
        if claimed.force_full_restart {
            let cleared = self.inner.checkpoints.clear_pages(&claimed.key).await?;
            tracing::info!(
                "[{}] Forced full restart, cleared {} checkpointed pages",
                claimed.key.document_id,
                cleared
            );
        }
        self.inner.checkpoints.get_completed_pages(&claimed.key).await
    }

    /// Run the processor in its own task so a panic cannot take the worker down
    async fn invoke(&self, claimed: &ClaimedTask, skip_pages: BTreeSet<u32>) -> RunResult {
        if claimed.signal.check().is_some() {
            return RunResult::Stopped;
        }

        let processor: Option<Arc<dyn Processor>> = self.inner.processor.read().clone();
        let Some(processor) = processor else {
            return RunResult::Failed("No processor registered".to_string());
        };

        let job = ProcessorJob {
            key: claimed.key.clone(),
            run_id: claimed.run_id,
            file_name: claimed.file_name.clone(),
            file_type: claimed.file_type.clone(),
            batch_id: claimed.batch_id.clone(),
            payload: claimed.payload.clone(),
            skip_pages,
        };
        let ctx = PageContext::new(
            claimed.key.clone(),
            claimed.run_id,
            Arc::clone(&claimed.signal),
            Arc::clone(&self.inner.tasks),
            Arc::clone(&self.inner.checkpoints),
        );

        let handle = tokio::spawn(async move { processor.process(job, ctx).await });
        match handle.await {
            Ok(Ok(true)) => RunResult::Finished,
            Ok(Ok(false)) => RunResult::Stopped,
            Ok(Err(e)) => RunResult::Failed(e.to_string()),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!("[{}] Processor panicked: {}", claimed.key.document_id, message);
                RunResult::Failed(format!("Processor panicked: {}", message))
            }
            Err(e) => RunResult::Failed(format!("Processor task aborted: {}", e)),
        }
    }

    /// Rebuild the output from every checkpoint and hand it to the processor
    async fn finalize(&self, key: &DocumentKey) -> Result<()> {
        let pages = self.inner.checkpoints.load_all_pages(key).await?;
        let merged = MergedDocument::from_checkpoints(key.clone(), pages);
        let gaps = merged.gaps();
        if !gaps.is_empty() {
            tracing::warn!("[{}] Merged output is missing pages {:?}", key.document_id, gaps);
        }

        let processor: Option<Arc<dyn Processor>> = self.inner.processor.read().clone();
        match processor {
            Some(processor) => processor.finalize(merged).await,
            None => Ok(()),
        }
    }

    /// Update the task only while it still belongs to `run_id`
    fn with_run<T>(
        &self,
        document_id: &str,
        run_id: Uuid,
        update: impl FnOnce(&mut super::task::Task) -> T,
    ) -> Option<T> {
        let mut task = self.inner.tasks.get_mut(document_id)?;
        if task.run_id != run_id {
            return None;
        }
        Some(update(task.value_mut()))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_run_completes() {
        let (status, error) = resolve_outcome(&RunResult::Finished, None, 5);
        assert_eq!(status, DocumentStatus::Completed);
        assert!(error.is_none());

        let (status, _) = resolve_outcome(&RunResult::Finished, Some(StopReason::Cancel), 5);
        assert_eq!(status, DocumentStatus::Completed);
    }

    #[test]
    fn test_cancel_outcomes() {
        let (status, error) = resolve_outcome(&RunResult::Stopped, Some(StopReason::Cancel), 0);
        assert_eq!(status, DocumentStatus::Cancelled);
        assert_eq!(error.as_deref(), Some("Cancelled by request"));

        let (status, error) = resolve_outcome(&RunResult::Stopped, Some(StopReason::Cancel), 2);
        assert_eq!(status, DocumentStatus::Partial);
        assert_eq!(error.as_deref(), Some("Cancelled after 2 pages completed"));
    }

    #[test]
    fn test_pause_outcome() {
        let (status, error) = resolve_outcome(&RunResult::Stopped, Some(StopReason::Pause), 3);
        assert_eq!(status, DocumentStatus::Paused);
        assert!(error.is_none());
    }

    #[test]
    fn test_error_wins_over_late_pause() {
        let failed = RunResult::Failed("page 4 unreadable".to_string());
        let (status, error) = resolve_outcome(&failed, Some(StopReason::Pause), 3);
        assert_eq!(status, DocumentStatus::Partial);
        assert_eq!(error.as_deref(), Some("page 4 unreadable"));

        let (status, error) = resolve_outcome(&failed, Some(StopReason::Pause), 0);
        assert_eq!(status, DocumentStatus::Failed);
        assert_eq!(error.as_deref(), Some("page 4 unreadable"));
    }

    #[test]
    fn test_stop_without_request_is_failure() {
        let (status, error) = resolve_outcome(&RunResult::Stopped, None, 0);
        assert_eq!(status, DocumentStatus::Failed);
        assert_eq!(error.as_deref(), Some("Processor reported failure"));

        let (status, _) = resolve_outcome(&RunResult::Stopped, None, 2);
        assert_eq!(status, DocumentStatus::Partial);
    }

    #[test]
    fn test_failure_outcomes() {
        let failed = RunResult::Failed("OCR engine crashed".to_string());
        let (status, error) = resolve_outcome(&failed, None, 0);
        assert_eq!(status, DocumentStatus::Failed);
        assert_eq!(error.as_deref(), Some("OCR engine crashed"));

        let (status, error) = resolve_outcome(&failed, None, 1);
        assert_eq!(status, DocumentStatus::Partial);
        assert_eq!(error.as_deref(), Some("OCR engine crashed"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }
}
