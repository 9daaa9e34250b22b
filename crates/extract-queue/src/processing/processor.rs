//! Processor contract: the extraction engine as seen by the worker

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::providers::CheckpointStore;
use crate::types::{DocumentKey, MergedDocument};

use super::task::{StopReason, StopSignal, Task};

/// Everything the processor needs to extract one document
#[derive(Debug, Clone)]
pub struct ProcessorJob {
    pub key: DocumentKey,
    pub run_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub batch_id: Option<String>,
    pub payload: Bytes,
    /// Pages already checkpointed by an earlier run; the processor must not
    /// extract them again
    pub skip_pages: BTreeSet<u32>,
}

impl ProcessorJob {
    pub fn document_id(&self) -> &str {
        &self.key.document_id
    }

    pub fn should_skip(&self, page: u32) -> bool {
        self.skip_pages.contains(&page)
    }
}

/// The extraction engine.
///
/// `process` returns `Ok(true)` when every page was extracted. Returning
/// `Ok(false)`, an error, or panicking all count as failure. The processor
/// should poll [`PageContext::should_stop`] between pages and return early
/// when it reports a stop request; nothing interrupts it otherwise.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: ProcessorJob, ctx: PageContext) -> Result<bool>;

    /// Receives the output rebuilt from every checkpoint after a completed run
    async fn finalize(&self, _merged: MergedDocument) -> Result<()> {
        Ok(())
    }
}

/// Callbacks injected into a processor run.
///
/// Updates are tied to the run that created the context; a stale context
/// cannot touch a newer run of the same document.
#[derive(Clone)]
pub struct PageContext {
    key: DocumentKey,
    run_id: Uuid,
    signal: Arc<StopSignal>,
    tasks: Arc<DashMap<String, Task>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl PageContext {
    pub(crate) fn new(
        key: DocumentKey,
        run_id: Uuid,
        signal: Arc<StopSignal>,
        tasks: Arc<DashMap<String, Task>>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            key,
            run_id,
            signal,
            tasks,
            checkpoints,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Live progress for polling callers: `current` of `total` pages
    pub fn report_progress(&self, current: u32, total: u32) {
        self.with_task(|task| task.record_page_started(current, total));
    }

    /// Durably persist one page result, then mark the page complete.
    ///
    /// The page only counts as completed once the checkpoint store accepted
    /// it; a storage error is returned to the processor unchanged.
    pub async fn complete_page(&self, page: u32, result: serde_json::Value) -> Result<()> {
        self.checkpoints.save_page(&self.key, page, &result).await?;
        self.with_task(|task| task.record_page_completed(page));
        tracing::debug!("[{}] Page {} checkpointed", self.key.document_id, page);
        Ok(())
    }

    /// Stop request to honor at the next page boundary
    pub fn should_stop(&self) -> Option<StopReason> {
        self.signal.check()
    }

    fn with_task(&self, update: impl FnOnce(&mut Task)) {
        if let Some(mut task) = self.tasks.get_mut(&self.key.document_id) {
            if task.run_id == self.run_id {
                update(task.value_mut());
            }
        }
    }
}
