//! extract-queue: serial document extraction with resumable page checkpoints
//!
//! A [`TaskQueue`] admits documents in FIFO order and a single background
//! worker hands them, one at a time, to the registered [`Processor`]. The
//! processor reports page progress, persists each page through a
//! [`CheckpointStore`] and polls for cooperative pause/cancel requests at
//! page boundaries. Every status transition is mirrored into a durable
//! [`StatusStore`], and [`recovery`] repairs documents a crash left
//! `queued` or `processing`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use extract_queue::{QueueConfig, SqliteStore, SubmitRequest, TaskQueue};
//!
//! # async fn run(processor: Arc<dyn extract_queue::Processor>) -> extract_queue::Result<()> {
//! let config = QueueConfig::default();
//! let store = Arc::new(SqliteStore::new(&config.storage.database_path)?);
//! let (queue, _report) = TaskQueue::start(&config, store.clone(), store).await;
//! queue.set_processor(processor);
//!
//! let request = SubmitRequest::new("project-1", "doc-42", "scan.pdf", "pdf", vec![0u8; 16]);
//! let position = queue.submit(request).await;
//! # let _ = position;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod processing;
pub mod providers;
pub mod recovery;
pub mod storage;
pub mod types;

pub use config::{QueueConfig, StorageConfig};
pub use error::{Error, Result};
pub use processing::{
    BatchSnapshot, PageContext, Processor, ProcessorJob, QueueSnapshot, RetryOptions, StopReason,
    SubmitRequest, TaskQueue, TaskSnapshot,
};
pub use providers::{CheckpointStore, MemoryStore, StatusStore};
pub use recovery::{recover_interrupted, RecoveryReport};
pub use storage::SqliteStore;
pub use types::{DocumentKey, DocumentStatus, MergedDocument, PageCheckpoint, StatusEntry};
