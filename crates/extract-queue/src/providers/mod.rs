//! Collaborator ports consumed by the queue
//!
//! - `CheckpointStore`: durable per-page results keyed by (project, document, page)
//! - `StatusStore`: durable per-document status surfaced to the rest of the system
//!
//! `MemoryStore` implements both for tests and non-durable embedders;
//! `crate::storage::SqliteStore` is the durable implementation.

pub mod checkpoint_store;
pub mod memory;
pub mod status_store;

pub use checkpoint_store::CheckpointStore;
pub use memory::MemoryStore;
pub use status_store::StatusStore;
