//! Checkpoint store provider trait for per-page extraction results

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{DocumentKey, PageCheckpoint};

/// Durable per-page result storage
///
/// Implementations:
/// - `MemoryStore`: process memory, lost on restart
/// - `SqliteStore`: SQLite file
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Pages that already have a persisted result
    async fn get_completed_pages(&self, key: &DocumentKey) -> Result<BTreeSet<u32>>;

    /// Persist a page result. Must be durable when this returns `Ok`.
    /// Saving an existing page replaces its result.
    async fn save_page(&self, key: &DocumentKey, page: u32, result: &serde_json::Value)
        -> Result<()>;

    /// Every persisted page, ascending by page number
    async fn load_all_pages(&self, key: &DocumentKey) -> Result<Vec<PageCheckpoint>>;

    /// Remove every persisted page, returning how many were removed
    async fn clear_pages(&self, key: &DocumentKey) -> Result<usize>;
}
