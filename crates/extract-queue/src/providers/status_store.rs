//! Status store provider trait for the durable per-document status record

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentKey, DocumentStatus, StatusEntry};

/// Durable per-document status field
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read the status of one document
    async fn read_status(&self, key: &DocumentKey) -> Result<Option<StatusEntry>>;

    /// Overwrite the status (and error text) of one document
    async fn write_status(
        &self,
        key: &DocumentKey,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Every document currently in one of `statuses`
    async fn list_by_status(&self, statuses: &[DocumentStatus]) -> Result<Vec<StatusEntry>>;
}
