//! In-memory implementation of both collaborator ports

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::types::{DocumentKey, DocumentStatus, PageCheckpoint, StatusEntry};

use super::{CheckpointStore, StatusStore};

/// DashMap-backed checkpoint and status storage
#[derive(Default)]
pub struct MemoryStore {
    pages: DashMap<DocumentKey, BTreeMap<u32, PageCheckpoint>>,
    statuses: DashMap<DocumentKey, StatusEntry>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise storage error paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage("memory store is rejecting writes"));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_completed_pages(&self, key: &DocumentKey) -> Result<BTreeSet<u32>> {
        Ok(self
            .pages
            .get(key)
            .map(|pages| pages.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn save_page(
        &self,
        key: &DocumentKey,
        page: u32,
        result: &serde_json::Value,
    ) -> Result<()> {
        self.check_writable()?;
        let checkpoint = PageCheckpoint {
            page,
            result: result.clone(),
            saved_at: Utc::now(),
        };
        self.pages
            .entry(key.clone())
            .or_default()
            .insert(page, checkpoint);
        Ok(())
    }

    async fn load_all_pages(&self, key: &DocumentKey) -> Result<Vec<PageCheckpoint>> {
        Ok(self
            .pages
            .get(key)
            .map(|pages| pages.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_pages(&self, key: &DocumentKey) -> Result<usize> {
        self.check_writable()?;
        Ok(self
            .pages
            .remove(key)
            .map(|(_, pages)| pages.len())
            .unwrap_or(0))
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn read_status(&self, key: &DocumentKey) -> Result<Option<StatusEntry>> {
        Ok(self.statuses.get(key).map(|e| e.value().clone()))
    }

    async fn write_status(
        &self,
        key: &DocumentKey,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        self.statuses.insert(
            key.clone(),
            StatusEntry {
                key: key.clone(),
                status,
                error: error.map(String::from),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[DocumentStatus]) -> Result<Vec<StatusEntry>> {
        let mut entries: Vec<StatusEntry> = self
            .statuses
            .iter()
            .filter(|e| statuses.contains(&e.status))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pages_round_trip_in_order() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("proj", "doc");

        store.save_page(&key, 2, &json!("two")).await.unwrap();
        store.save_page(&key, 1, &json!("one")).await.unwrap();
        store.save_page(&key, 2, &json!("two again")).await.unwrap();

        let completed = store.get_completed_pages(&key).await.unwrap();
        assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec![1, 2]);

        let pages = store.load_all_pages(&key).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].result, json!("one"));
        assert_eq!(pages[1].result, json!("two again"));

        assert_eq!(store.clear_pages(&key).await.unwrap(), 2);
        assert!(store.get_completed_pages(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_listing_filters() {
        let store = MemoryStore::new();
        let a = DocumentKey::new("proj", "a");
        let b = DocumentKey::new("proj", "b");

        store.write_status(&a, DocumentStatus::Processing, None).await.unwrap();
        store.write_status(&b, DocumentStatus::Completed, None).await.unwrap();

        let stuck = store
            .list_by_status(&[DocumentStatus::Processing, DocumentStatus::Queued])
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].key, a);
    }

    #[tokio::test]
    async fn test_rejected_writes() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("proj", "doc");
        store.set_fail_writes(true);
        assert!(store.save_page(&key, 1, &json!(null)).await.is_err());
        assert!(store.get_completed_pages(&key).await.unwrap().is_empty());
    }
}
