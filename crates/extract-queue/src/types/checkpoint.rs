//! Page checkpoint types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DocumentKey;

/// A durably persisted extraction result for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCheckpoint {
    /// 1-based page number
    pub page: u32,
    /// Opaque result produced by the extraction engine
    pub result: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

/// Final output rebuilt from checkpoints, ordered by page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedDocument {
    pub key: DocumentKey,
    pub pages: Vec<PageCheckpoint>,
}

impl MergedDocument {
    /// Build from checkpoints in any order
    pub fn from_checkpoints(key: DocumentKey, mut pages: Vec<PageCheckpoint>) -> Self {
        pages.sort_by_key(|p| p.page);
        pages.dedup_by_key(|p| p.page);
        Self { key, pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page results in page order
    pub fn results(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.pages.iter().map(|p| &p.result)
    }

    /// Pages missing between 1 and the highest checkpointed page
    pub fn gaps(&self) -> Vec<u32> {
        let Some(last) = self.pages.last().map(|p| p.page) else {
            return Vec::new();
        };
        let mut present = self.pages.iter().map(|p| p.page).peekable();
        (1..=last)
            .filter(|page| {
                while present.next_if(|p| p < page).is_some() {}
                present.next_if_eq(page).is_none()
            })
            .collect()
    }
}
