//! Startup repair of documents left `queued` or `processing` by a crash
//!
//! The scan only rewrites durable status. It never resubmits work; an operator
//! (or embedder) decides whether to retry the repaired documents.

use serde::Serialize;

use crate::error::Result;
use crate::providers::{CheckpointStore, StatusStore};
use crate::types::{DocumentKey, DocumentStatus};

/// One document the scan repaired
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecoveredDocument {
    pub key: DocumentKey,
    /// `partial` or `pending`
    pub status: DocumentStatus,
    pub completed_pages: usize,
    /// First page a resumed run extracts
    pub resume_page: u32,
}

/// Outcome of an interrupted-document scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub marked_partial: usize,
    pub marked_pending: usize,
    pub errors: usize,
    pub documents: Vec<RecoveredDocument>,
}

/// Status message for a document that already has checkpoints
pub fn partial_message(completed: usize, resume_page: u32) -> String {
    format!(
        "Interrupted by restart: {} pages completed, resume from page {}",
        completed, resume_page
    )
}

/// Status message for a document with no checkpoints
pub const PENDING_MESSAGE: &str =
    "Interrupted by restart before any page completed; restart from scratch";

/// Repair every document whose persisted status is `processing` or `queued`.
///
/// Must run before the queue accepts submissions. A document with at least
/// one checkpoint becomes `partial`, anything else becomes `pending`. A
/// failure on one document is counted and the scan moves on; only a failed
/// listing is returned as an error.
pub async fn recover_interrupted(
    statuses: &dyn StatusStore,
    checkpoints: &dyn CheckpointStore,
) -> Result<RecoveryReport> {
    let stuck = statuses
        .list_by_status(&[DocumentStatus::Processing, DocumentStatus::Queued])
        .await?;

    let mut report = RecoveryReport {
        scanned: stuck.len(),
        ..Default::default()
    };

    if stuck.is_empty() {
        tracing::debug!("No interrupted documents found at startup");
        return Ok(report);
    }

    tracing::info!("Found {} interrupted documents at startup", stuck.len());

    for entry in stuck {
        match repair(statuses, checkpoints, &entry.key).await {
            Ok(recovered) => {
                match recovered.status {
                    DocumentStatus::Partial => report.marked_partial += 1,
                    _ => report.marked_pending += 1,
                }
                tracing::info!(
                    "[{}] Recovered {} -> {} ({} pages, resume from {})",
                    entry.key,
                    entry.status,
                    recovered.status,
                    recovered.completed_pages,
                    recovered.resume_page
                );
                report.documents.push(recovered);
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!("[{}] Failed to recover interrupted document: {}", entry.key, e);
            }
        }
    }

    Ok(report)
}

async fn repair(
    statuses: &dyn StatusStore,
    checkpoints: &dyn CheckpointStore,
    key: &DocumentKey,
) -> Result<RecoveredDocument> {
    let pages = checkpoints.get_completed_pages(key).await?;

    let recovered = match pages.last() {
        Some(&last) => {
            let resume_page = last + 1;
            let message = partial_message(pages.len(), resume_page);
            statuses
                .write_status(key, DocumentStatus::Partial, Some(&message))
                .await?;
            RecoveredDocument {
                key: key.clone(),
                status: DocumentStatus::Partial,
                completed_pages: pages.len(),
                resume_page,
            }
        }
        None => {
            statuses
                .write_status(key, DocumentStatus::Pending, Some(PENDING_MESSAGE))
                .await?;
            RecoveredDocument {
                key: key.clone(),
                status: DocumentStatus::Pending,
                completed_pages: 0,
                resume_page: 1,
            }
        }
    };

    Ok(recovered)
}

/// Best-effort startup wrapper: a failed scan is logged and startup goes on
pub async fn run_startup_recovery(
    statuses: &dyn StatusStore,
    checkpoints: &dyn CheckpointStore,
) -> Option<RecoveryReport> {
    match recover_interrupted(statuses, checkpoints).await {
        Ok(report) => {
            if report.scanned > 0 {
                tracing::info!(
                    "Startup recovery: {} scanned, {} partial, {} pending, {} errors",
                    report.scanned,
                    report.marked_partial,
                    report.marked_pending,
                    report.errors
                );
            }
            Some(report)
        }
        Err(e) => {
            tracing::error!("Startup recovery scan failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryStore;
    use serde_json::json;
    use tokio_test::assert_ok;

    async fn seed_pages(store: &MemoryStore, key: &DocumentKey, pages: &[u32]) {
        for page in pages {
            store
                .save_page(key, *page, &json!({ "page": page }))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_processing_with_checkpoints_becomes_partial() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("proj", "ten-pages");
        seed_pages(&store, &key, &[1, 2, 3]).await;
        store
            .write_status(&key, DocumentStatus::Processing, None)
            .await
            .unwrap();

        let report = assert_ok!(recover_interrupted(&store, &store).await);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.marked_partial, 1);
        assert_eq!(report.documents[0].resume_page, 4);

        let entry = store.read_status(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, DocumentStatus::Partial);
        assert_eq!(
            entry.error.as_deref(),
            Some("Interrupted by restart: 3 pages completed, resume from page 4")
        );
    }

    #[tokio::test]
    async fn test_without_checkpoints_becomes_pending() {
        let store = MemoryStore::new();
        let processing = DocumentKey::new("proj", "fresh");
        let queued = DocumentKey::new("proj", "waiting");
        store
            .write_status(&processing, DocumentStatus::Processing, None)
            .await
            .unwrap();
        store
            .write_status(&queued, DocumentStatus::Queued, None)
            .await
            .unwrap();

        let report = assert_ok!(recover_interrupted(&store, &store).await);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.marked_pending, 2);

        let entry = store.read_status(&processing).await.unwrap().unwrap();
        assert_eq!(entry.status, DocumentStatus::Pending);
        assert_eq!(entry.error.as_deref(), Some(PENDING_MESSAGE));
    }

    #[tokio::test]
    async fn test_settled_documents_are_untouched() {
        let store = MemoryStore::new();
        let done = DocumentKey::new("proj", "done");
        store
            .write_status(&done, DocumentStatus::Completed, None)
            .await
            .unwrap();

        let report = assert_ok!(recover_interrupted(&store, &store).await);
        assert_eq!(report.scanned, 0);
        let entry = store.read_status(&done).await.unwrap().unwrap();
        assert_eq!(entry.status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_write_failures_are_counted() {
        let store = MemoryStore::new();
        let key = DocumentKey::new("proj", "stuck");
        store
            .write_status(&key, DocumentStatus::Processing, None)
            .await
            .unwrap();
        store.set_fail_writes(true);

        let report = run_startup_recovery(&store, &store).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.errors, 1);
        assert!(report.documents.is_empty());
    }
}
