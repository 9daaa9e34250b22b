//! Batch aggregation derived on demand from the live task registry

use serde::Serialize;

use crate::types::DocumentStatus;

use super::task::Task;

/// Aggregate view of every task sharing a batch label
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress_percent: f64,
    pub current_file: Option<String>,
    pub is_finished: bool,
}

impl BatchSnapshot {
    /// Aggregate the tasks labelled `batch_id`; `None` when there are none
    pub fn from_tasks<'a>(
        batch_id: &str,
        tasks: impl IntoIterator<Item = &'a Task>,
    ) -> Option<Self> {
        let mut snapshot = Self {
            batch_id: batch_id.to_string(),
            total: 0,
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            progress_percent: 0.0,
            current_file: None,
            is_finished: false,
        };

        for task in tasks
            .into_iter()
            .filter(|t| t.batch_id.as_deref() == Some(batch_id))
        {
            snapshot.total += 1;
            match task.status {
                DocumentStatus::Queued => snapshot.queued += 1,
                DocumentStatus::Processing => {
                    snapshot.processing += 1;
                    snapshot.current_file = Some(task.file_name.clone());
                }
                DocumentStatus::Completed => snapshot.completed += 1,
                DocumentStatus::Failed => snapshot.failed += 1,
                _ => {}
            }
        }

        if snapshot.total == 0 {
            return None;
        }

        let done = snapshot.completed + snapshot.failed;
        snapshot.progress_percent = done as f64 / snapshot.total as f64 * 100.0;
        snapshot.is_finished = done >= snapshot.total;
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::task::SubmitRequest;
    use std::collections::BTreeSet;

    fn task(id: &str, batch: Option<&str>, status: DocumentStatus) -> Task {
        let mut request = SubmitRequest::new("proj", id, format!("{}.pdf", id), "pdf", Vec::new());
        if let Some(batch) = batch {
            request = request.with_batch(batch);
        }
        let mut task = Task::new(request);
        if status != DocumentStatus::Queued {
            task.start(BTreeSet::new());
            if status != DocumentStatus::Processing {
                task.finish(status, None);
            }
        }
        task
    }

    #[test]
    fn test_mixed_batch() {
        let tasks = vec![
            task("a", Some("b1"), DocumentStatus::Completed),
            task("b", Some("b1"), DocumentStatus::Completed),
            task("c", Some("b1"), DocumentStatus::Failed),
            task("d", Some("b1"), DocumentStatus::Queued),
            task("e", Some("b1"), DocumentStatus::Queued),
            task("f", Some("other"), DocumentStatus::Completed),
            task("g", None, DocumentStatus::Failed),
        ];

        let snapshot = BatchSnapshot::from_tasks("b1", &tasks).unwrap();
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.queued, 2);
        assert_eq!(snapshot.processing, 0);
        assert!((snapshot.progress_percent - 60.0).abs() < f64::EPSILON);
        assert!(!snapshot.is_finished);
        assert!(snapshot.current_file.is_none());
    }

    #[test]
    fn test_processing_file_and_finished_batch() {
        let running = vec![
            task("a", Some("b1"), DocumentStatus::Processing),
            task("b", Some("b1"), DocumentStatus::Completed),
        ];
        let snapshot = BatchSnapshot::from_tasks("b1", &running).unwrap();
        assert_eq!(snapshot.current_file.as_deref(), Some("a.pdf"));
        assert!(!snapshot.is_finished);

        let done = vec![
            task("a", Some("b1"), DocumentStatus::Failed),
            task("b", Some("b1"), DocumentStatus::Completed),
        ];
        let snapshot = BatchSnapshot::from_tasks("b1", &done).unwrap();
        assert!(snapshot.is_finished);
        assert!((snapshot.progress_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_batch() {
        let tasks = vec![task("a", Some("b1"), DocumentStatus::Queued)];
        assert!(BatchSnapshot::from_tasks("missing", &tasks).is_none());
    }
}
