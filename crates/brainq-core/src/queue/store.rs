//! Process-wide task map.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::TaskRecord;
use crate::domain::TaskId;
use crate::error::QueueError;

/// All task records, keyed by id. Records live until the process exits.
///
/// This is the only shared mutable state. Writers go through `update`, which
/// holds the lock only for the closure; nothing awaits while holding it.
#[derive(Default)]
pub struct TaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TaskRecord) -> Result<(), QueueError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.task_id) {
            return Err(QueueError::DuplicateTask(record.task_id));
        }
        records.insert(record.task_id.clone(), record);
        Ok(())
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.records.read().await.get(task_id).cloned()
    }

    /// Apply `f` to one record. `None` if the id is unknown.
    pub async fn update<R>(
        &self,
        task_id: &TaskId,
        f: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Option<R> {
        let mut records = self.records.write().await;
        records.get_mut(task_id).map(f)
    }

    pub async fn records(&self) -> Vec<TaskRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Drop a record that never made it into the queue.
    pub(crate) async fn remove(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.records.write().await.remove(task_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::queue::TaskStatus;

    fn record(id: &str) -> TaskRecord {
        TaskRecord::new(
            TaskId::new(id),
            "/in/a.nii".into(),
            format!("/out/{id}").into(),
            Priority::Normal,
            1,
        )
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = TaskStore::new();
        store.insert(record("a")).await.unwrap();
        let err = store.insert(record("a")).await.unwrap_err();
        assert_eq!(err, QueueError::DuplicateTask(TaskId::new("a")));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_mutates_in_place() {
        let store = TaskStore::new();
        store.insert(record("a")).await.unwrap();

        let started = store.update(&TaskId::new("a"), |r| r.mark_processing()).await;
        assert_eq!(started, Some(true));
        let record = store.get(&TaskId::new("a")).await.unwrap();
        assert_eq!(record.status, TaskStatus::Processing);

        let missing = store.update(&TaskId::new("nope"), |r| r.mark_processing()).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn reads_do_not_mutate() {
        let store = TaskStore::new();
        store.insert(record("a")).await.unwrap();
        let first = store.get(&TaskId::new("a")).await.unwrap();
        let second = store.get(&TaskId::new("a")).await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn remove_forgets_the_record() {
        let store = TaskStore::new();
        store.insert(record("a")).await.unwrap();
        assert!(store.remove(&TaskId::new("a")).await.is_some());
        assert!(store.get(&TaskId::new("a")).await.is_none());
        assert!(store.is_empty().await);
    }
}
