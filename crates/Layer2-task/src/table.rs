//! Task table - task identifier to monitor, behind one read/write lock

use crate::monitor::TaskMonitor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owned table of live task monitors. Writers (start, recover, destroy)
/// take the lock exclusively; lookups share it.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: RwLock<HashMap<String, Arc<TaskMonitor>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the identifier is already present
    pub async fn insert_new(&self, task_id: &str, monitor: Arc<TaskMonitor>) -> bool {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(task_id) {
            return false;
        }
        tasks.insert(task_id.to_string(), monitor);
        true
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<TaskMonitor>> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn remove(&self, task_id: &str) -> Option<Arc<TaskMonitor>> {
        self.tasks.write().await.remove(task_id)
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.tasks.read().await.contains_key(task_id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.tasks.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{shared_runtime, CliRuntime};
    use crate::task::{TaskConfig, TaskState};
    use chrono::Utc;

    fn monitor(id: &str) -> Arc<TaskMonitor> {
        let state = TaskState {
            task_config: TaskConfig::new("alpine"),
            container_id: id.to_string(),
            started_at: Utc::now(),
        };
        Arc::new(TaskMonitor::new(
            id,
            id,
            state,
            shared_runtime(Arc::new(CliRuntime::new(""))),
        ))
    }

    #[tokio::test]
    async fn test_insert_is_unique() {
        let table = TaskTable::new();
        assert!(table.insert_new("a", monitor("a")).await);
        assert!(!table.insert_new("a", monitor("a")).await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_hides_entry() {
        let table = TaskTable::new();
        table.insert_new("a", monitor("a")).await;

        assert!(table.remove("a").await.is_some());
        assert!(table.get("a").await.is_none());
        assert!(table.remove("a").await.is_none());
        assert!(table.is_empty().await);
    }

    #[test]
    fn test_ids_lists_every_task() {
        let mut ids = tokio_test::block_on(async {
            let table = TaskTable::new();
            table.insert_new("b", monitor("b")).await;
            table.insert_new("a", monitor("a")).await;
            assert!(table.contains("a").await);
            table.ids().await
        });
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
