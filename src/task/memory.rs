use super::store::{TaskKey, TaskRecord, TaskRepository, TaskStatus, TaskTransaction};
use async_trait::async_trait;
use carrier_error::AppResult;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-memory task repository for tests and local runs.
///
/// A transaction holds the map's mutex guard for its whole lifetime, so two
/// concurrent registrations of the same task id serialize exactly the way a
/// real store's transaction isolation serializes them.
pub struct MemoryTaskRepository {
    records: Arc<Mutex<HashMap<TaskKey, TaskRecord>>>,
    entity_kind: String,
}

impl MemoryTaskRepository {
    pub fn new(entity_kind: &str) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            entity_kind: entity_kind.to_string(),
        }
    }

    /// Current status of a task, for assertions
    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let key = self.key(task_id);
        self.records.lock().await.get(&key).map(|record| record.status)
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    fn key(&self, task_id: &str) -> TaskKey {
        TaskKey {
            entity_kind: self.entity_kind.clone(),
            task_id: task_id.to_string(),
        }
    }

    async fn fetch(&self, key: &TaskKey) -> AppResult<Option<TaskRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &TaskKey, status: TaskStatus) -> AppResult<()> {
        self.records.lock().await.insert(
            key.clone(),
            TaskRecord {
                status,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn begin(&self) -> AppResult<Box<dyn TaskTransaction>> {
        let guard = self.records.clone().lock_owned().await;
        Ok(Box::new(MemoryTaskTransaction {
            guard,
            pending: HashMap::new(),
        }))
    }
}

struct MemoryTaskTransaction {
    guard: OwnedMutexGuard<HashMap<TaskKey, TaskRecord>>,
    pending: HashMap<TaskKey, TaskRecord>,
}

#[async_trait]
impl TaskTransaction for MemoryTaskTransaction {
    async fn get(&mut self, key: &TaskKey) -> AppResult<Option<TaskRecord>> {
        if let Some(record) = self.pending.get(key) {
            return Ok(Some(record.clone()));
        }
        Ok(self.guard.get(key).cloned())
    }

    async fn save(&mut self, key: &TaskKey, status: TaskStatus) -> AppResult<()> {
        self.pending.insert(
            key.clone(),
            TaskRecord {
                status,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> AppResult<()> {
        for (key, record) in self.pending.drain() {
            self.guard.insert(key, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        // pending writes are simply dropped with the guard
        Ok(())
    }
}
