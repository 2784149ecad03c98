use async_trait::async_trait;
use carrier_error::{AppError, AppResult};
use chrono::{DateTime, Utc};

/// Lifecycle state of one task in the ledger.
///
/// Records are never deleted: `Completed` and `Processing` entries are what
/// future deliveries of the same id are deduplicated against, and `Failed`
/// entries are what makes a retry eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(AppError::task(format!("unknown task status: {other}"))),
        }
    }
}

/// Store key for a task record, derived from `(entity_kind, task_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub entity_kind: String,
    pub task_id: String,
}

/// One ledger entry
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

/// Repository abstraction over the transactional store.
///
/// Wraps key construction, record fetch, record save, and transaction
/// acquisition behind one interface so the task executor and any ad-hoc
/// entity manager share it.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store key for a task id
    fn key(&self, task_id: &str) -> TaskKey;

    /// Read a record outside any transaction
    async fn fetch(&self, key: &TaskKey) -> AppResult<Option<TaskRecord>>;

    /// Write a record outside any transaction
    async fn save(&self, key: &TaskKey, status: TaskStatus) -> AppResult<()>;

    /// Begin a transaction; the store's isolation is the sole correctness
    /// mechanism for concurrent registrations of the same task id.
    async fn begin(&self) -> AppResult<Box<dyn TaskTransaction>>;
}

/// An open store transaction
#[async_trait]
pub trait TaskTransaction: Send {
    async fn get(&mut self, key: &TaskKey) -> AppResult<Option<TaskRecord>>;

    async fn save(&mut self, key: &TaskKey, status: TaskStatus) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::parse("DONE").is_err());
    }
}
