use super::store::{TaskRepository, TaskStatus};
use crate::utils::log_safe_id;
use anyhow::{Context, Result};
use carrier_error::AppResult;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Whether `execute` ran the action or deduplicated it away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The action ran (successfully or not; failures are returned as errors)
    Performed,
    /// Another delivery already owns or completed this task id
    Skipped,
}

/// Runs an action at most once successfully per task id.
///
/// Registration happens inside one store transaction: read the record, and
/// either abort (a PROCESSING or COMPLETED record exists) or write
/// PROCESSING and commit. The commit is the linearization point that
/// establishes exclusive ownership; the action itself runs outside the
/// transaction. FAILED records are re-openable, so a redelivery retries
/// a task whose previous attempt failed.
pub struct TaskExecutor {
    repository: Arc<dyn TaskRepository>,
    hash_salt: String,
}

impl TaskExecutor {
    pub fn new(repository: Arc<dyn TaskRepository>, hash_salt: &str) -> Self {
        Self {
            repository,
            hash_salt: hash_salt.to_string(),
        }
    }

    /// Run `action` for `task_id` unless another delivery already owns it.
    ///
    /// On action failure the ledger records FAILED and the original error is
    /// re-raised to the caller.
    pub async fn execute<F, Fut>(&self, task_id: &str, action: F) -> Result<Execution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send,
    {
        let task_hash = log_safe_id(task_id, &self.hash_salt);

        if !self.register(task_id).await? {
            debug!(
                task_hash = %task_hash,
                "Task already registered, skipping execution"
            );
            return Ok(Execution::Skipped);
        }

        let key = self.repository.key(task_id);
        match action().await {
            Ok(()) => {
                self.repository
                    .save(&key, TaskStatus::Completed)
                    .await
                    .context("Failed to persist COMPLETED task status")?;
                debug!(task_hash = %task_hash, "Task completed");
                Ok(Execution::Performed)
            }
            Err(action_err) => {
                // FAILED keeps the task re-openable for a future retry; the
                // original error still reaches the caller even if this
                // bookkeeping write fails.
                if let Err(save_err) = self.repository.save(&key, TaskStatus::Failed).await {
                    error!(
                        error = %save_err,
                        task_hash = %task_hash,
                        "Failed to persist FAILED task status"
                    );
                }
                Err(action_err)
            }
        }
    }

    /// Try to take ownership of a task id inside one store transaction.
    ///
    /// Returns `false` when a record with status PROCESSING or COMPLETED
    /// already exists (the dedup gate); the transaction is aborted with no
    /// side effects.
    async fn register(&self, task_id: &str) -> AppResult<bool> {
        let key = self.repository.key(task_id);
        let mut txn = self.repository.begin().await?;

        let record = match txn.get(&key).await {
            Ok(record) => record,
            Err(e) => {
                txn.rollback().await.ok();
                return Err(e);
            }
        };

        if let Some(record) = record {
            if record.status != TaskStatus::Failed {
                txn.rollback().await?;
                return Ok(false);
            }
        }

        if let Err(e) = txn.save(&key, TaskStatus::Processing).await {
            txn.rollback().await.ok();
            return Err(e);
        }
        txn.commit().await?;
        Ok(true)
    }
}
