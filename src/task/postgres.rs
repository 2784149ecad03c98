use super::store::{TaskKey, TaskRecord, TaskRepository, TaskStatus, TaskTransaction};
use async_trait::async_trait;
use carrier_config::StoreConfig;
use carrier_error::AppResult;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};

/// Database connection pool type
pub type DbPool = Pool<Postgres>;

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, store_config: &StoreConfig) -> AppResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(store_config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            store_config.acquire_timeout_secs,
        ))
        .idle_timeout(Some(std::time::Duration::from_secs(
            store_config.idle_timeout_secs,
        )))
        .test_before_acquire(true) // Test connections before returning from pool
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Task repository backed by Postgres.
///
/// `begin()` opens a real database transaction; the transactional read uses
/// `FOR UPDATE` so two concurrent registrations of the same task id cannot
/// both observe "no record".
pub struct PostgresTaskRepository {
    pool: DbPool,
    entity_kind: String,
}

impl PostgresTaskRepository {
    pub fn new(pool: DbPool, entity_kind: &str) -> Self {
        Self {
            pool,
            entity_kind: entity_kind.to_string(),
        }
    }

    /// Create the ledger table if this is a fresh database
    pub async fn ensure_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_records (
                entity_kind TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (entity_kind, task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> AppResult<TaskRecord> {
    let status: String = row.try_get("status")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(TaskRecord {
        status: TaskStatus::parse(&status)?,
        updated_at,
    })
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    fn key(&self, task_id: &str) -> TaskKey {
        TaskKey {
            entity_kind: self.entity_kind.clone(),
            task_id: task_id.to_string(),
        }
    }

    async fn fetch(&self, key: &TaskKey) -> AppResult<Option<TaskRecord>> {
        let row = sqlx::query(
            r#"
            SELECT status, updated_at
            FROM task_records
            WHERE entity_kind = $1 AND task_id = $2
            "#,
        )
        .bind(&key.entity_kind)
        .bind(&key.task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, key: &TaskKey, status: TaskStatus) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_records (entity_kind, task_id, status, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (entity_kind, task_id)
            DO UPDATE SET status = $3, updated_at = now()
            "#,
        )
        .bind(&key.entity_kind)
        .bind(&key.task_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn begin(&self) -> AppResult<Box<dyn TaskTransaction>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(PostgresTaskTransaction { txn }))
    }
}

struct PostgresTaskTransaction {
    txn: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl TaskTransaction for PostgresTaskTransaction {
    async fn get(&mut self, key: &TaskKey) -> AppResult<Option<TaskRecord>> {
        let row = sqlx::query(
            r#"
            SELECT status, updated_at
            FROM task_records
            WHERE entity_kind = $1 AND task_id = $2
            FOR UPDATE
            "#,
        )
        .bind(&key.entity_kind)
        .bind(&key.task_id)
        .fetch_optional(&mut *self.txn)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&mut self, key: &TaskKey, status: TaskStatus) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_records (entity_kind, task_id, status, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (entity_kind, task_id)
            DO UPDATE SET status = $3, updated_at = now()
            "#,
        )
        .bind(&key.entity_kind)
        .bind(&key.task_id)
        .bind(status.as_str())
        .execute(&mut *self.txn)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}
