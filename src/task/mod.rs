// ============================================================================
// Task Ledger
// ============================================================================
//
// Durable idempotency ledger for message-derived tasks: a repository
// abstraction over a transactional key-addressed store, and an executor
// guaranteeing at most one successful execution per task id.
//
// ============================================================================

mod executor;
mod memory;
mod postgres;
mod store;

pub use executor::{Execution, TaskExecutor};
pub use memory::MemoryTaskRepository;
pub use postgres::{create_pool, DbPool, PostgresTaskRepository};
pub use store::{TaskKey, TaskRecord, TaskRepository, TaskStatus, TaskTransaction};
