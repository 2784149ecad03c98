// ============================================================================
// Task Executor Integration Tests
// ============================================================================
//
// Exercises the at-most-one-successful-execution protocol against the
// in-memory repository, whose transactions hold the store lock and so give
// the same isolation a real store transaction gives.
//
// ============================================================================

use carrier::task::{Execution, MemoryTaskRepository, TaskExecutor, TaskRepository, TaskStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn executor() -> (Arc<MemoryTaskRepository>, TaskExecutor) {
    let repository = Arc::new(MemoryTaskRepository::new("task"));
    let executor = TaskExecutor::new(repository.clone(), "test-salt");
    (repository, executor)
}

#[tokio::test]
async fn test_unregistered_task_runs_exactly_once_and_completes() {
    let (repository, executor) = executor();
    let invocations = Arc::new(AtomicU32::new(0));

    let counter = invocations.clone();
    let outcome = executor
        .execute("task-1", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(outcome, Execution::Performed);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(repository.status("task-1").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_processing_task_is_a_noop() {
    let (repository, executor) = executor();
    let key = repository.key("task-1");
    repository.save(&key, TaskStatus::Processing).await.unwrap();

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = invocations.clone();
    let outcome = executor
        .execute("task-1", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(outcome, Execution::Skipped);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    // no store write happened: the record still says PROCESSING
    assert_eq!(
        repository.status("task-1").await,
        Some(TaskStatus::Processing)
    );
}

#[tokio::test]
async fn test_completed_task_is_a_noop() {
    let (repository, executor) = executor();
    let key = repository.key("task-1");
    repository.save(&key, TaskStatus::Completed).await.unwrap();

    let outcome = executor
        .execute("task-1", || async { panic!("must not run") })
        .await
        .unwrap();

    assert_eq!(outcome, Execution::Skipped);
}

#[tokio::test]
async fn test_failed_task_is_retried() {
    let (repository, executor) = executor();
    let key = repository.key("task-1");
    repository.save(&key, TaskStatus::Failed).await.unwrap();

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = invocations.clone();
    let outcome = executor
        .execute("task-1", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(outcome, Execution::Performed);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(repository.status("task-1").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_action_error_persists_failed_and_rethrows() {
    let (repository, executor) = executor();

    let result = executor
        .execute("task-1", || async {
            Err(anyhow::anyhow!("business logic exploded"))
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("business logic exploded"));
    assert_eq!(repository.status("task-1").await, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn test_concurrent_same_id_executes_once() {
    let (repository, executor) = executor();
    let executor = Arc::new(executor);
    let invocations = Arc::new(AtomicU32::new(0));

    let run = |executor: Arc<TaskExecutor>, invocations: Arc<AtomicU32>| async move {
        executor
            .execute("task-1", || async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                // hold ownership long enough for the rival to hit the gate
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap()
    };

    let (a, b) = tokio::join!(
        run(executor.clone(), invocations.clone()),
        run(executor.clone(), invocations.clone())
    );

    let performed = [a, b]
        .iter()
        .filter(|outcome| **outcome == Execution::Performed)
        .count();
    assert_eq!(performed, 1, "exactly one delivery may own the task");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(repository.status("task-1").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_distinct_ids_run_independently() {
    let (repository, executor) = executor();

    for task_id in ["task-1", "task-2", "task-3"] {
        let outcome = executor.execute(task_id, || async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, Execution::Performed);
        assert_eq!(
            repository.status(task_id).await,
            Some(TaskStatus::Completed)
        );
    }
}
