use super::registry::{SchemaRegistry, SchemaRevision};
use async_trait::async_trait;
use carrier_error::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// In-process schema registry for tests and local runs.
///
/// Revisions are appended per schema name and listed newest first. Remote
/// call counters let tests assert cache behavior.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
    get_schema_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    schemas: HashMap<String, Vec<SchemaRevision>>,
    subscription_topics: HashMap<String, String>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a revision for a schema name (revisions are append-only)
    pub async fn register_revision(&self, name: &str, revision_id: &str, definition: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .schemas
            .entry(name.to_string())
            .or_default()
            .push(SchemaRevision {
                revision_id: revision_id.to_string(),
                definition: definition.to_string(),
            });
    }

    /// Record which topic a subscription is attached to
    pub async fn bind_subscription(&self, subscription: &str, topic: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .subscription_topics
            .insert(subscription.to_string(), topic.to_string());
    }

    /// Remote fetches served so far (get + list)
    pub fn remote_calls(&self) -> usize {
        self.get_schema_calls.load(Ordering::Relaxed) + self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn get_schema(
        &self,
        name: &str,
        revision_id: Option<&str>,
    ) -> AppResult<SchemaRevision> {
        self.get_schema_calls.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.lock().await;
        let revisions = inner
            .schemas
            .get(name)
            .ok_or_else(|| AppError::schema_not_found(format!("schema {name}")))?;
        match revision_id {
            Some(revision_id) => revisions
                .iter()
                .find(|revision| revision.revision_id == revision_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::schema_not_found(format!("schema {name} revision {revision_id}"))
                }),
            None => revisions
                .last()
                .cloned()
                .ok_or_else(|| AppError::schema_not_found(format!("schema {name}"))),
        }
    }

    async fn list_schema_revisions(
        &self,
        name: &str,
        page_size: usize,
    ) -> AppResult<Vec<SchemaRevision>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.lock().await;
        let revisions = inner
            .schemas
            .get(name)
            .ok_or_else(|| AppError::schema_not_found(format!("schema {name}")))?;
        Ok(revisions.iter().rev().take(page_size).cloned().collect())
    }

    async fn get_subscription_topic(&self, subscription: &str) -> AppResult<String> {
        let inner = self.inner.lock().await;
        inner
            .subscription_topics
            .get(subscription)
            .cloned()
            .ok_or_else(|| AppError::broker(format!("subscription {subscription} is not known")))
    }
}
