use async_trait::async_trait;
use carrier_error::AppResult;

/// One immutable schema revision as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRevision {
    /// Opaque, registry-assigned revision id
    pub revision_id: String,
    /// Avro schema definition (JSON text)
    pub definition: String,
}

/// Schema registry collaborator.
///
/// Revisions are append-only: once listed, a revision's definition never
/// changes, which is what makes unbounded client-side caching sound.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fetch a schema, optionally pinned to a specific revision.
    ///
    /// A missing schema or revision surfaces as
    /// [`AppError::SchemaNotFound`](carrier_error::AppError::SchemaNotFound).
    async fn get_schema(
        &self,
        name: &str,
        revision_id: Option<&str>,
    ) -> AppResult<SchemaRevision>;

    /// List revisions, newest first.
    async fn list_schema_revisions(
        &self,
        name: &str,
        page_size: usize,
    ) -> AppResult<Vec<SchemaRevision>>;

    /// The topic a subscription is attached to.
    ///
    /// Used to discover the schema name behind a dead-letter subscription,
    /// whose own topic carries no schema of its own.
    async fn get_subscription_topic(&self, subscription: &str) -> AppResult<String>;
}
