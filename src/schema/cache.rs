use super::decoder::RevisionDecoder;
use super::registry::SchemaRegistry;
use carrier_config::{original_subscription, schema_name};
use carrier_error::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Process-lifetime cache of compiled schema revision decoders.
///
/// Keyed by revision id and unbounded: revisions are finite, append-only,
/// and immutable, so nothing is ever evicted. The cache also tracks the
/// latest known revision id for fallback resolution.
pub struct RevisionCache {
    registry: Arc<dyn SchemaRegistry>,
    project_id: Option<String>,
    topic_name: String,
    subscription_name: String,
    revisions: Mutex<HashMap<String, Arc<RevisionDecoder>>>,
    latest_revision_id: Mutex<Option<String>>,
    resolved_schema_name: Mutex<Option<String>>,
}

impl RevisionCache {
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        project_id: Option<String>,
        topic_name: &str,
        subscription_name: &str,
    ) -> Self {
        Self {
            registry,
            project_id,
            topic_name: topic_name.to_string(),
            subscription_name: subscription_name.to_string(),
            revisions: Mutex::new(HashMap::new()),
            latest_revision_id: Mutex::new(None),
            resolved_schema_name: Mutex::new(None),
        }
    }

    /// Resolve a decoder for a revision id.
    ///
    /// Cache hit is free; a miss fetches and compiles the revision. A
    /// revision the registry no longer knows (superseded faster than this
    /// process learned about it) falls back to the latest revision rather
    /// than failing — most un-cached revisions are in fact the newest one.
    /// Any other remote error propagates.
    pub async fn resolve(&self, revision_id: &str) -> AppResult<Arc<RevisionDecoder>> {
        if let Some(decoder) = self.revisions.lock().await.get(revision_id).cloned() {
            return Ok(decoder);
        }
        let name = self.schema_name().await?;
        match self.registry.get_schema(&name, Some(revision_id)).await {
            Ok(revision) => {
                let decoder = Arc::new(RevisionDecoder::compile(&revision)?);
                self.revisions
                    .lock()
                    .await
                    .insert(revision.revision_id.clone(), decoder.clone());
                debug!(
                    schema = %name,
                    revision_id = %revision.revision_id,
                    "Schema revision fetched and cached"
                );
                Ok(decoder)
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    schema = %name,
                    revision_id = %revision_id,
                    "Schema revision not known to the registry, falling back to latest"
                );
                self.latest().await
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve the latest revision's decoder, refreshing the latest-known
    /// revision id pointer.
    pub async fn latest(&self) -> AppResult<Arc<RevisionDecoder>> {
        let name = self.schema_name().await?;
        let revisions = self.registry.list_schema_revisions(&name, 1).await?;
        let newest = revisions
            .into_iter()
            .next()
            .ok_or_else(|| AppError::schema(format!("schema {name} has no revisions")))?;

        *self.latest_revision_id.lock().await = Some(newest.revision_id.clone());

        let mut cached = self.revisions.lock().await;
        if let Some(decoder) = cached.get(&newest.revision_id).cloned() {
            return Ok(decoder);
        }
        let decoder = Arc::new(RevisionDecoder::compile(&newest)?);
        cached.insert(newest.revision_id.clone(), decoder.clone());
        Ok(decoder)
    }

    /// The latest revision id the registry currently reports
    pub async fn latest_revision_id(&self) -> AppResult<String> {
        let decoder = self.latest().await?;
        Ok(decoder.revision_id.clone())
    }

    /// The registry schema name for this cache's context.
    ///
    /// For a dead-letter subscription the underlying topic is discovered by
    /// querying the *original* subscription's topic: dead-letter topics
    /// carry the replayed topic's schema name, not their own.
    async fn schema_name(&self) -> AppResult<String> {
        if let Some(name) = self.resolved_schema_name.lock().await.clone() {
            return Ok(name);
        }
        self.project_id.as_deref().ok_or_else(|| {
            AppError::config("PROJECT_ID is required for schema resolution but is not set")
        })?;
        let name = match original_subscription(&self.subscription_name) {
            Some(original) => {
                let topic = self.registry.get_subscription_topic(original).await?;
                debug!(
                    subscription = %self.subscription_name,
                    original = %original,
                    topic = %topic,
                    "Resolved dead-letter subscription to its replayed topic"
                );
                schema_name(&topic)
            }
            None => schema_name(&self.topic_name),
        };
        *self.resolved_schema_name.lock().await = Some(name.clone());
        Ok(name)
    }
}
