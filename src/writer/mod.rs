//! Cache-entry construction and asynchronous persistence.
//!
//! Writes never run on the request path: the post hook builds the unified
//! metadata, hands it to [`CacheWriter::enqueue_write`], and returns. Each
//! detached write is bounded by a timeout and tracked so shutdown can drain
//! the backlog. Failures are logged and swallowed; a cache bug must cost
//! latency, never a request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{WRITE_TIMEOUT, fields};
use crate::store::VectorStore;
use crate::streaming::PendingWrite;

/// The payload half of a cache entry. Exactly one variant ever exists,
/// which is what makes the stored "response xor stream_chunks" invariant
/// structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// One JSON-encoded complete response.
    Single(String),
    /// JSON-encoded stream chunks in chunk-index order.
    Stream(Vec<String>),
}

/// Unified metadata for one cache entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Direct-tier fingerprint; absent for semantic-only postures.
    pub request_hash: Option<String>,
    /// Params fingerprint.
    pub params_hash: String,
    /// Caller's cache partition.
    pub cache_key: String,
    /// Upstream provider.
    pub provider: String,
    /// Upstream model.
    pub model: String,
    /// Expiry instant, Unix seconds.
    pub expires_at: i64,
    /// The response payload.
    pub payload: ResponsePayload,
}

impl EntryMetadata {
    /// Builds entry metadata from a captured write context, stamping
    /// `expires_at = now + ttl`.
    pub fn from_pending(write: &PendingWrite, payload: ResponsePayload) -> Self {
        Self {
            request_hash: write.request_hash.clone(),
            params_hash: write.params_hash.clone(),
            cache_key: write.cache_key.clone(),
            provider: write.provider.clone(),
            model: write.model.clone(),
            expires_at: expires_at(write.ttl),
            payload,
        }
    }

    /// Flattens into the metadata field map stored alongside the vector.
    pub fn into_fields(self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        if let Some(request_hash) = self.request_hash {
            map.insert(fields::REQUEST_HASH.to_string(), request_hash.into());
        }
        map.insert(fields::PARAMS_HASH.to_string(), self.params_hash.into());
        map.insert(fields::CACHE_KEY.to_string(), self.cache_key.into());
        map.insert(fields::PROVIDER.to_string(), self.provider.into());
        map.insert(fields::MODEL.to_string(), self.model.into());
        map.insert(fields::OWNER.to_string(), true.into());
        map.insert(fields::EXPIRES_AT.to_string(), self.expires_at.into());
        match self.payload {
            ResponsePayload::Single(response) => {
                map.insert(fields::RESPONSE.to_string(), response.into());
            }
            ResponsePayload::Stream(chunks) => {
                map.insert(fields::STREAM_CHUNKS.to_string(), serde_json::json!(chunks));
            }
        }
        map
    }
}

/// `now + ttl` in Unix seconds.
pub fn expires_at(ttl: Duration) -> i64 {
    chrono::Utc::now().timestamp() + ttl.as_secs() as i64
}

/// Detached, tracked persistence into the vector store.
pub struct CacheWriter {
    store: Arc<dyn VectorStore>,
    namespace: String,
    tracker: TaskTracker,
}

impl CacheWriter {
    /// Creates a writer for `namespace`.
    pub fn new(store: Arc<dyn VectorStore>, namespace: String) -> Self {
        Self {
            store,
            namespace,
            tracker: TaskTracker::new(),
        }
    }

    /// Persists one entry on a detached task bounded by the write timeout.
    pub fn enqueue_write(
        &self,
        id: Uuid,
        embedding: Option<Vec<f32>>,
        metadata: EntryMetadata,
    ) {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        self.tracker.spawn(async move {
            let write = store.add(&namespace, id, embedding, metadata.into_fields());
            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => debug!(%id, "Cache entry written"),
                Ok(Err(e)) => warn!(%id, error = %e, "Cache write failed"),
                Err(_) => warn!(%id, "Cache write timed out"),
            }
        });
    }

    /// Deletes one entry fire-and-forget, used for expired records seen on
    /// the read path.
    pub fn enqueue_delete(&self, id: Uuid) {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        self.tracker.spawn(async move {
            let delete = store.delete(&namespace, id);
            match tokio::time::timeout(WRITE_TIMEOUT, delete).await {
                Ok(Ok(())) => debug!(%id, "Expired cache entry deleted"),
                Ok(Err(e)) => warn!(%id, error = %e, "Expired-entry delete failed"),
                Err(_) => warn!(%id, "Expired-entry delete timed out"),
            }
        });
    }

    /// Number of writes still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for the in-flight backlog to drain. New writes enqueued after
    /// this call are still accepted and tracked.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
