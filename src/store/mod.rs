//! Vector-store contract consumed by the cache, plus the shipped backends.
//!
//! The plugin never implements the index itself: it talks to any
//! [`VectorStore`] through equality filters and nearest-neighbor queries.
//! [`QdrantStore`] is the production backend; [`MemoryVectorStore`] backs
//! tests and examples.

pub mod error;
pub mod model;
pub mod qdrant;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::StoreError;
pub use model::{Filter, FilterOp, PropertySpec, PropertyType, StoredEntry};
pub use qdrant::QdrantStore;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MemoryVectorStore, cosine_similarity};

use async_trait::async_trait;
use uuid::Uuid;

/// A page of `get_all` results plus the cursor for the next page.
pub type EntryPage = (Vec<StoredEntry>, Option<String>);

/// Async vector-store interface used by lookup and the writer.
///
/// Implementations must be safe to share across request handlers.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates a typed vector namespace. Idempotent.
    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        properties: &[PropertySpec],
    ) -> Result<(), StoreError>;

    /// Upserts an entry by id. The embedding may be absent for entries that
    /// only serve the direct tier.
    async fn add(
        &self,
        namespace: &str,
        id: Uuid,
        embedding: Option<Vec<f32>>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Scans entries matching `filters`, paged by `cursor`. An empty
    /// `select` returns every metadata field.
    async fn get_all(
        &self,
        namespace: &str,
        filters: &[Filter],
        select: &[&str],
        cursor: Option<String>,
        limit: usize,
    ) -> Result<EntryPage, StoreError>;

    /// Nearest-neighbor search constrained by `filters`; results are ordered
    /// by descending similarity and carry scores `>= threshold`. An empty
    /// `select` returns every metadata field.
    async fn get_nearest(
        &self,
        namespace: &str,
        embedding: &[f32],
        filters: &[Filter],
        select: &[&str],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Deletes one entry by id.
    async fn delete(&self, namespace: &str, id: Uuid) -> Result<(), StoreError>;

    /// Deletes every entry matching `filters`.
    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> Result<(), StoreError>;

    /// Deletes the namespace itself.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError>;
}
