use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::error::StoreError;
use super::model::{Filter, FilterOp, PropertySpec, StoredEntry};
use super::{EntryPage, VectorStore};

/// In-memory [`VectorStore`] with real cosine scoring, for tests and
/// examples.
#[derive(Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<HashMap<String, MemoryNamespace>>,
}

#[derive(Default)]
struct MemoryNamespace {
    dimension: usize,
    // BTreeMap keeps iteration order stable so cursors stay meaningful.
    entries: BTreeMap<Uuid, MemoryEntry>,
}

#[derive(Clone)]
struct MemoryEntry {
    vector: Option<Vec<f32>>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryVectorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a namespace, if it exists.
    pub fn entry_count(&self, namespace: &str) -> Option<usize> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|ns| ns.entries.len())
    }

    /// Returns a metadata snapshot of one entry, if present.
    pub fn entry_metadata(
        &self,
        namespace: &str,
        id: Uuid,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.namespaces
            .read()
            .get(namespace)?
            .entries
            .get(&id)
            .map(|e| e.metadata.clone())
    }

    /// Drops every entry in a namespace but keeps its schema. Lets tests
    /// scrub state between cases without re-creating the namespace.
    pub fn scrub(&self, namespace: &str) {
        if let Some(ns) = self.namespaces.write().get_mut(namespace) {
            ns.entries.clear();
        }
    }

    fn matches(filters: &[Filter], metadata: &serde_json::Map<String, serde_json::Value>) -> bool {
        filters.iter().all(|f| {
            let FilterOp::Eq = f.op;
            metadata.get(&f.field) == Some(&f.value)
        })
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        _properties: &[PropertySpec],
    ) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| MemoryNamespace {
                dimension,
                entries: BTreeMap::new(),
            });
        Ok(())
    }

    async fn add(
        &self,
        namespace: &str,
        id: Uuid,
        embedding: Option<Vec<f32>>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
            })?;

        if let Some(vector) = &embedding {
            if vector.len() != ns.dimension {
                return Err(StoreError::InvalidPayload {
                    message: format!(
                        "vector dimension {} does not match namespace dimension {}",
                        vector.len(),
                        ns.dimension
                    ),
                });
            }
        }

        ns.entries.insert(
            id,
            MemoryEntry {
                vector: embedding,
                metadata,
            },
        );
        Ok(())
    }

    async fn get_all(
        &self,
        namespace: &str,
        filters: &[Filter],
        _select: &[&str],
        cursor: Option<String>,
        limit: usize,
    ) -> Result<EntryPage, StoreError> {
        let namespaces = self.namespaces.read();
        let ns = namespaces.get(namespace).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
        })?;

        let after = match cursor {
            Some(cursor) => {
                Some(
                    Uuid::parse_str(&cursor).map_err(|e| StoreError::InvalidPayload {
                        message: format!("bad cursor '{cursor}': {e}"),
                    })?,
                )
            }
            None => None,
        };

        let mut entries = Vec::new();
        let mut next = None;
        for (&id, entry) in &ns.entries {
            if after.is_some_and(|a| id <= a) {
                continue;
            }
            if !Self::matches(filters, &entry.metadata) {
                continue;
            }
            if entries.len() == limit {
                next = entries.last().map(|e: &StoredEntry| e.id.to_string());
                break;
            }
            entries.push(StoredEntry {
                id,
                score: None,
                metadata: entry.metadata.clone(),
            });
        }

        Ok((entries, next))
    }

    async fn get_nearest(
        &self,
        namespace: &str,
        embedding: &[f32],
        filters: &[Filter],
        _select: &[&str],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let namespaces = self.namespaces.read();
        let ns = namespaces.get(namespace).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
        })?;

        let mut results: Vec<StoredEntry> = ns
            .entries
            .iter()
            .filter(|(_, e)| Self::matches(filters, &e.metadata))
            .filter_map(|(&id, e)| {
                let vector = e.vector.as_ref()?;
                let score = cosine_similarity(embedding, vector);
                (score >= threshold).then(|| StoredEntry {
                    id,
                    score: Some(score),
                    metadata: e.metadata.clone(),
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn delete(&self, namespace: &str, id: Uuid) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
            })?;
        ns.entries.remove(&id);
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
            })?;
        ns.entries
            .retain(|_, entry| !Self::matches(filters, &entry.metadata));
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write();
        namespaces
            .remove(namespace)
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
            })?;
        Ok(())
    }
}

/// Cosine similarity between two vectors. Zero when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
