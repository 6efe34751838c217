use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::Payload;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter as QdrantFilter, PayloadIncludeSelector, PointId, PointStruct,
    PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use uuid::Uuid;

use super::error::StoreError;
use super::model::{Filter, FilterOp, PropertySpec, PropertyType, StoredEntry};
use super::{EntryPage, VectorStore};

/// Qdrant-backed [`VectorStore`].
///
/// Namespaces map to cosine-distance collections with a payload index per
/// declared property. Entries without an embedding are stored under a zero
/// vector: cosine against the zero vector scores 0, so they never surface
/// from nearest-neighbor queries.
pub struct QdrantStore {
    client: Qdrant,
    url: String,
    // Collection dimension per namespace, needed for the zero-vector fill.
    dimensions: RwLock<HashMap<String, usize>>,
}

impl QdrantStore {
    /// Creates a client for `url`.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| StoreError::ConnectionFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            dimensions: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the configured URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs a basic health check request.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .health_check()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn dimension_of(&self, namespace: &str) -> Option<usize> {
        self.dimensions.read().get(namespace).copied()
    }

    fn not_found_or(
        namespace: &str,
        message: String,
        fallback: impl FnOnce(String, String) -> StoreError,
    ) -> StoreError {
        // Qdrant reports missing collections inside the error message.
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("doesn't exist") {
            StoreError::NotFound {
                namespace: namespace.to_string(),
            }
        } else {
            fallback(namespace.to_string(), message)
        }
    }
}

fn build_filter(namespace: &str, filters: &[Filter]) -> Result<QdrantFilter, StoreError> {
    let mut conditions = Vec::with_capacity(filters.len());
    for filter in filters {
        let FilterOp::Eq = filter.op;
        let condition = match &filter.value {
            serde_json::Value::String(s) => Condition::matches(filter.field.clone(), s.clone()),
            serde_json::Value::Bool(b) => Condition::matches(filter.field.clone(), *b),
            serde_json::Value::Number(n) => {
                let int = n.as_i64().ok_or_else(|| StoreError::InvalidPayload {
                    message: format!(
                        "filter '{}' in '{namespace}' must be an integer",
                        filter.field
                    ),
                })?;
                Condition::matches(filter.field.clone(), int)
            }
            other => {
                return Err(StoreError::InvalidPayload {
                    message: format!(
                        "filter '{}' in '{namespace}' has unsupported value {other}",
                        filter.field
                    ),
                });
            }
        };
        conditions.push(condition);
    }
    Ok(QdrantFilter::must(conditions))
}

fn payload_selector(select: &[&str]) -> SelectorOptions {
    if select.is_empty() {
        SelectorOptions::Enable(true)
    } else {
        SelectorOptions::Include(PayloadIncludeSelector {
            fields: select.iter().map(|s| s.to_string()).collect(),
        })
    }
}

fn value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::json!(d),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

fn payload_to_metadata(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect()
}

fn entry_id(point_id: Option<PointId>) -> Option<Uuid> {
    match point_id?.point_id_options? {
        PointIdOptions::Uuid(s) => Uuid::parse_str(&s).ok(),
        PointIdOptions::Num(_) => None,
    }
}

fn cursor_to_point_id(cursor: &str) -> PointId {
    PointId::from(cursor.to_string())
}

fn point_id_to_cursor(point_id: PointId) -> Option<String> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(s) => Some(s),
        PointIdOptions::Num(n) => Some(n.to_string()),
    }
}

impl From<PropertyType> for FieldType {
    fn from(kind: PropertyType) -> Self {
        match kind {
            PropertyType::String | PropertyType::StringArray => FieldType::Keyword,
            PropertyType::Integer => FieldType::Integer,
            PropertyType::Boolean => FieldType::Bool,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        properties: &[PropertySpec],
    ) -> Result<(), StoreError> {
        let exists = self.client.collection_exists(namespace).await.map_err(|e| {
            StoreError::NamespaceCreateFailed {
                namespace: namespace.to_string(),
                message: e.to_string(),
            }
        })?;

        if !exists {
            let vectors_config = VectorParamsBuilder::new(dimension as u64, Distance::Cosine);
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(namespace)
                        .vectors_config(vectors_config)
                        .on_disk_payload(true),
                )
                .await
                .map_err(|e| StoreError::NamespaceCreateFailed {
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                })?;
        }

        for property in properties {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    namespace,
                    property.name,
                    FieldType::from(property.kind),
                ))
                .await
                .map_err(|e| StoreError::NamespaceCreateFailed {
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                })?;
        }

        self.dimensions
            .write()
            .insert(namespace.to_string(), dimension);
        Ok(())
    }

    async fn add(
        &self,
        namespace: &str,
        id: Uuid,
        embedding: Option<Vec<f32>>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let payload = Payload::try_from(serde_json::Value::Object(metadata)).map_err(|e| {
            StoreError::InvalidPayload {
                message: e.to_string(),
            }
        })?;

        let vector = match embedding {
            Some(vector) => vector,
            None => {
                let dimension =
                    self.dimension_of(namespace)
                        .ok_or_else(|| StoreError::NotFound {
                            namespace: namespace.to_string(),
                        })?;
                vec![0.0; dimension]
            }
        };

        let point = PointStruct::new(id.to_string(), vector, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(namespace, vec![point]).wait(false))
            .await
            .map_err(|e| {
                Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                    StoreError::UpsertFailed { namespace, message }
                })
            })?;

        Ok(())
    }

    async fn get_all(
        &self,
        namespace: &str,
        filters: &[Filter],
        select: &[&str],
        cursor: Option<String>,
        limit: usize,
    ) -> Result<EntryPage, StoreError> {
        let mut scroll = ScrollPointsBuilder::new(namespace)
            .filter(build_filter(namespace, filters)?)
            .limit(limit as u32)
            .with_payload(payload_selector(select));

        if let Some(cursor) = cursor {
            scroll = scroll.offset(cursor_to_point_id(&cursor));
        }

        let response = self.client.scroll(scroll).await.map_err(|e| {
            Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                StoreError::SearchFailed { namespace, message }
            })
        })?;

        let entries = response
            .result
            .into_iter()
            .filter_map(|point| {
                Some(StoredEntry {
                    id: entry_id(point.id)?,
                    score: None,
                    metadata: payload_to_metadata(point.payload),
                })
            })
            .collect();

        let next = response.next_page_offset.and_then(point_id_to_cursor);
        Ok((entries, next))
    }

    async fn get_nearest(
        &self,
        namespace: &str,
        embedding: &[f32],
        filters: &[Filter],
        select: &[&str],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let search = SearchPointsBuilder::new(namespace, embedding.to_vec(), limit as u64)
            .filter(build_filter(namespace, filters)?)
            .with_payload(payload_selector(select))
            .score_threshold(threshold);

        let response = self.client.search_points(search).await.map_err(|e| {
            Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                StoreError::SearchFailed { namespace, message }
            })
        })?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                Some(StoredEntry {
                    id: entry_id(point.id)?,
                    score: Some(point.score),
                    metadata: payload_to_metadata(point.payload),
                })
            })
            .collect())
    }

    async fn delete(&self, namespace: &str, id: Uuid) -> Result<(), StoreError> {
        let selector = PointsIdsList {
            ids: vec![PointId::from(id.to_string())],
        };

        self.client
            .delete_points(
                DeletePointsBuilder::new(namespace)
                    .points(selector)
                    .wait(true),
            )
            .await
            .map_err(|e| {
                Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                    StoreError::DeleteFailed { namespace, message }
                })
            })?;

        Ok(())
    }

    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> Result<(), StoreError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(namespace)
                    .points(build_filter(namespace, filters)?)
                    .wait(true),
            )
            .await
            .map_err(|e| {
                Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                    StoreError::DeleteFailed { namespace, message }
                })
            })?;

        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.client
            .delete_collection(namespace)
            .await
            .map_err(|e| {
                Self::not_found_or(namespace, e.to_string(), |namespace, message| {
                    StoreError::DeleteFailed { namespace, message }
                })
            })?;

        self.dimensions.write().remove(namespace);
        Ok(())
    }
}
