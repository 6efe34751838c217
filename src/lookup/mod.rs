//! Dual-tier cache lookup.
//!
//! Both tiers share one strict filter set (cache key, params hash, owner
//! sentinel, optionally provider and model); the direct tier adds the
//! request hash, the semantic tier swaps it for a nearest-neighbor query
//! with a cosine threshold. The engine never fails a request: every
//! dependency error degrades to a miss.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::fields;
use crate::store::{Filter, StoreError, StoredEntry, VectorStore};
use crate::writer::ResponsePayload;

/// Errors decoding a stored record into a usable cache entry. Any of these
/// marks the record invalid: the caller treats it as a miss and schedules a
/// delete.
#[derive(Debug, Error)]
pub enum EntryDecodeError {
    /// Both `response` and `stream_chunks` carry payload.
    #[error("cache entry carries both single and stream payloads")]
    AmbiguousPayload,

    /// Neither payload field is present.
    #[error("cache entry carries no payload")]
    MissingPayload,

    /// `expires_at` is not a recognizable number.
    #[error("cache entry has malformed expires_at: {value}")]
    BadExpiresAt {
        /// The offending value.
        value: serde_json::Value,
    },

    /// A stream chunk is not a JSON string.
    #[error("cache entry has a malformed stream chunk")]
    BadChunk,
}

/// A decoded, structurally valid cache entry.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// Entry id.
    pub id: Uuid,
    /// Similarity score, present on semantic results.
    pub similarity: Option<f32>,
    /// Expiry instant, Unix seconds.
    pub expires_at: i64,
    /// The payload.
    pub payload: ResponsePayload,
}

impl CachedEntry {
    /// Decodes a raw stored entry, enforcing the payload-xor invariant and
    /// the lenient `expires_at` encodings (string, float, integer) that
    /// heterogeneous store backends produce.
    pub fn from_stored(entry: StoredEntry) -> Result<Self, EntryDecodeError> {
        let response = entry.metadata.get(fields::RESPONSE).and_then(nonnull);
        let chunks = entry.metadata.get(fields::STREAM_CHUNKS).and_then(nonnull);

        let payload = match (response, chunks) {
            (Some(_), Some(_)) => return Err(EntryDecodeError::AmbiguousPayload),
            (None, None) => return Err(EntryDecodeError::MissingPayload),
            (Some(response), None) => match response.as_str() {
                Some(text) => ResponsePayload::Single(text.to_string()),
                None => return Err(EntryDecodeError::MissingPayload),
            },
            (None, Some(chunks)) => {
                let list = chunks
                    .as_array()
                    .ok_or(EntryDecodeError::BadChunk)?
                    .iter()
                    .map(|c| {
                        c.as_str()
                            .map(str::to_string)
                            .ok_or(EntryDecodeError::BadChunk)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if list.is_empty() {
                    return Err(EntryDecodeError::MissingPayload);
                }
                ResponsePayload::Stream(list)
            }
        };

        let expires_raw = entry
            .metadata
            .get(fields::EXPIRES_AT)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let expires_at =
            parse_expires_at(&expires_raw).ok_or(EntryDecodeError::BadExpiresAt {
                value: expires_raw,
            })?;

        Ok(Self {
            id: entry.id,
            similarity: entry.score,
            expires_at,
            payload,
        })
    }

    /// Whether the entry is stale at `now` (Unix seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

fn nonnull(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Null => None,
        other => Some(other),
    }
}

/// Accepts integer, float, and string encodings of a Unix-seconds stamp.
pub fn parse_expires_at(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

/// Outcome of one tier's lookup.
#[derive(Debug)]
pub enum TierResult {
    /// A structurally valid entry matched. TTL is the caller's problem.
    Hit(CachedEntry),
    /// A record matched but is invalid; the caller should delete it.
    Invalid(Uuid),
    /// Nothing matched (including every swallowed dependency failure).
    Miss,
}

/// The strict filter identity of one request.
#[derive(Debug, Clone, Copy)]
pub struct LookupQuery<'a> {
    /// Caller's cache partition.
    pub cache_key: &'a str,
    /// Params fingerprint.
    pub params_hash: &'a str,
    /// Upstream provider.
    pub provider: &'a str,
    /// Upstream model.
    pub model: &'a str,
}

/// Executes store queries for both tiers.
pub struct LookupEngine {
    store: Arc<dyn VectorStore>,
    namespace: String,
    cache_by_provider: bool,
    cache_by_model: bool,
}

impl LookupEngine {
    /// Creates an engine over `namespace`.
    pub fn new(
        store: Arc<dyn VectorStore>,
        namespace: String,
        cache_by_provider: bool,
        cache_by_model: bool,
    ) -> Self {
        Self {
            store,
            namespace,
            cache_by_provider,
            cache_by_model,
        }
    }

    fn filters(&self, query: LookupQuery<'_>, request_hash: Option<&str>) -> Vec<Filter> {
        let mut filters = vec![
            Filter::eq(fields::OWNER, true),
            Filter::eq(fields::CACHE_KEY, query.cache_key),
            Filter::eq(fields::PARAMS_HASH, query.params_hash),
        ];
        if let Some(request_hash) = request_hash {
            filters.push(Filter::eq(fields::REQUEST_HASH, request_hash));
        }
        if self.cache_by_provider {
            filters.push(Filter::eq(fields::PROVIDER, query.provider));
        }
        if self.cache_by_model {
            filters.push(Filter::eq(fields::MODEL, query.model));
        }
        filters
    }

    /// Direct tier: fingerprint equality under the strict filters.
    pub async fn find_direct(&self, query: LookupQuery<'_>, request_hash: &str) -> TierResult {
        let filters = self.filters(query, Some(request_hash));
        let result = self
            .store
            .get_all(&self.namespace, &filters, &[], None, 1)
            .await;

        match result {
            Ok((entries, _)) => decode_first(entries),
            Err(StoreError::NotFound { .. }) => {
                debug!("Cache namespace missing, treating as miss");
                TierResult::Miss
            }
            Err(e) => {
                warn!(error = %e, "Direct lookup failed, treating as miss");
                TierResult::Miss
            }
        }
    }

    /// Semantic tier: nearest neighbor under the strict filters, minus the
    /// request hash, at `threshold`.
    pub async fn find_semantic(
        &self,
        query: LookupQuery<'_>,
        embedding: &[f32],
        threshold: f32,
    ) -> TierResult {
        let filters = self.filters(query, None);
        let result = self
            .store
            .get_nearest(&self.namespace, embedding, &filters, &[], threshold, 1)
            .await;

        match result {
            Ok(entries) => decode_first(entries),
            Err(StoreError::NotFound { .. }) => {
                debug!("Cache namespace missing, treating as miss");
                TierResult::Miss
            }
            Err(e) => {
                warn!(error = %e, "Semantic lookup failed, treating as miss");
                TierResult::Miss
            }
        }
    }
}

fn decode_first(entries: Vec<StoredEntry>) -> TierResult {
    let Some(entry) = entries.into_iter().next() else {
        return TierResult::Miss;
    };
    let id = entry.id;
    match CachedEntry::from_stored(entry) {
        Ok(entry) => TierResult::Hit(entry),
        Err(e) => {
            warn!(%id, error = %e, "Invalid cache entry, treating as miss");
            TierResult::Invalid(id)
        }
    }
}
