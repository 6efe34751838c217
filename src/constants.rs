//! Cross-cutting, shared constants.
//!
//! Prefer deriving secondary constants from primary ones to avoid drift. The
//! metadata field names in [`fields`] are part of the stored-entry schema:
//! changing one orphans every entry written under the old name.

use std::time::Duration;

/// Plugin name reported to the host gateway.
pub const PLUGIN_NAME: &str = "semantic_cache";

/// Default vector-store namespace for cache entries.
pub const DEFAULT_NAMESPACE: &str = "SemanticCachePlugin";

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default cosine-similarity threshold for the semantic tier.
pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Requests with more conversation messages than this bypass caching.
pub const DEFAULT_CONVERSATION_HISTORY_THRESHOLD: usize = 3;

/// Embedding dimension used when no embedding client is configured and the
/// namespace still needs a vector schema.
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Upper bound on a single detached cache write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on namespace creation during init.
pub const NAMESPACE_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream accumulators older than this are reclaimed by GC.
pub const ACCUMULATOR_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Metadata field names of a stored cache entry.
pub mod fields {
    /// Direct-lookup fingerprint of the normalized request.
    pub const REQUEST_HASH: &str = "request_hash";
    /// Fingerprint of the generation parameters; strict filter on both tiers.
    pub const PARAMS_HASH: &str = "params_hash";
    /// Caller-supplied logical partition.
    pub const CACHE_KEY: &str = "cache_key";
    /// Provider that produced the cached response.
    pub const PROVIDER: &str = "provider";
    /// Model that produced the cached response.
    pub const MODEL: &str = "model";
    /// Ownership sentinel scoping bulk deletes to this plugin's records.
    pub const OWNER: &str = "from_semantic_cache_plugin";
    /// Expiry instant, Unix seconds.
    pub const EXPIRES_AT: &str = "expires_at";
    /// JSON-encoded single response payload.
    pub const RESPONSE: &str = "response";
    /// JSON-encoded stream chunks, ordered by chunk index.
    pub const STREAM_CHUNKS: &str = "stream_chunks";
}
