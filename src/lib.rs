//! # Reprise Cache
//!
//! Dual-tier semantic response cache plugin for multi-provider LLM gateways.
//!
//! Reprise sits between a gateway's request pipeline and its providers as a
//! pre/post interceptor.
//!
//! ```text
//! Request → PreHook → direct (fingerprint) → semantic (cosine) → Provider
//!                                      Response → PostHook → Vector store
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reprise::{PluginConfig, QdrantStore, SemanticCachePlugin};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(QdrantStore::new("http://localhost:6334")?);
//! let _plugin = SemanticCachePlugin::init(PluginConfig::default(), store, None).await?;
//! println!("{} ready", reprise::constants::PLUGIN_NAME);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Purpose |
//! |---------|---------|
//! | `mock`  | In-memory store + deterministic embedder for tests/examples |
//!
//! ## Modules
//!
//! - [`plugin`] - The two-hook interceptor and per-request context
//! - [`fingerprint`] - Canonicalization and request/params hashing
//! - [`lookup`] - Direct + semantic tier queries over the store
//! - [`streaming`] - Chunk accumulation for streamed responses
//! - [`writer`] - Unified entry metadata and detached persistence
//! - [`store`] - Vector-store contract, Qdrant backend, mock
//! - [`embedding`] - Embedding via an injected generation client
//! - [`config`] - Plugin configuration
//!
//! Links: repo/issues at the crate `repository` URL.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod constants;
pub mod embedding;
pub mod fingerprint;
pub mod lookup;
pub mod model;
pub mod plugin;
pub mod store;
pub mod streaming;
pub mod writer;

pub use config::{ConfigError, EmbeddingConfig, PluginConfig};
pub use embedding::{Embedded, EmbeddingError, GenerationClient, RequestEmbedder};
#[cfg(any(test, feature = "mock"))]
pub use embedding::{MockGenerationClient, mock::MockEncoding};
pub use fingerprint::{
    FingerprintError, NormalizeOptions, embedding_text, hash_hex, hash_to_u64, normalize_input,
    normalize_text, params_fingerprint, params_metadata, request_fingerprint,
};
pub use lookup::{CachedEntry, EntryDecodeError, LookupEngine, LookupQuery, TierResult};
pub use model::{
    CacheDebug, ChatMessage, ContentPart, EmbeddingEncoding, EmbeddingRequest, EmbeddingResponse,
    GenerationParams, GenerationRequest, GenerationResponse, HitType, MessageContent, PromptInput,
    RequestInput, ResponseExtra, ResponseItem, Role, Usage, UpstreamError, UpstreamResult,
};
pub use plugin::{
    CacheTier, GatewayPlugin, PluginError, PreHookOutcome, RequestContext, RequestOptions,
    SemanticCachePlugin, ShortCircuit,
};
pub use store::{
    Filter, FilterOp, PropertySpec, PropertyType, QdrantStore, StoreError, StoredEntry,
    VectorStore,
};
#[cfg(any(test, feature = "mock"))]
pub use store::{MemoryVectorStore, cosine_similarity};
pub use streaming::{AccumulatorRegistry, CompletedStream, PendingWrite, TimedChunk, sort_chunks};
pub use writer::{CacheWriter, EntryMetadata, ResponsePayload};
