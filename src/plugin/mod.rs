//! The semantic-cache gateway plugin.
//!
//! [`SemanticCachePlugin`] implements the two-hook interceptor contract:
//! `pre_hook` canonicalizes the request and tries the direct then semantic
//! tiers, short-circuiting with a cached response or replayed stream on a
//! hit; `post_hook` accumulates pass-through responses (one call per chunk
//! for streams) and commits them to the store on detached tasks.

pub mod context;
pub mod error;
mod state;

pub use context::{CacheTier, RequestContext, RequestOptions};
pub use error::PluginError;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PluginConfig;
use crate::constants::{
    ACCUMULATOR_MAX_AGE, DEFAULT_EMBEDDING_DIM, NAMESPACE_CREATE_TIMEOUT, PLUGIN_NAME, fields,
};
use crate::embedding::{GenerationClient, RequestEmbedder};
use crate::fingerprint::{
    NormalizeOptions, embedding_text, normalize_input, params_fingerprint, params_metadata,
    request_fingerprint,
};
use crate::lookup::{CachedEntry, LookupEngine, LookupQuery, TierResult};
use crate::model::{
    CacheDebug, GenerationRequest, GenerationResponse, HitType, UpstreamResult,
};
use crate::store::{Filter, PropertySpec, PropertyType, VectorStore};
use crate::streaming::{AccumulatorRegistry, CompletedStream, sort_chunks, spawn_gc_task};
use crate::writer::{CacheWriter, EntryMetadata, ResponsePayload};

use state::{RequestState, TierSelection};

/// A cached delivery replacing the upstream call.
pub enum ShortCircuit {
    /// One complete response.
    Response(Box<GenerationResponse>),
    /// A replayed stream, chunks in stored order. The channel is unbuffered
    /// so the reader controls pace.
    Stream(ReceiverStream<GenerationResponse>),
}

impl std::fmt::Debug for ShortCircuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response(response) => f.debug_tuple("Response").field(&response.id).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// What the pre hook decided.
#[derive(Debug)]
pub enum PreHookOutcome {
    /// Forward the (possibly adjusted) request upstream.
    Forward(GenerationRequest),
    /// Serve from cache; the request never reaches the provider.
    Cached(ShortCircuit),
}

/// The interceptor contract this plugin exposes to the host gateway.
#[async_trait]
pub trait GatewayPlugin: Send + Sync {
    /// Stable plugin name.
    fn name(&self) -> &'static str;

    /// Runs before upstream dispatch; may short-circuit.
    async fn pre_hook(
        &self,
        ctx: &mut RequestContext,
        request: GenerationRequest,
    ) -> Result<PreHookOutcome, PluginError>;

    /// Runs after each upstream response (once per chunk for streams).
    async fn post_hook(&self, ctx: &RequestContext, result: UpstreamResult) -> UpstreamResult;

    /// Drains background work; honors shutdown cleanup options.
    async fn cleanup(&self) -> Result<(), PluginError>;
}

/// Dual-tier semantic response cache.
pub struct SemanticCachePlugin {
    config: PluginConfig,
    store: Arc<dyn VectorStore>,
    engine: LookupEngine,
    writer: CacheWriter,
    embedder: Option<RequestEmbedder>,
    states: DashMap<Uuid, RequestState>,
    accumulators: Arc<AccumulatorRegistry>,
    gc_shutdown: Arc<AtomicBool>,
}

impl SemanticCachePlugin {
    /// Initializes the plugin: validates config, builds the embedder when an
    /// embedding config and generation client are both present, and creates
    /// the cache namespace. Namespace failure is fatal.
    pub async fn init(
        config: PluginConfig,
        store: Arc<dyn VectorStore>,
        generation: Option<Arc<dyn GenerationClient>>,
    ) -> Result<Self, PluginError> {
        config.validate()?;

        let embedder = match (&config.embedding, generation) {
            (Some(embedding), Some(client)) => Some(RequestEmbedder::new(client, embedding)),
            (Some(_), None) => {
                warn!("Embedding configured but no generation client given, running direct-only");
                None
            }
            (None, _) => {
                warn!("No embedding provider configured, semantic tier disabled");
                None
            }
        };

        let dimension = config
            .embedding
            .as_ref()
            .map(|e| e.dimension)
            .unwrap_or(DEFAULT_EMBEDDING_DIM);

        tokio::time::timeout(
            NAMESPACE_CREATE_TIMEOUT,
            store.create_namespace(&config.vector_store_namespace, dimension, &entry_schema()),
        )
        .await
        .map_err(|_| PluginError::InitTimeout)?
        .map_err(PluginError::NamespaceCreate)?;

        info!(
            namespace = %config.vector_store_namespace,
            semantic = embedder.is_some(),
            "Semantic cache plugin initialized"
        );

        let engine = LookupEngine::new(
            Arc::clone(&store),
            config.vector_store_namespace.clone(),
            config.cache_by_provider,
            config.cache_by_model,
        );
        let writer = CacheWriter::new(Arc::clone(&store), config.vector_store_namespace.clone());

        Ok(Self {
            config,
            store,
            engine,
            writer,
            embedder,
            states: DashMap::new(),
            accumulators: Arc::new(AccumulatorRegistry::new()),
            gc_shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawns the periodic accumulator GC; stops at cleanup.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        spawn_gc_task(
            Arc::clone(&self.accumulators),
            interval,
            Arc::clone(&self.gc_shutdown),
        )
    }

    /// Deletes every owned entry under `cache_key`.
    pub async fn clear_by_cache_key(&self, cache_key: &str) -> Result<(), PluginError> {
        self.store
            .delete_all(
                &self.config.vector_store_namespace,
                &[
                    Filter::eq(fields::OWNER, true),
                    Filter::eq(fields::CACHE_KEY, cache_key),
                ],
            )
            .await
            .map_err(PluginError::Cleanup)
    }

    /// Deletes the single entry written for `request_id`.
    pub async fn clear_by_request_id(&self, request_id: Uuid) -> Result<(), PluginError> {
        self.store
            .delete(&self.config.vector_store_namespace, request_id)
            .await
            .map_err(PluginError::Cleanup)
    }

    /// Waits until no cache writes are in flight. Intended for tests and
    /// operational flushes; the request path never calls this.
    pub async fn settle_writes(&self) {
        self.writer.drain().await;
    }

    fn effective_threshold(&self, requested: Option<f32>) -> f32 {
        match requested {
            Some(threshold) if (0.0..=1.0).contains(&threshold) => threshold,
            Some(threshold) => {
                warn!(threshold, "Threshold override out of range, using default");
                self.config.threshold
            }
            None => self.config.threshold,
        }
    }

    /// Validates TTL and builds the short-circuit delivery for a hit.
    /// Returns `None` when the entry is stale or undecodable; either way the
    /// entry has been scheduled for deletion.
    fn try_short_circuit(
        &self,
        entry: CachedEntry,
        hit_type: HitType,
        threshold: f32,
        state: &RequestState,
    ) -> Option<ShortCircuit> {
        if entry.is_expired(chrono::Utc::now().timestamp()) {
            debug!(id = %entry.id, "Cache entry expired, deleting");
            self.writer.enqueue_delete(entry.id);
            return None;
        }

        let debug_info = self.hit_debug(&entry, hit_type, threshold, state);
        match build_short_circuit(&entry, debug_info) {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                warn!(id = %entry.id, error = %e, "Undecodable cache entry, deleting");
                self.writer.enqueue_delete(entry.id);
                None
            }
        }
    }

    fn hit_debug(
        &self,
        entry: &CachedEntry,
        hit_type: HitType,
        threshold: f32,
        state: &RequestState,
    ) -> CacheDebug {
        let mut debug_info = CacheDebug {
            cache_hit: true,
            hit_type: Some(hit_type),
            cache_id: Some(entry.id.to_string()),
            ..Default::default()
        };
        if hit_type == HitType::Semantic {
            if let Some(embedder) = &self.embedder {
                debug_info.provider_used = Some(embedder.provider().to_string());
                debug_info.model_used = Some(embedder.model().to_string());
            }
            debug_info.threshold = Some(threshold);
            debug_info.similarity = entry.similarity;
            debug_info.input_tokens = state.embedding_tokens;
        }
        debug_info
    }

    /// Embedding-cost accounting on responses that missed.
    fn annotate_embedding_cost(&self, response: &mut GenerationResponse, tokens: Option<u32>) {
        let (Some(tokens), Some(embedder)) = (tokens, &self.embedder) else {
            return;
        };
        response.extra.cache_debug = Some(CacheDebug {
            cache_hit: false,
            provider_used: Some(embedder.provider().to_string()),
            model_used: Some(embedder.model().to_string()),
            input_tokens: Some(tokens),
            ..Default::default()
        });
    }

    /// Commit-or-drop for a completed stream, then registry cleanup. Always
    /// removes the accumulator and request state, whatever the outcome.
    fn finish_stream(&self, request_id: Uuid, done: CompletedStream) {
        if done.has_error {
            debug!(%request_id, "Stream surfaced an error, dropping cache write");
        } else if let Some(write) = &done.write {
            let ordered = sort_chunks(done.chunks);
            let encoded: Result<Vec<String>, _> =
                ordered.iter().map(serde_json::to_string).collect();
            match encoded {
                Ok(chunks) if !chunks.is_empty() => {
                    let metadata =
                        EntryMetadata::from_pending(write, ResponsePayload::Stream(chunks));
                    self.writer
                        .enqueue_write(request_id, write.embedding.clone(), metadata);
                }
                Ok(_) => debug!(%request_id, "Stream completed without chunks, nothing to cache"),
                Err(e) => warn!(%request_id, error = %e, "Failed to serialize stream chunks"),
            }
        }

        self.accumulators.remove(request_id);
        self.states.remove(&request_id);
    }
}

#[async_trait]
impl GatewayPlugin for SemanticCachePlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    #[instrument(skip(self, ctx, request), fields(provider = %request.provider, model = %request.model, stream = request.stream))]
    async fn pre_hook(
        &self,
        ctx: &mut RequestContext,
        request: GenerationRequest,
    ) -> Result<PreHookOutcome, PluginError> {
        let Some(cache_key) = ctx.options.cache_key.clone() else {
            debug!("No cache key in request options, skipping cache");
            return Ok(PreHookOutcome::Forward(request));
        };

        if request.input.message_count() > self.config.conversation_history_threshold {
            debug!(
                messages = request.input.message_count(),
                "Conversation history exceeds threshold, skipping cache"
            );
            return Ok(PreHookOutcome::Forward(request));
        }

        let request_id = Uuid::new_v4();
        ctx.set_request_id(request_id);

        let tier = TierSelection::from_options(ctx.options.cache_type);
        let threshold = self.effective_threshold(ctx.options.threshold);
        let mut req_state = RequestState {
            cache_key: cache_key.clone(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            stream: request.stream,
            tier,
            no_store: ctx.options.no_store,
            ttl: ctx.options.ttl.unwrap_or(self.config.ttl),
            request_hash: None,
            params_hash: None,
            embedding: None,
            embedding_tokens: None,
            is_cache_hit: false,
            hit_type: None,
            created_at: Instant::now(),
        };

        let normalized = normalize_input(
            &request.input,
            NormalizeOptions {
                exclude_system_prompt: self.config.exclude_system_prompt,
            },
        );
        let params_hash = params_fingerprint(&params_metadata(&request));
        req_state.params_hash = Some(params_hash.clone());

        let query = LookupQuery {
            cache_key: &cache_key,
            params_hash: &params_hash,
            provider: &request.provider,
            model: &request.model,
        };

        if tier.direct_enabled() {
            let request_hash = request_fingerprint(&normalized, &request.params, request.stream);
            req_state.request_hash = Some(request_hash.clone());

            match self.engine.find_direct(query, &request_hash).await {
                TierResult::Hit(entry) => {
                    let entry_id = entry.id;
                    if let Some(delivery) =
                        self.try_short_circuit(entry, HitType::Direct, threshold, &req_state)
                    {
                        info!(id = %entry_id, "Direct cache hit");
                        req_state.is_cache_hit = true;
                        req_state.hit_type = Some(HitType::Direct);
                        self.states.insert(request_id, req_state);
                        return Ok(PreHookOutcome::Cached(delivery));
                    }
                }
                TierResult::Invalid(id) => self.writer.enqueue_delete(id),
                TierResult::Miss => {}
            }
        }

        if tier.semantic_enabled() && request.input.semantic_cacheable() {
            if let Some(embedder) = &self.embedder {
                match embedding_text(&normalized) {
                    Ok(text) => match embedder.embed(&text).await {
                        Ok(embedded) => {
                            req_state.embedding_tokens = Some(embedded.input_tokens);
                            match self
                                .engine
                                .find_semantic(query, &embedded.vector, threshold)
                                .await
                            {
                                TierResult::Hit(entry) => {
                                    let entry_id = entry.id;
                                    let similarity = entry.similarity;
                                    if let Some(delivery) = self.try_short_circuit(
                                        entry,
                                        HitType::Semantic,
                                        threshold,
                                        &req_state,
                                    ) {
                                        info!(
                                            id = %entry_id,
                                            similarity = similarity,
                                            "Semantic cache hit"
                                        );
                                        req_state.is_cache_hit = true;
                                        req_state.hit_type = Some(HitType::Semantic);
                                        req_state.embedding = Some(embedded.vector);
                                        self.states.insert(request_id, req_state);
                                        return Ok(PreHookOutcome::Cached(delivery));
                                    }
                                }
                                TierResult::Invalid(id) => self.writer.enqueue_delete(id),
                                TierResult::Miss => {}
                            }
                            req_state.embedding = Some(embedded.vector);
                        }
                        Err(e) => {
                            warn!(error = %e, "Embedding failed during lookup, continuing upstream");
                        }
                    },
                    Err(e) => debug!(error = %e, "Skipping semantic tier"),
                }
            }
        }

        self.states.insert(request_id, req_state);
        Ok(PreHookOutcome::Forward(request))
    }

    async fn post_hook(&self, ctx: &RequestContext, result: UpstreamResult) -> UpstreamResult {
        let Some(request_id) = ctx.request_id() else {
            return result;
        };

        match result {
            Err(error) => {
                let stream = self
                    .states
                    .get(&request_id)
                    .map(|s| s.stream)
                    .unwrap_or(false);
                if stream {
                    if let Some(done) =
                        self.accumulators.record(request_id, None, true, false, || None)
                    {
                        self.finish_stream(request_id, done);
                    }
                } else {
                    self.states.remove(&request_id);
                }
                Err(error)
            }
            Ok(mut response) => {
                let Some(snapshot) = self.states.get(&request_id).map(|s| {
                    (s.is_cache_hit, s.no_store, s.stream, s.embedding_tokens, s.hit_type)
                }) else {
                    return Ok(response);
                };
                let (is_cache_hit, no_store, stream_state, embedding_tokens, hit_type) = snapshot;
                let stream = stream_state || response.extra.chunk_index.is_some();
                let finished =
                    ctx.stream_complete() || response.extra.finish_reason.is_some();

                if is_cache_hit {
                    // A replayed hit flowing back through the hook: never
                    // re-cache it.
                    if !stream || finished {
                        debug!(?hit_type, "Cached response passed through post hook");
                        self.states.remove(&request_id);
                    }
                    return Ok(response);
                }

                if stream {
                    if no_store {
                        if finished {
                            self.states.remove(&request_id);
                        }
                    } else {
                        let chunk = response.clone();
                        if let Some(done) =
                            self.accumulators
                                .record(request_id, Some(chunk), false, finished, || {
                                    self.states
                                        .get(&request_id)
                                        .map(|s| s.pending_write())
                                })
                        {
                            self.finish_stream(request_id, done);
                        }
                    }
                    if finished {
                        self.annotate_embedding_cost(&mut response, embedding_tokens);
                    }
                    Ok(response)
                } else {
                    let Some((_, req_state)) = self.states.remove(&request_id) else {
                        return Ok(response);
                    };
                    if !req_state.no_store {
                        match serde_json::to_string(&response) {
                            Ok(json) => {
                                let write = req_state.pending_write();
                                let metadata = EntryMetadata::from_pending(
                                    &write,
                                    ResponsePayload::Single(json),
                                );
                                self.writer.enqueue_write(request_id, write.embedding, metadata);
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize response for caching");
                            }
                        }
                    }
                    self.annotate_embedding_cost(&mut response, req_state.embedding_tokens);
                    Ok(response)
                }
            }
        }
    }

    async fn cleanup(&self) -> Result<(), PluginError> {
        self.gc_shutdown.store(true, Ordering::Release);
        self.writer.drain().await;

        let reclaimed = self.accumulators.gc_stale(ACCUMULATOR_MAX_AGE);
        if reclaimed > 0 {
            debug!(reclaimed, "Reclaimed stale stream accumulators at shutdown");
        }
        self.states
            .retain(|_, s| s.created_at.elapsed() <= ACCUMULATOR_MAX_AGE);

        if self.config.cleanup_on_shutdown {
            let namespace = &self.config.vector_store_namespace;
            self.store
                .delete_all(namespace, &[Filter::eq(fields::OWNER, true)])
                .await
                .map_err(PluginError::Cleanup)?;
            self.store
                .delete_namespace(namespace)
                .await
                .map_err(PluginError::Cleanup)?;
            info!(%namespace, "Deleted owned cache entries and namespace");
        }

        Ok(())
    }
}

/// Typed schema of every known entry property.
fn entry_schema() -> Vec<PropertySpec> {
    vec![
        PropertySpec::new(fields::REQUEST_HASH, PropertyType::String),
        PropertySpec::new(fields::PARAMS_HASH, PropertyType::String),
        PropertySpec::new(fields::CACHE_KEY, PropertyType::String),
        PropertySpec::new(fields::PROVIDER, PropertyType::String),
        PropertySpec::new(fields::MODEL, PropertyType::String),
        PropertySpec::new(fields::OWNER, PropertyType::Boolean),
        PropertySpec::new(fields::EXPIRES_AT, PropertyType::Integer),
        PropertySpec::new(fields::RESPONSE, PropertyType::String),
        PropertySpec::new(fields::STREAM_CHUNKS, PropertyType::StringArray),
    ]
}

/// Decodes a valid entry into its delivery form. Chunks are decoded eagerly
/// so a corrupt record becomes a miss instead of a broken replay.
fn build_short_circuit(
    entry: &CachedEntry,
    debug_info: CacheDebug,
) -> Result<ShortCircuit, serde_json::Error> {
    match &entry.payload {
        ResponsePayload::Single(json) => {
            let mut response: GenerationResponse = serde_json::from_str(json)?;
            response.extra.cache_debug = Some(debug_info);
            Ok(ShortCircuit::Response(Box::new(response)))
        }
        ResponsePayload::Stream(chunks) => {
            let mut decoded = chunks
                .iter()
                .map(|c| serde_json::from_str::<GenerationResponse>(c))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(last) = decoded.last_mut() {
                last.extra.cache_debug = Some(debug_info);
            }

            let (tx, rx) = tokio::sync::mpsc::channel(1);
            tokio::spawn(async move {
                for chunk in decoded {
                    if tx.send(chunk).await.is_err() {
                        // Reader went away; stop replaying.
                        break;
                    }
                }
            });
            Ok(ShortCircuit::Stream(ReceiverStream::new(rx)))
        }
    }
}
