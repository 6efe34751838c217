use std::time::{Duration, Instant};

use crate::model::HitType;
use crate::plugin::context::CacheTier;
use crate::streaming::PendingWrite;

/// Which tiers are live for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TierSelection {
    Both,
    DirectOnly,
    SemanticOnly,
}

impl TierSelection {
    pub(crate) fn from_options(cache_type: Option<CacheTier>) -> Self {
        match cache_type {
            None => Self::Both,
            Some(CacheTier::Direct) => Self::DirectOnly,
            Some(CacheTier::Semantic) => Self::SemanticOnly,
        }
    }

    pub(crate) fn direct_enabled(self) -> bool {
        matches!(self, Self::Both | Self::DirectOnly)
    }

    pub(crate) fn semantic_enabled(self) -> bool {
        matches!(self, Self::Both | Self::SemanticOnly)
    }
}

/// Internal carry for one request, owned by the plugin and keyed by the
/// request id stamped into the context.
#[derive(Debug)]
pub(crate) struct RequestState {
    pub cache_key: String,
    pub provider: String,
    pub model: String,
    pub stream: bool,
    pub tier: TierSelection,
    pub no_store: bool,
    pub ttl: Duration,
    pub request_hash: Option<String>,
    pub params_hash: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_tokens: Option<u32>,
    pub is_cache_hit: bool,
    pub hit_type: Option<HitType>,
    pub created_at: Instant,
}

impl RequestState {
    /// Snapshot of everything a stream commit needs, taken at first chunk.
    pub(crate) fn pending_write(&self) -> PendingWrite {
        PendingWrite {
            cache_key: self.cache_key.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            request_hash: self.request_hash.clone(),
            params_hash: self.params_hash.clone().unwrap_or_default(),
            embedding: self.embedding.clone(),
            ttl: self.ttl,
        }
    }
}
