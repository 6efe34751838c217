//! Host-facing per-request context.
//!
//! The host creates one [`RequestContext`] per inbound request, fills in the
//! caller's [`RequestOptions`] before dispatch, and passes the same context
//! to both hooks. The request id the plugin stamps into it is how post-hook
//! invocations find their internal state.

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// Which lookup tier(s) a request is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Fingerprint tier only; nothing is embedded or vector-searched.
    Direct,
    /// Semantic tier only; no direct hash is stored or matched.
    Semantic,
}

/// Caller-supplied cache knobs for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Logical cache partition. Required: without it the request bypasses
    /// the cache entirely.
    pub cache_key: Option<String>,
    /// Per-request TTL override.
    pub ttl: Option<Duration>,
    /// Per-request similarity-threshold override, valid in [0, 1].
    pub threshold: Option<f32>,
    /// Restrict matching to one tier. Absent ⇒ both.
    pub cache_type: Option<CacheTier>,
    /// Permit reads but forbid writes for this request.
    pub no_store: bool,
}

impl RequestOptions {
    /// Options that enable caching under `cache_key` with defaults.
    pub fn with_cache_key(cache_key: impl Into<String>) -> Self {
        Self {
            cache_key: Some(cache_key.into()),
            ..Default::default()
        }
    }
}

/// Per-request context shared by the host and the hooks.
#[derive(Debug, Default)]
pub struct RequestContext {
    /// Caller's cache knobs.
    pub options: RequestOptions,
    request_id: Option<Uuid>,
    stream_complete: bool,
}

impl RequestContext {
    /// Context with the given options.
    pub fn new(options: RequestOptions) -> Self {
        Self {
            options,
            request_id: None,
            stream_complete: false,
        }
    }

    /// The request id stamped by the pre hook, if caching engaged.
    pub fn request_id(&self) -> Option<Uuid> {
        self.request_id
    }

    pub(crate) fn set_request_id(&mut self, request_id: Uuid) {
        self.request_id = Some(request_id);
    }

    /// Host-set end-of-stream indicator, for providers whose framing does
    /// not put a finish reason on the last chunk.
    pub fn mark_stream_complete(&mut self) {
        self.stream_complete = true;
    }

    /// Whether the host flagged the current stream as ended.
    pub fn stream_complete(&self) -> bool {
        self.stream_complete
    }
}
