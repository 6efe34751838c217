//! Gateway wire model the cache hooks operate on.
//!
//! These types mirror the host gateway's request/response schema closely
//! enough for fingerprinting and replay while staying provider-agnostic:
//! provider-shaped response bodies travel as raw JSON in
//! [`GenerationResponse::choices`], and unknown generation knobs land in
//! [`GenerationParams::extra`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single inbound generation request as seen by the hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Upstream provider the host intends to dispatch to.
    pub provider: String,
    /// Model name requested by the caller.
    pub model: String,
    /// The request body.
    pub input: RequestInput,
    /// Generation parameters relevant to output.
    #[serde(default)]
    pub params: GenerationParams,
    /// Whether the caller asked for a streamed response.
    #[serde(default)]
    pub stream: bool,
}

/// The body of a generation request, one variant per gateway operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestInput {
    /// Chat completion: an ordered conversation.
    Chat {
        /// Conversation messages, oldest first.
        messages: Vec<ChatMessage>,
    },
    /// Text completion: one prompt or a batch of prompts.
    Completion {
        /// Prompt text.
        prompt: PromptInput,
    },
    /// Responses API: typed conversation items.
    Responses {
        /// Conversation items, oldest first.
        items: Vec<ResponseItem>,
    },
    /// Embedding request.
    Embedding {
        /// Input text(s) to embed.
        input: PromptInput,
    },
    /// Speech synthesis request.
    Speech {
        /// Text to synthesize.
        input: String,
    },
    /// Audio transcription request. Carries no text.
    Transcription {
        /// Raw audio payload.
        audio: Vec<u8>,
    },
}

impl RequestInput {
    /// Number of conversation messages, for the history-threshold bypass.
    /// Non-conversation inputs count as zero.
    pub fn message_count(&self) -> usize {
        match self {
            Self::Chat { messages } => messages.len(),
            Self::Responses { items } => items.len(),
            _ => 0,
        }
    }

    /// Whether this request kind participates in the semantic tier.
    pub fn semantic_cacheable(&self) -> bool {
        !matches!(self, Self::Embedding { .. } | Self::Transcription { .. })
    }
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
}

/// One responses-API conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseItem {
    /// Author role.
    pub role: Role,
    /// Item type (`message`, `reasoning`, ...). Absent for plain messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Item content.
    pub content: MessageContent,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System / instruction message.
    System,
    /// Developer message (responses API system equivalent).
    Developer,
    /// End-user message.
    User,
    /// Model output.
    Assistant,
    /// Tool result.
    Tool,
}

impl Role {
    /// Serialized lowercase name, used when building embedding text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Whether this role carries system-level instructions.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System | Self::Developer)
    }
}

/// Message content: a bare string or an ordered list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multi-part content (text blocks interleaved with media).
    Parts(Vec<ContentPart>),
}

/// One block of multi-part message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text block.
    Text {
        /// Block text.
        text: String,
    },
    /// An image reference. Not normalized; recorded as an attachment.
    ImageUrl {
        /// Image URL or data URI.
        url: String,
    },
    /// A file reference. Not normalized; recorded as an attachment.
    FileUrl {
        /// File URL or identifier.
        url: String,
    },
}

/// A prompt: single string or batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    /// One prompt.
    Single(String),
    /// A batch of prompts, order-significant.
    Batch(Vec<String>),
}

/// Generation parameters that influence the output and therefore partition
/// the cache. Unknown provider-specific knobs go through `extra`, which is
/// ordered so serialization stays deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Provider-specific knobs, ordered for deterministic hashing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A generation response or one streamed chunk of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Provider response id.
    pub id: String,
    /// Object type (`chat.completion`, `chat.completion.chunk`, ...).
    pub object: String,
    /// Creation time, Unix seconds.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Provider-shaped body (choices / data / audio), kept as raw JSON.
    #[serde(default)]
    pub choices: Vec<serde_json::Value>,
    /// Token accounting, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Gateway-level extras riding alongside the provider body.
    #[serde(default)]
    pub extra: ResponseExtra,
}

/// Gateway-level response extras.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseExtra {
    /// Provider that served the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Position of this chunk within its stream. Absent on single responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Terminal finish reason, present on the final chunk of a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Cache observability annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_debug: Option<CacheDebug>,
}

/// Token usage accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Which lookup tier produced a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitType {
    /// Deterministic fingerprint match.
    Direct,
    /// Nearest-neighbor match over the semantic index.
    Semantic,
}

impl std::fmt::Display for HitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// Cache observability surface carried on every annotated response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheDebug {
    /// Whether this response was served from cache.
    pub cache_hit: bool,
    /// Tier that matched, when `cache_hit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_type: Option<HitType>,
    /// Id of the cache entry that matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    /// Provider used for the embedding call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    /// Model used for the embedding call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Effective similarity threshold, on semantic hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Achieved cosine similarity, on semantic hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Tokens spent computing the request embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
}

/// Error surfaced by the upstream provider (or the host on its behalf).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("upstream error: {message}")]
pub struct UpstreamError {
    /// HTTP-ish status code, when known.
    pub status: Option<u16>,
    /// Provider error message.
    pub message: String,
}

/// The value `PostHook` observes: a response or the upstream failure.
pub type UpstreamResult = Result<GenerationResponse, UpstreamError>;

/// Embedding request sent through the generation client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Embedding provider.
    pub provider: String,
    /// Embedding model.
    pub model: String,
    /// Text to embed.
    pub input: String,
}

/// Embedding response returned by the generation client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One datum per input.
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
    /// Token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One embedding datum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// The vector, in whichever encoding the provider chose.
    pub embedding: EmbeddingEncoding,
}

/// Provider encodings for an embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingEncoding {
    /// A JSON string holding a float array.
    Text(String),
    /// A flat float array.
    Flat(Vec<f32>),
    /// A 2D float array, flattened row-major on decode.
    Nested(Vec<Vec<f32>>),
}
