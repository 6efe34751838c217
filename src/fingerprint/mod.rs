//! Request canonicalization and fingerprinting.
//!
//! Two fingerprints partition the cache: the request hash (normalized input +
//! raw params + stream flag) keys the direct tier, and the params hash (a map
//! of the individually meaningful generation parameters) is a strict filter
//! on both tiers so semantic matches never cross parameter sets.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::model::{
    ContentPart, GenerationParams, GenerationRequest, MessageContent, PromptInput, RequestInput,
};

/// Errors from canonicalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    /// The input carries no text usable for the semantic tier. Lookup
    /// proceeds direct-only; writes proceed without an embedding.
    #[error("no text for semantic caching")]
    NoText,
}

/// Computes a 64-bit hash of the input data using BLAKE3, truncated from 256
/// bits.
///
/// 64 bits is plenty for cache keys: the birthday bound sits near 4.3 billion
/// entries, and a collision degrades to a spurious miss or a strict-filter
/// mismatch downstream, never data corruption. Nothing here is used for
/// cryptographic verification.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let bytes: [u8; 8] = hash.as_bytes()[0..8]
        .try_into()
        .expect("BLAKE3 always produces at least 8 bytes");
    u64::from_le_bytes(bytes)
}

/// Renders a 64-bit fingerprint the way it is stored in entry metadata.
#[inline]
pub fn hash_hex(data: &[u8]) -> String {
    format!("{:016x}", hash_to_u64(data))
}

/// Canonical text normalization: trim, then lowercase.
#[inline]
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Knobs that shape canonicalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Drop system/developer messages before fingerprinting.
    pub exclude_system_prompt: bool,
}

/// Produces the normalized copy of a request input that both fingerprinting
/// and embedding-text construction operate on. Attachments (image and file
/// URLs) pass through untouched; they partition the cache via the params
/// metadata instead.
pub fn normalize_input(input: &RequestInput, opts: NormalizeOptions) -> RequestInput {
    match input {
        RequestInput::Chat { messages } => RequestInput::Chat {
            messages: messages
                .iter()
                .filter(|m| !(opts.exclude_system_prompt && m.role.is_system()))
                .map(|m| crate::model::ChatMessage {
                    role: m.role,
                    content: normalize_content(&m.content),
                })
                .collect(),
        },
        RequestInput::Responses { items } => RequestInput::Responses {
            items: items
                .iter()
                .filter(|i| !(opts.exclude_system_prompt && i.role.is_system()))
                .map(|i| crate::model::ResponseItem {
                    role: i.role,
                    item_type: i.item_type.clone(),
                    content: normalize_content(&i.content),
                })
                .collect(),
        },
        RequestInput::Completion { prompt } => RequestInput::Completion {
            prompt: normalize_prompt(prompt),
        },
        RequestInput::Embedding { input } => RequestInput::Embedding {
            input: normalize_prompt(input),
        },
        RequestInput::Speech { input } => RequestInput::Speech {
            input: normalize_text(input),
        },
        RequestInput::Transcription { audio } => RequestInput::Transcription {
            audio: audio.clone(),
        },
    }
}

fn normalize_content(content: &MessageContent) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(normalize_text(text)),
        MessageContent::Parts(parts) => MessageContent::Parts(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => ContentPart::Text {
                        text: normalize_text(text),
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

fn normalize_prompt(prompt: &PromptInput) -> PromptInput {
    match prompt {
        PromptInput::Single(text) => PromptInput::Single(normalize_text(text)),
        PromptInput::Batch(texts) => {
            PromptInput::Batch(texts.iter().map(|t| normalize_text(t)).collect())
        }
    }
}

/// Collects attachment references (image/file URLs) in input order.
pub fn attachments(input: &RequestInput) -> Vec<String> {
    let mut out = Vec::new();
    let contents: Box<dyn Iterator<Item = &MessageContent>> = match input {
        RequestInput::Chat { messages } => Box::new(messages.iter().map(|m| &m.content)),
        RequestInput::Responses { items } => Box::new(items.iter().map(|i| &i.content)),
        _ => return out,
    };
    for content in contents {
        if let MessageContent::Parts(parts) = content {
            for part in parts {
                match part {
                    ContentPart::ImageUrl { url } | ContentPart::FileUrl { url } => {
                        out.push(url.clone());
                    }
                    ContentPart::Text { .. } => {}
                }
            }
        }
    }
    out
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    input: &'a RequestInput,
    params: &'a GenerationParams,
    stream: bool,
}

/// The direct-tier fingerprint: normalized input, raw params, stream flag.
/// Serialization is deterministic (struct field order; `extra` is ordered).
pub fn request_fingerprint(
    normalized_input: &RequestInput,
    params: &GenerationParams,
    stream: bool,
) -> String {
    let canonical = CanonicalRequest {
        input: normalized_input,
        params,
        stream,
    };
    let bytes = serde_json::to_vec(&canonical).expect("canonical request always serializes");
    hash_hex(&bytes)
}

/// Extracts the individually meaningful parameter metadata. The tools list is
/// compressed to a single hash; attachments ride along so differing media
/// change the params fingerprint.
pub fn params_metadata(request: &GenerationRequest) -> BTreeMap<String, serde_json::Value> {
    let params = &request.params;
    let mut meta = BTreeMap::new();

    let mut put = |key: &str, value: Option<serde_json::Value>| {
        if let Some(value) = value {
            meta.insert(key.to_string(), value);
        }
    };

    put("temperature", params.temperature.map(Into::into));
    put("top_p", params.top_p.map(Into::into));
    put("max_tokens", params.max_tokens.map(Into::into));
    put(
        "stop",
        params.stop.as_ref().map(|s| serde_json::json!(s)),
    );
    put("presence_penalty", params.presence_penalty.map(Into::into));
    put(
        "frequency_penalty",
        params.frequency_penalty.map(Into::into),
    );
    put("tool_choice", params.tool_choice.clone());
    put(
        "parallel_tool_calls",
        params.parallel_tool_calls.map(Into::into),
    );
    put("response_format", params.response_format.clone());
    put("seed", params.seed.map(Into::into));
    put("user", params.user.clone().map(Into::into));
    put(
        "reasoning_effort",
        params.reasoning_effort.clone().map(Into::into),
    );
    put("truncation", params.truncation.clone().map(Into::into));
    put("service_tier", params.service_tier.clone().map(Into::into));
    put("store", params.store.map(Into::into));
    put("verbosity", params.verbosity.clone().map(Into::into));
    put("voice", params.voice.clone().map(Into::into));
    put("audio_format", params.audio_format.clone().map(Into::into));
    put("language", params.language.clone().map(Into::into));

    if let Some(tools) = &params.tools {
        let bytes = serde_json::to_vec(tools).expect("tools always serialize");
        meta.insert("tools_hash".to_string(), hash_hex(&bytes).into());
    }

    let attached = attachments(&request.input);
    if !attached.is_empty() {
        meta.insert("attachments".to_string(), serde_json::json!(attached));
    }

    for (key, value) in &params.extra {
        meta.insert(key.clone(), value.clone());
    }

    meta
}

/// The strict-filter fingerprint over the parameter metadata map.
pub fn params_fingerprint(metadata: &BTreeMap<String, serde_json::Value>) -> String {
    let bytes = serde_json::to_vec(metadata).expect("params metadata always serializes");
    hash_hex(&bytes)
}

/// Serializes a normalized input to the single string handed to the
/// embedding client. Transcription carries no text and is rejected.
pub fn embedding_text(normalized_input: &RequestInput) -> Result<String, FingerprintError> {
    let (text, has_text) = match normalized_input {
        RequestInput::Chat { messages } => {
            let contents: Vec<String> = messages.iter().map(|m| content_text(&m.content)).collect();
            let has_text = contents.iter().any(|c| !c.trim().is_empty());
            let text = messages
                .iter()
                .zip(&contents)
                .map(|(m, c)| format!("{}: {}", m.role.as_str(), c))
                .collect::<Vec<_>>()
                .join("\n");
            (text, has_text)
        }
        RequestInput::Responses { items } => {
            let contents: Vec<String> = items.iter().map(|i| content_text(&i.content)).collect();
            let has_text = contents.iter().any(|c| !c.trim().is_empty());
            let text = items
                .iter()
                .zip(&contents)
                .map(|(i, c)| match i.item_type.as_deref() {
                    Some(kind) if !kind.is_empty() => {
                        format!("{}: {}: {}", i.role.as_str(), kind, c)
                    }
                    _ => format!("{}: {}", i.role.as_str(), c),
                })
                .collect::<Vec<_>>()
                .join("\n");
            (text, has_text)
        }
        RequestInput::Completion { prompt } => {
            let text = prompt_text(prompt);
            let has_text = !text.trim().is_empty();
            (text, has_text)
        }
        RequestInput::Embedding { input } => {
            let text = prompt_text(input);
            let has_text = !text.trim().is_empty();
            (text, has_text)
        }
        RequestInput::Speech { input } => (input.clone(), !input.trim().is_empty()),
        RequestInput::Transcription { .. } => return Err(FingerprintError::NoText),
    };

    if !has_text {
        return Err(FingerprintError::NoText);
    }
    Ok(text)
}

fn content_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn prompt_text(prompt: &PromptInput) -> String {
    match prompt {
        PromptInput::Single(text) => text.clone(),
        PromptInput::Batch(texts) => texts.join("\n"),
    }
}
