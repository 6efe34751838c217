//! Plugin configuration.

pub mod error;


pub use error::ConfigError;

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::constants::{
    DEFAULT_CONVERSATION_HISTORY_THRESHOLD, DEFAULT_NAMESPACE, DEFAULT_THRESHOLD, DEFAULT_TTL,
};

/// Top-level plugin configuration.
///
/// Every field has a serviceable default; an empty config document yields a
/// direct-only cache with a 5 minute TTL.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Embedding client bootstrap. Absent ⇒ the plugin runs direct-only.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,

    /// Default entry lifetime. Accepts a bare number of seconds or a
    /// duration string such as `"5m"` or `"90s"`.
    #[serde(default = "default_ttl", deserialize_with = "deserialize_ttl")]
    pub ttl: Duration,

    /// Default cosine-similarity threshold for the semantic tier.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Vector-store namespace isolating this plugin's entries.
    #[serde(default = "default_namespace")]
    pub vector_store_namespace: String,

    /// Requests with more conversation messages than this bypass caching.
    #[serde(default = "default_conversation_history_threshold")]
    pub conversation_history_threshold: usize,

    /// Include the model in the strict filter set.
    #[serde(default = "default_true")]
    pub cache_by_model: bool,

    /// Include the provider in the strict filter set.
    #[serde(default = "default_true")]
    pub cache_by_provider: bool,

    /// Drop system messages before fingerprinting.
    #[serde(default)]
    pub exclude_system_prompt: bool,

    /// Delete every owned entry and the namespace on shutdown.
    #[serde(default)]
    pub cleanup_on_shutdown: bool,
}

/// Bootstrap for the internal embedding client.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider serving the embedding model.
    pub provider: String,
    /// Provider API keys, handed to the generation client.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Embedding model name.
    pub embedding_model: String,
    /// Embedding vector dimension; also sizes the namespace schema.
    pub dimension: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            embedding: None,
            ttl: DEFAULT_TTL,
            threshold: DEFAULT_THRESHOLD,
            vector_store_namespace: DEFAULT_NAMESPACE.to_string(),
            conversation_history_threshold: DEFAULT_CONVERSATION_HISTORY_THRESHOLD,
            cache_by_model: true,
            cache_by_provider: true,
            exclude_system_prompt: false,
            cleanup_on_shutdown: false,
        }
    }
}

impl PluginConfig {
    /// Validates field ranges. Called by plugin init before any store I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold {
                value: self.threshold,
            });
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.vector_store_namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if let Some(embedding) = &self.embedding {
            if embedding.dimension == 0 {
                return Err(ConfigError::ZeroDimension);
            }
        }
        Ok(())
    }
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_conversation_history_threshold() -> usize {
    DEFAULT_CONVERSATION_HISTORY_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn deserialize_ttl<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TtlRepr {
        Seconds(u64),
        Text(String),
    }

    match TtlRepr::deserialize(deserializer)? {
        TtlRepr::Seconds(secs) => Ok(Duration::from_secs(secs)),
        TtlRepr::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
