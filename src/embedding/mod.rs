//! Request embedding via an injected generation client.
//!
//! The plugin never computes embeddings itself. [`RequestEmbedder`] wraps the
//! host's generation client with the configured embedding provider/model and
//! flattens whichever vector encoding the provider chose to answer with.

pub mod error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::EmbeddingError;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockGenerationClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::model::{EmbeddingEncoding, EmbeddingRequest, EmbeddingResponse};

/// The host gateway's generation client, as consumed by this plugin.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Requests embeddings for `request.input`.
    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, crate::model::UpstreamError>;
}

/// An embedding vector plus the tokens spent computing it.
#[derive(Debug, Clone)]
pub struct Embedded {
    /// The vector.
    pub vector: Vec<f32>,
    /// Prompt tokens billed for the embedding call.
    pub input_tokens: u32,
}

/// Embeds normalized request text through the generation client.
pub struct RequestEmbedder {
    client: Arc<dyn GenerationClient>,
    provider: String,
    model: String,
}

impl RequestEmbedder {
    /// Creates an embedder for the configured provider/model.
    pub fn new(client: Arc<dyn GenerationClient>, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            provider: config.provider.clone(),
            model: config.embedding_model.clone(),
        }
    }

    /// Embedding provider, surfaced in cache-debug annotations.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Embedding model, surfaced in cache-debug annotations.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embeds `text`, decoding string / flat / 2D vector encodings.
    pub async fn embed(&self, text: &str) -> Result<Embedded, EmbeddingError> {
        let response = self
            .client
            .embed(EmbeddingRequest {
                provider: self.provider.clone(),
                model: self.model.clone(),
                input: text.to_string(),
            })
            .await
            .map_err(|e| EmbeddingError::Upstream { message: e.message })?;

        let input_tokens = response
            .usage
            .as_ref()
            .map(|u| u.total_tokens)
            .unwrap_or_default();

        let mut data = response.data;
        if data.is_empty() {
            return Err(EmbeddingError::EmptyData);
        }

        let vector = match data.swap_remove(0).embedding {
            EmbeddingEncoding::Text(text) => {
                serde_json::from_str::<Vec<f32>>(&text).map_err(|e| EmbeddingError::Decode {
                    message: e.to_string(),
                })?
            }
            EmbeddingEncoding::Flat(vector) => vector,
            EmbeddingEncoding::Nested(rows) => rows.into_iter().flatten().collect(),
        };

        if vector.is_empty() {
            return Err(EmbeddingError::EmptyData);
        }

        Ok(Embedded {
            vector,
            input_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmbeddingData, Usage};

    struct FixedClient {
        encoding: EmbeddingEncoding,
    }

    #[async_trait]
    impl GenerationClient for FixedClient {
        async fn embed(
            &self,
            _request: EmbeddingRequest,
        ) -> Result<EmbeddingResponse, crate::model::UpstreamError> {
            Ok(EmbeddingResponse {
                data: vec![EmbeddingData {
                    embedding: self.encoding.clone(),
                }],
                usage: Some(Usage {
                    total_tokens: 7,
                    ..Default::default()
                }),
            })
        }
    }

    struct EmptyClient;

    #[async_trait]
    impl GenerationClient for EmptyClient {
        async fn embed(
            &self,
            _request: EmbeddingRequest,
        ) -> Result<EmbeddingResponse, crate::model::UpstreamError> {
            Ok(EmbeddingResponse {
                data: vec![],
                usage: None,
            })
        }
    }

    fn embedder(client: Arc<dyn GenerationClient>) -> RequestEmbedder {
        RequestEmbedder::new(
            client,
            &EmbeddingConfig {
                provider: "test-provider".to_string(),
                keys: vec![],
                embedding_model: "test-embedding-model".to_string(),
                dimension: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_decodes_flat_encoding() {
        let embedder = embedder(Arc::new(FixedClient {
            encoding: EmbeddingEncoding::Flat(vec![0.1, 0.2, 0.3]),
        }));
        let embedded = embedder.embed("hello").await.unwrap();
        assert_eq!(embedded.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(embedded.input_tokens, 7);
    }

    #[tokio::test]
    async fn test_decodes_json_string_encoding() {
        let embedder = embedder(Arc::new(FixedClient {
            encoding: EmbeddingEncoding::Text("[0.5, 0.25]".to_string()),
        }));
        let embedded = embedder.embed("hello").await.unwrap();
        assert_eq!(embedded.vector, vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_decodes_nested_encoding_row_major() {
        let embedder = embedder(Arc::new(FixedClient {
            encoding: EmbeddingEncoding::Nested(vec![vec![1.0, 2.0], vec![3.0]]),
        }));
        let embedded = embedder.embed("hello").await.unwrap();
        assert_eq!(embedded.vector, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_empty_data_is_an_error() {
        let embedder = embedder(Arc::new(EmptyClient));
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyData));
    }

    #[tokio::test]
    async fn test_malformed_json_string_is_an_error() {
        let embedder = embedder(Arc::new(FixedClient {
            encoding: EmbeddingEncoding::Text("not json".to_string()),
        }));
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Decode { .. }));
    }
}
