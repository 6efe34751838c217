use async_trait::async_trait;

use super::GenerationClient;
use crate::fingerprint::hash_to_u64;
use crate::model::{
    EmbeddingData, EmbeddingEncoding, EmbeddingRequest, EmbeddingResponse, UpstreamError, Usage,
};

/// Which wire encoding the mock answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockEncoding {
    /// A flat float array.
    #[default]
    Flat,
    /// A JSON string holding a float array.
    Text,
    /// A 2D float array with one row.
    Nested,
}

/// Deterministic fake of the host generation client.
///
/// Embeds text as a hashed bag of whitespace tokens, L2-normalized, so
/// near-identical texts land close in cosine space and unrelated texts do
/// not. Token accounting reports the whitespace token count.
pub struct MockGenerationClient {
    dimension: usize,
    encoding: MockEncoding,
    fail: std::sync::atomic::AtomicBool,
}

impl MockGenerationClient {
    /// Creates a mock producing `dimension`-sized flat vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            encoding: MockEncoding::Flat,
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Answers with the given wire encoding instead of flat arrays.
    pub fn with_encoding(mut self, encoding: MockEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Makes every subsequent embed call fail, for error-path tests.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    /// The deterministic vector for `text`, as lookups would see it.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let slot = (hash_to_u64(token.as_bytes()) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, UpstreamError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(UpstreamError {
                status: Some(503),
                message: "mock embedding outage".to_string(),
            });
        }

        let vector = self.vector_for(&request.input);
        let embedding = match self.encoding {
            MockEncoding::Flat => EmbeddingEncoding::Flat(vector),
            MockEncoding::Text => EmbeddingEncoding::Text(
                serde_json::to_string(&vector).expect("float vector always serializes"),
            ),
            MockEncoding::Nested => EmbeddingEncoding::Nested(vec![vector]),
        };

        let tokens = request.input.split_whitespace().count() as u32;
        Ok(EmbeddingResponse {
            data: vec![EmbeddingData { embedding }],
            usage: Some(Usage {
                prompt_tokens: Some(tokens),
                completion_tokens: None,
                total_tokens: tokens,
            }),
        })
    }
}
