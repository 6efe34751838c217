//! Configuration error types.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Similarity threshold is outside [0, 1].
    #[error("invalid threshold {value}: must be within [0, 1]")]
    InvalidThreshold { value: f32 },

    /// TTL must be nonzero.
    #[error("invalid ttl: must be greater than zero")]
    ZeroTtl,

    /// Embedding dimension must be nonzero.
    #[error("invalid embedding dimension: must be greater than zero")]
    ZeroDimension,

    /// Namespace name must be nonempty.
    #[error("vector store namespace must not be empty")]
    EmptyNamespace,
}
