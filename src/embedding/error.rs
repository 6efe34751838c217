use thiserror::Error;

#[derive(Debug, Error)]
/// Errors returned by the embedding path.
pub enum EmbeddingError {
    /// The generation client failed upstream.
    #[error("embedding request failed: {message}")]
    Upstream {
        /// Provider error message.
        message: String,
    },

    /// The response carried no embedding data.
    #[error("embedding response contained no data")]
    EmptyData,

    /// A JSON-string embedding could not be decoded.
    #[error("failed to decode embedding string: {message}")]
    Decode {
        /// Decode error message.
        message: String,
    },
}
