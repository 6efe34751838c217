use thiserror::Error;

#[derive(Debug, Error)]
/// Errors returned by vector-store operations.
pub enum StoreError {
    /// Could not connect to the store endpoint.
    #[error("failed to connect to vector store at '{url}': {message}")]
    ConnectionFailed {
        /// Endpoint URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Namespace creation failed.
    #[error("failed to create namespace '{namespace}': {message}")]
    NamespaceCreateFailed {
        /// Namespace name.
        namespace: String,
        /// Error message.
        message: String,
    },

    /// Namespace does not exist. Lookups treat this as a miss.
    #[error("namespace not found: {namespace}")]
    NotFound {
        /// Namespace name.
        namespace: String,
    },

    /// Upsert failed.
    #[error("failed to upsert entry into '{namespace}': {message}")]
    UpsertFailed {
        /// Namespace name.
        namespace: String,
        /// Error message.
        message: String,
    },

    /// Search failed.
    #[error("failed to search in '{namespace}': {message}")]
    SearchFailed {
        /// Namespace name.
        namespace: String,
        /// Error message.
        message: String,
    },

    /// Delete failed.
    #[error("failed to delete from '{namespace}': {message}")]
    DeleteFailed {
        /// Namespace name.
        namespace: String,
        /// Error message.
        message: String,
    },

    /// Metadata or filter value the backend cannot represent.
    #[error("invalid store payload: {message}")]
    InvalidPayload {
        /// Error message.
        message: String,
    },
}
